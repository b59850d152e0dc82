//! Balanced tree keyed by a typed property value.
//!
//! Searches dominate index use, so an AVL tree's strict balance is the
//! right trade; removal may traverse more than once to keep heights exact.
//! Every structural change journals the fields it touches before writing.
//! The per-key value is an embedded list head of entity addresses.

use std::marker::PhantomData;
use std::mem::offset_of;

use crate::alloc::Allocator;
use crate::error::Result;
use crate::region::pm;
use crate::tx::TransactionImpl;

use super::keys::TreeKey;
use super::list::ListHead;

/// Persistent tree root: node pointer plus element count.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct TreePm {
    root: u64,
    num_elems: u64,
}

/// Size of the embedded tree root.
pub(crate) const TREE_PM_SIZE: u64 = std::mem::size_of::<TreePm>() as u64;

#[allow(dead_code)] // accessed through field offsets
#[repr(C)]
struct TreeNode<K> {
    left: u64,
    right: u64,
    height: i32,
    _pad: u32,
    key: K,
    value: ListHead,
}

/// Handle to a tree whose root struct is embedded at `pm`.
pub(crate) struct AvlTree<K> {
    pm: u64,
    _k: PhantomData<K>,
}

fn height_of<K: TreeKey>(node: u64) -> i32 {
    if node == pm::NULL {
        -1
    } else {
        pm::read(node + offset_of!(TreeNode<K>, height) as u64)
    }
}

impl<K: TreeKey> AvlTree<K> {
    pub(crate) fn at(pm: u64) -> AvlTree<K> {
        AvlTree {
            pm,
            _k: PhantomData,
        }
    }

    pub(crate) fn node_size() -> u64 {
        std::mem::size_of::<TreeNode<K>>() as u64
    }

    fn root_addr(&self) -> u64 {
        self.pm + offset_of!(TreePm, root) as u64
    }

    fn num_addr(&self) -> u64 {
        self.pm + offset_of!(TreePm, num_elems) as u64
    }

    pub(crate) fn root(&self) -> u64 {
        pm::read(self.root_addr())
    }

    pub(crate) fn num_elems(&self) -> u64 {
        pm::read(self.num_addr())
    }

    pub(crate) fn left(node: u64) -> u64 {
        pm::read(node + offset_of!(TreeNode<K>, left) as u64)
    }

    pub(crate) fn right(node: u64) -> u64 {
        pm::read(node + offset_of!(TreeNode<K>, right) as u64)
    }

    pub(crate) fn key(node: u64) -> K {
        pm::read(node + offset_of!(TreeNode<K>, key) as u64)
    }

    /// Address of a node's embedded value list head.
    pub(crate) fn value_addr(node: u64) -> u64 {
        node + offset_of!(TreeNode<K>, value) as u64
    }

    #[cfg(test)]
    pub(crate) fn height(node: u64) -> i32 {
        height_of::<K>(node)
    }

    // hinge -> new_root -> its children; the return value replaces hinge in
    // the parent. Heights are journaled with the pointers they ride on.
    fn left_rotate(&self, tx: &TransactionImpl, hinge: u64) -> Result<u64> {
        let new_root = Self::right(hinge);
        // left and height change for the new root; right sits in between.
        tx.log(new_root + offset_of!(TreeNode<K>, left) as u64, 20)?;
        // right and height change for the hinge.
        tx.log(hinge + offset_of!(TreeNode<K>, right) as u64, 12)?;

        pm::write(
            hinge + offset_of!(TreeNode<K>, right) as u64,
            Self::left(new_root),
        );
        pm::write(
            hinge + offset_of!(TreeNode<K>, height) as u64,
            height_of::<K>(Self::left(hinge)).max(height_of::<K>(Self::right(hinge))) + 1,
        );
        pm::write(new_root + offset_of!(TreeNode<K>, left) as u64, hinge);
        pm::write(
            new_root + offset_of!(TreeNode<K>, height) as u64,
            height_of::<K>(hinge).max(height_of::<K>(Self::right(new_root))) + 1,
        );
        Ok(new_root)
    }

    fn right_rotate(&self, tx: &TransactionImpl, hinge: u64) -> Result<u64> {
        let new_root = Self::left(hinge);
        // right and height change for the new root.
        tx.log(new_root + offset_of!(TreeNode<K>, right) as u64, 12)?;
        // left and height change for the hinge; right sits in between.
        tx.log(hinge + offset_of!(TreeNode<K>, left) as u64, 20)?;

        pm::write(
            hinge + offset_of!(TreeNode<K>, left) as u64,
            Self::right(new_root),
        );
        pm::write(
            hinge + offset_of!(TreeNode<K>, height) as u64,
            height_of::<K>(Self::left(hinge)).max(height_of::<K>(Self::right(hinge))) + 1,
        );
        pm::write(new_root + offset_of!(TreeNode<K>, right) as u64, hinge);
        pm::write(
            new_root + offset_of!(TreeNode<K>, height) as u64,
            height_of::<K>(hinge).max(height_of::<K>(Self::left(new_root))) + 1,
        );
        Ok(new_root)
    }

    fn leftright_rotate(&self, tx: &TransactionImpl, hinge: u64) -> Result<u64> {
        let rotated = self.right_rotate(tx, Self::right(hinge))?;
        tx.write(hinge + offset_of!(TreeNode<K>, right) as u64, rotated)?;
        self.left_rotate(tx, hinge)
    }

    fn rightleft_rotate(&self, tx: &TransactionImpl, hinge: u64) -> Result<u64> {
        let rotated = self.left_rotate(tx, Self::left(hinge))?;
        tx.write(hinge + offset_of!(TreeNode<K>, left) as u64, rotated)?;
        self.right_rotate(tx, hinge)
    }

    fn fix_height(&self, tx: &TransactionImpl, node: u64) -> Result<()> {
        let new_height =
            height_of::<K>(Self::left(node)).max(height_of::<K>(Self::right(node))) + 1;
        if new_height != height_of::<K>(node) {
            tx.write(node + offset_of!(TreeNode<K>, height) as u64, new_height)?;
        }
        Ok(())
    }

    fn add_recursive(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        curr: u64,
        key: &K,
        out: &mut u64,
        rebalanced: &mut bool,
    ) -> Result<u64> {
        use std::cmp::Ordering::*;

        if curr == pm::NULL {
            let node = allocator.alloc(tx, Self::node_size())?;
            pm::write(node + offset_of!(TreeNode<K>, left) as u64, pm::NULL);
            pm::write(node + offset_of!(TreeNode<K>, right) as u64, pm::NULL);
            pm::write(node + offset_of!(TreeNode<K>, height) as u64, 0i32);
            let stored = key.store(tx, allocator)?;
            pm::write(node + offset_of!(TreeNode<K>, key) as u64, stored);
            crate::index::list::List::<u64>::init(Self::value_addr(node));
            // Fresh allocation: flushed, not logged.
            tx.flush(node, Self::node_size());
            tx.write(self.num_addr(), self.num_elems() + 1)?;
            *out = Self::value_addr(node);
            return Ok(node);
        }

        match key.cmp_key(&Self::key(curr)) {
            Equal => {
                *out = Self::value_addr(curr);
                return Ok(curr);
            }
            Less => {
                // Log only the left pointer; rotations log their own spans.
                tx.log(curr + offset_of!(TreeNode<K>, left) as u64, 8)?;
                let new_left =
                    self.add_recursive(tx, allocator, Self::left(curr), key, out, rebalanced)?;
                pm::write(curr + offset_of!(TreeNode<K>, left) as u64, new_left);
                let mut curr = curr;
                if height_of::<K>(Self::left(curr)) - height_of::<K>(Self::right(curr)) == 2 {
                    curr = if key.cmp_key(&Self::key(Self::left(curr))) == Greater {
                        self.rightleft_rotate(tx, curr)?
                    } else {
                        self.right_rotate(tx, curr)?
                    };
                    *rebalanced = true;
                }
                self.fix_height(tx, curr)?;
                return Ok(curr);
            }
            Greater => {
                tx.log(curr + offset_of!(TreeNode<K>, right) as u64, 8)?;
                let new_right =
                    self.add_recursive(tx, allocator, Self::right(curr), key, out, rebalanced)?;
                pm::write(curr + offset_of!(TreeNode<K>, right) as u64, new_right);
                let mut curr = curr;
                if height_of::<K>(Self::left(curr)) - height_of::<K>(Self::right(curr)) == -2 {
                    curr = if key.cmp_key(&Self::key(Self::right(curr))) == Less {
                        self.leftright_rotate(tx, curr)?
                    } else {
                        self.left_rotate(tx, curr)?
                    };
                    *rebalanced = true;
                }
                self.fix_height(tx, curr)?;
                return Ok(curr);
            }
        }
    }

    /// Finds or inserts `key`; returns the address of its value list head.
    /// Iterators over this tree are told when a rotation happened.
    pub(crate) fn add(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: &K,
    ) -> Result<u64> {
        let mut out = pm::NULL;
        let mut rebalanced = false;
        tx.log(self.root_addr(), 8)?;
        let new_root = self.add_recursive(tx, allocator, self.root(), key, &mut out, &mut rebalanced)?;
        pm::write(self.root_addr(), new_root);

        if rebalanced {
            tx.iterator_rebalance_notify(self.pm);
        }
        Ok(out)
    }

    fn find_max(node: u64) -> u64 {
        let mut node = node;
        while node != pm::NULL && Self::right(node) != pm::NULL {
            node = Self::right(node);
        }
        node
    }

    fn remove_recursive(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        curr: u64,
        key: &K,
        rebalanced: &mut bool,
    ) -> Result<u64> {
        use std::cmp::Ordering::*;

        if curr == pm::NULL {
            return Ok(pm::NULL);
        }

        let mut curr = curr;
        match key.cmp_key(&Self::key(curr)) {
            Greater => {
                tx.log(curr + offset_of!(TreeNode<K>, right) as u64, 8)?;
                let new_right =
                    self.remove_recursive(tx, allocator, Self::right(curr), key, rebalanced)?;
                pm::write(curr + offset_of!(TreeNode<K>, right) as u64, new_right);
                if height_of::<K>(Self::left(curr)) - height_of::<K>(Self::right(curr)) == 2 {
                    let left = Self::left(curr);
                    curr = if height_of::<K>(Self::left(left)) > height_of::<K>(Self::right(left)) {
                        self.right_rotate(tx, curr)?
                    } else {
                        self.rightleft_rotate(tx, curr)?
                    };
                    *rebalanced = true;
                }
            }
            Equal | Less => {
                if key.cmp_key(&Self::key(curr)) == Equal {
                    let left = Self::left(curr);
                    let right = Self::right(curr);
                    if left == pm::NULL || right == pm::NULL {
                        // Zero or one child: free this node and splice.
                        let survivor = if left != pm::NULL { left } else { right };
                        Self::key(curr).destroy(tx, allocator);
                        allocator.free(tx, curr, Self::node_size());
                        tx.write(self.num_addr(), self.num_elems() - 1)?;
                        // Heights below are untouched; the parent rebalances.
                        return Ok(survivor);
                    }
                    // Two children: swap in the in-order predecessor, then
                    // remove it from the left subtree so heights and
                    // rotations stay exact.
                    let to_replace = Self::find_max(left);
                    tx.log(curr, std::mem::size_of::<TreeNode<K>>())?;
                    let pred_key = Self::key(to_replace);
                    Self::key(curr).destroy(tx, allocator);
                    let moved = pred_key.store(tx, allocator)?;
                    pm::write(curr + offset_of!(TreeNode<K>, key) as u64, moved);
                    pm::write::<ListHead>(
                        Self::value_addr(curr),
                        pm::read(Self::value_addr(to_replace)),
                    );
                    tx.log(curr + offset_of!(TreeNode<K>, left) as u64, 8)?;
                    let new_left =
                        self.remove_recursive(tx, allocator, left, &pred_key, rebalanced)?;
                    pm::write(curr + offset_of!(TreeNode<K>, left) as u64, new_left);
                } else {
                    tx.log(curr + offset_of!(TreeNode<K>, left) as u64, 8)?;
                    let new_left =
                        self.remove_recursive(tx, allocator, Self::left(curr), key, rebalanced)?;
                    pm::write(curr + offset_of!(TreeNode<K>, left) as u64, new_left);
                }
                if height_of::<K>(Self::left(curr)) - height_of::<K>(Self::right(curr)) == -2 {
                    let right = Self::right(curr);
                    curr = if height_of::<K>(Self::left(right)) > height_of::<K>(Self::right(right))
                    {
                        self.leftright_rotate(tx, curr)?
                    } else {
                        self.left_rotate(tx, curr)?
                    };
                    *rebalanced = true;
                }
            }
        }

        self.fix_height(tx, curr)?;
        Ok(curr)
    }

    /// Removes `key` (and its tree node). The caller is responsible for the
    /// value list being empty.
    pub(crate) fn remove(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        key: &K,
    ) -> Result<()> {
        let mut rebalanced = false;
        tx.log(self.root_addr(), 8)?;
        let new_root = self.remove_recursive(tx, allocator, self.root(), key, &mut rebalanced)?;
        pm::write(self.root_addr(), new_root);

        if rebalanced {
            tx.iterator_rebalance_notify(self.pm);
        }
        Ok(())
    }

    /// Visits every tree node, for statistics.
    pub(crate) fn for_each_node(&self, mut f: impl FnMut(u64)) {
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            if node == pm::NULL {
                continue;
            }
            f(node);
            stack.push(Self::left(node));
            stack.push(Self::right(node));
        }
    }

    /// Finds `key`; returns the address of its value list head.
    pub(crate) fn find(&self, key: &K) -> Option<u64> {
        use std::cmp::Ordering::*;
        let mut curr = self.root();
        while curr != pm::NULL {
            match key.cmp_key(&Self::key(curr)) {
                Equal => return Some(Self::value_addr(curr)),
                Less => curr = Self::left(curr),
                Greater => curr = Self::right(curr),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::open_temp_graph;
    use crate::tx::{Transaction, TransactionImpl, TxMode};

    fn fresh_tree(graph: &crate::graph::Graph) -> u64 {
        let tx = Transaction::begin(graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let pm_addr = graph.inner().allocator().alloc(txi, TREE_PM_SIZE).unwrap();
        pm::write(
            pm_addr,
            TreePm {
                root: pm::NULL,
                num_elems: 0,
            },
        );
        txi.flush(pm_addr, TREE_PM_SIZE);
        tx.commit().unwrap();
        pm_addr
    }

    // Checks the AVL balance bound and search-order invariant for every
    // subtree, returning the height.
    fn check_subtree(node: u64, lo: Option<i64>, hi: Option<i64>) -> i32 {
        if node == pm::NULL {
            return -1;
        }
        let key = AvlTree::<i64>::key(node);
        if let Some(lo) = lo {
            assert!(key > lo, "left subtree key {key} out of order");
        }
        if let Some(hi) = hi {
            assert!(key < hi, "right subtree key {key} out of order");
        }
        let lh = check_subtree(AvlTree::<i64>::left(node), lo, Some(key));
        let rh = check_subtree(AvlTree::<i64>::right(node), Some(key), hi);
        assert!((lh - rh).abs() <= 1, "imbalance at key {key}");
        let h = lh.max(rh) + 1;
        assert_eq!(AvlTree::<i64>::height(node), h, "stale height at key {key}");
        h
    }

    #[test]
    fn shape_holds_after_inserts_and_deletes() {
        let (_dir, _cfg, graph) = open_temp_graph();
        let pm_addr = fresh_tree(&graph);
        let tree = AvlTree::<i64>::at(pm_addr);

        let inserts: [i64; 22] = [
            100, 50, 150, 25, 75, 115, 175, 10, 30, 60, 80, 110, 120, 160, 190, 5, 15, 27, 55,
            105, 112, 1,
        ];
        let removes: [i64; 7] = [27, 80, 10, 5, 100, 120, 112];

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let allocator = graph.inner().allocator();
        for k in inserts {
            tree.add(txi, allocator, &k).unwrap();
        }
        assert_eq!(tree.num_elems(), inserts.len() as u64);
        check_subtree(tree.root(), None, None);

        for k in removes {
            tree.remove(txi, allocator, &k).unwrap();
        }
        tx.commit().unwrap();

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        assert_eq!(tree.num_elems(), (inserts.len() - removes.len()) as u64);
        check_subtree(tree.root(), None, None);
        for k in removes {
            assert!(tree.find(&k).is_none(), "removed key {k} still present");
        }
        for k in inserts {
            if !removes.contains(&k) {
                assert!(tree.find(&k).is_some(), "kept key {k} lost");
            }
        }
        tx.commit().unwrap();
    }

    #[test]
    fn abort_restores_tree_state() {
        let (_dir, _cfg, graph) = open_temp_graph();
        let pm_addr = fresh_tree(&graph);
        let tree = AvlTree::<i64>::at(pm_addr);
        let keys: Vec<i64> = (1..=22).map(|k| k * 7 % 23).collect();

        // Inserts dropped without commit leave nothing behind.
        {
            let _tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            let txi = TransactionImpl::current().unwrap();
            for k in &keys {
                tree.add(txi, graph.inner().allocator(), k).unwrap();
            }
            assert_eq!(tree.num_elems(), 22);
        }
        assert_eq!(tree.num_elems(), 0);
        {
            let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            check_subtree(tree.root(), None, None);
            tx.commit().unwrap();
        }

        // Committed inserts stay.
        {
            let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            let txi = TransactionImpl::current().unwrap();
            for k in &keys {
                tree.add(txi, graph.inner().allocator(), k).unwrap();
            }
            tx.commit().unwrap();
        }
        assert_eq!(tree.num_elems(), 22);

        // Aborted removal restores every key.
        {
            let _tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            let txi = TransactionImpl::current().unwrap();
            for k in &keys {
                tree.remove(txi, graph.inner().allocator(), k).unwrap();
            }
            assert_eq!(tree.num_elems(), 0);
        }
        assert_eq!(tree.num_elems(), 22);
        {
            let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            check_subtree(tree.root(), None, None);
            for k in &keys {
                assert!(tree.find(k).is_some());
            }
            tx.commit().unwrap();
        }

        // Committed removal empties the tree.
        {
            let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            let txi = TransactionImpl::current().unwrap();
            for k in &keys {
                tree.remove(txi, graph.inner().allocator(), k).unwrap();
            }
            tx.commit().unwrap();
        }
        assert_eq!(tree.num_elems(), 0);
    }

    #[test]
    fn string_keys_spill_and_compare() {
        use crate::index::keys::TransientStringKey;

        let (_dir, _cfg, graph) = open_temp_graph();
        let pm_addr = fresh_tree(&graph);
        let tree = AvlTree::<crate::index::keys::StringKey>::at(pm_addr);

        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let txi = TransactionImpl::current().unwrap();
        let allocator = graph.inner().allocator();
        let words = ["alpha", "a-rather-long-key-with-remainder", "zebra", "a-rather-long-key-with-remainder2"];
        for w in words {
            let probe = TransientStringKey::new(w, "");
            tree.add(txi, allocator, &probe.key()).unwrap();
        }
        assert_eq!(tree.num_elems(), 4);
        for w in words {
            let probe = TransientStringKey::new(w, "");
            assert!(tree.find(&probe.key()).is_some(), "missing {w}");
        }
        // Removing a spilled key also tears down its remainder backing.
        let probe = TransientStringKey::new("a-rather-long-key-with-remainder", "");
        tree.remove(txi, allocator, &probe.key()).unwrap();
        assert!(tree.find(&probe.key()).is_none());
        assert_eq!(tree.num_elems(), 3);
        tx.commit().unwrap();
    }
}
