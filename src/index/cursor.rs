//! Range cursors over the balanced-tree indices.
//!
//! A cursor is an explicit state machine: a stack of ancestors still to
//! visit, the current tree node, and a position in that node's entity
//! list. Mutations publish events through the transaction; a cursor whose
//! current entity is removed advances and raises a vacant flag, and a
//! rebalance makes it recompute its stack from the current key.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::region::pm;
use crate::tx::{IndexIterSink, LockDomain, TransactionImpl};

use super::avl::AvlTree;
use super::keys::TreeKey;
use super::list::{self, List};

/// One comparison bound: a key plus whether the bound itself is included.
#[derive(Copy, Clone)]
struct CompVal<K> {
    val: K,
    incl: bool,
}

impl<K: TreeKey> CompVal<K> {
    fn new(val: K, incl: bool) -> CompVal<K> {
        CompVal { val, incl }
    }

    fn equals(&self, other: &K) -> bool {
        self.incl && self.val.cmp_key(other) == std::cmp::Ordering::Equal
    }

    fn lessthan(&self, other: &K) -> bool {
        self.val.cmp_key(other) == std::cmp::Ordering::Less
    }

    fn lessthanequal(&self, other: &K) -> bool {
        self.lessthan(other) || self.equals(other)
    }

    fn greaterthan(&self, other: &K) -> bool {
        self.val.cmp_key(other) == std::cmp::Ordering::Greater
    }

    fn greaterthanequal(&self, other: &K) -> bool {
        self.greaterthan(other) || self.equals(other)
    }
}

type Path = SmallVec<[u64; 16]>;

fn lock(tx: &TransactionImpl, node: u64) -> Result<()> {
    tx.acquire_lock(LockDomain::Index, node, false)
}

// Stack-seeding traversals. Each pushes, in descent order, every node whose
// subtree may still yield results, so popping walks the keys in order.

fn find_start<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmin: &CompVal<K>,
    cmax: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if cmin.lessthan(&key) {
        if cmax.greaterthanequal(&key) {
            path.push(root);
        }
        find_start(tx, AvlTree::<K>::left(root), cmin, cmax, path)
    } else if cmin.equals(&key) {
        path.push(root);
        Ok(())
    } else {
        find_start(tx, AvlTree::<K>::right(root), cmin, cmax, path)
    }
}

// Everything in this subtree is past the minimum already; only the maximum
// still needs checking.
fn add_right_tree<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmax: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if cmax.greaterthanequal(&AvlTree::<K>::key(root)) {
        path.push(root);
    }
    add_right_tree(tx, AvlTree::<K>::left(root), cmax, path)
}

fn find_start_min<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmax: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if cmax.greaterthanequal(&AvlTree::<K>::key(root)) {
        path.push(root);
    }
    find_start_min(tx, AvlTree::<K>::left(root), cmax, path)
}

fn find_start_max<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmin: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if cmin.lessthan(&key) {
        path.push(root);
        find_start_max(tx, AvlTree::<K>::left(root), cmin, path)
    } else if cmin.equals(&key) {
        path.push(root);
        Ok(())
    } else {
        find_start_max(tx, AvlTree::<K>::right(root), cmin, path)
    }
}

fn add_full_right_tree<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    path.push(root);
    add_full_right_tree::<K>(tx, AvlTree::<K>::left(root), path)
}

fn add_nodes_neq<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    neq: &K,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if neq.cmp_key(&AvlTree::<K>::key(root)) != std::cmp::Ordering::Equal {
        path.push(root);
    } else {
        // The excluded key is unique, so its right subtree goes on the
        // path without further checks.
        let right = AvlTree::<K>::right(root);
        if right != pm::NULL {
            lock(tx, right)?;
            path.push(right);
        }
    }
    add_nodes_neq(tx, AvlTree::<K>::left(root), neq, path)
}

fn find_node_neq<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cur: &CompVal<K>,
    neq: &K,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if neq.cmp_key(&key) == std::cmp::Ordering::Equal {
        if cur.lessthan(&key) {
            find_start_max(tx, AvlTree::<K>::left(root), cur, path)
        } else if cur.equals(&key) {
            add_full_right_tree::<K>(tx, AvlTree::<K>::right(root), path)
        } else {
            find_start_max(tx, AvlTree::<K>::right(root), cur, path)
        }
    } else {
        path.push(root);
        if cur.lessthan(&key) {
            find_node_neq(tx, AvlTree::<K>::left(root), cur, neq, path)
        } else if cur.greaterthan(&key) {
            find_node_neq(tx, AvlTree::<K>::right(root), cur, neq, path)
        } else {
            Ok(())
        }
    }
}

// Reverse-direction variants.

fn find_start_reverse<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmin: &CompVal<K>,
    cmax: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if cmax.greaterthan(&key) {
        if cmin.lessthanequal(&key) {
            path.push(root);
        }
        find_start_reverse(tx, AvlTree::<K>::right(root), cmin, cmax, path)
    } else if cmax.equals(&key) {
        path.push(root);
        Ok(())
    } else {
        find_start_reverse(tx, AvlTree::<K>::left(root), cmin, cmax, path)
    }
}

fn find_start_max_reverse<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmin: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if cmin.lessthanequal(&AvlTree::<K>::key(root)) {
        path.push(root);
    }
    find_start_max_reverse(tx, AvlTree::<K>::right(root), cmin, path)
}

fn add_left_tree<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmin: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if cmin.lessthanequal(&AvlTree::<K>::key(root)) {
        path.push(root);
    }
    add_left_tree(tx, AvlTree::<K>::right(root), cmin, path)
}

fn find_start_min_reverse<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cmax: &CompVal<K>,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if cmax.greaterthan(&key) {
        path.push(root);
        find_start_min_reverse(tx, AvlTree::<K>::right(root), cmax, path)
    } else if cmax.equals(&key) {
        path.push(root);
        Ok(())
    } else {
        find_start_min_reverse(tx, AvlTree::<K>::left(root), cmax, path)
    }
}

fn add_full_left_tree<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    path.push(root);
    add_full_left_tree::<K>(tx, AvlTree::<K>::right(root), path)
}

fn add_nodes_neq_reverse<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    neq: &K,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    if neq.cmp_key(&AvlTree::<K>::key(root)) != std::cmp::Ordering::Equal {
        path.push(root);
    } else {
        let left = AvlTree::<K>::left(root);
        if left != pm::NULL {
            lock(tx, left)?;
            path.push(left);
        }
    }
    add_nodes_neq_reverse(tx, AvlTree::<K>::right(root), neq, path)
}

fn find_node_neq_reverse<K: TreeKey>(
    tx: &TransactionImpl,
    root: u64,
    cur: &CompVal<K>,
    neq: &K,
    path: &mut Path,
) -> Result<()> {
    if root == pm::NULL {
        return Ok(());
    }
    lock(tx, root)?;
    let key = AvlTree::<K>::key(root);
    if neq.cmp_key(&key) == std::cmp::Ordering::Equal {
        if cur.greaterthan(&key) {
            find_start_min_reverse(tx, AvlTree::<K>::right(root), cur, path)
        } else if cur.equals(&key) {
            add_full_left_tree::<K>(tx, AvlTree::<K>::left(root), path)
        } else {
            find_start_min_reverse(tx, AvlTree::<K>::left(root), cur, path)
        }
    } else {
        path.push(root);
        if cur.greaterthan(&key) {
            find_node_neq_reverse(tx, AvlTree::<K>::right(root), cur, neq, path)
        } else if cur.lessthan(&key) {
            find_node_neq_reverse(tx, AvlTree::<K>::left(root), cur, neq, path)
        } else {
            Ok(())
        }
    }
}

/// Which family of iteration this cursor performs, with its bounds.
enum CursorKind<K> {
    Eq,
    Range { cmax: CompVal<K> },
    RangeNomax,
    Neq { neq: K },
    RangeReverse { cmin: CompVal<K> },
    RangeNomin,
    NeqReverse { neq: K },
}

/// The cursor state machine.
pub(crate) struct IndexCursor<K: TreeKey> {
    tree_pm: u64,
    kind: CursorKind<K>,
    curr: u64,
    path: Path,
    list_pos: u64,
    vacant: bool,
}

impl<K: TreeKey> IndexCursor<K> {
    fn tree(&self) -> AvlTree<K> {
        AvlTree::at(self.tree_pm)
    }

    fn finish_init(&mut self) {
        if let Some(curr) = self.path.pop() {
            self.curr = curr;
            self.list_pos = List::<u64>::at(AvlTree::<K>::value_addr(curr)).first();
        }
    }

    fn seed_next(&mut self, tx: &TransactionImpl) -> Result<()> {
        match &self.kind {
            CursorKind::Eq => Ok(()),
            CursorKind::Range { cmax } => {
                add_right_tree(tx, AvlTree::<K>::right(self.curr), cmax, &mut self.path)
            }
            CursorKind::RangeNomax => {
                add_full_right_tree::<K>(tx, AvlTree::<K>::right(self.curr), &mut self.path)
            }
            CursorKind::Neq { neq } => {
                add_nodes_neq(tx, AvlTree::<K>::right(self.curr), neq, &mut self.path)
            }
            CursorKind::RangeReverse { cmin } => {
                add_left_tree(tx, AvlTree::<K>::left(self.curr), cmin, &mut self.path)
            }
            CursorKind::RangeNomin => {
                add_full_left_tree::<K>(tx, AvlTree::<K>::left(self.curr), &mut self.path)
            }
            CursorKind::NeqReverse { neq } => {
                add_nodes_neq_reverse(tx, AvlTree::<K>::left(self.curr), neq, &mut self.path)
            }
        }
    }

    fn reseek(&mut self, tx: &TransactionImpl) -> Result<()> {
        let cur = CompVal::new(AvlTree::<K>::key(self.curr), true);
        let root = self.tree().root();
        match &self.kind {
            CursorKind::Eq => Ok(()),
            CursorKind::Range { cmax } => find_start(tx, root, &cur, cmax, &mut self.path),
            CursorKind::RangeNomax => find_start_max(tx, root, &cur, &mut self.path),
            CursorKind::Neq { neq } => find_node_neq(tx, root, &cur, neq, &mut self.path),
            CursorKind::RangeReverse { cmin } => {
                find_start_reverse(tx, root, cmin, &cur, &mut self.path)
            }
            CursorKind::RangeNomin => find_start_min_reverse(tx, root, &cur, &mut self.path),
            CursorKind::NeqReverse { neq } => {
                find_node_neq_reverse(tx, root, &cur, neq, &mut self.path)
            }
        }
    }

    fn valid(&self) -> bool {
        self.vacant || self.list_pos != pm::NULL
    }

    fn next_inner(&mut self, tx: &TransactionImpl) -> Result<bool> {
        // A vacant cursor already advanced when its entity was removed.
        if self.vacant {
            self.vacant = false;
            return Ok(self.valid());
        }

        if self.list_pos != pm::NULL {
            let next = list::node_next::<u64>(self.list_pos);
            if next != pm::NULL {
                self.list_pos = next;
                return Ok(true);
            }
        }

        // Current list exhausted; move to the next tree node.
        if self.curr == pm::NULL {
            self.list_pos = pm::NULL;
            return Ok(false);
        }
        self.seed_next(tx)?;
        match self.path.pop() {
            Some(curr) => {
                self.curr = curr;
                self.list_pos = List::<u64>::at(AvlTree::<K>::value_addr(curr)).first();
                Ok(true)
            }
            None => {
                self.list_pos = pm::NULL;
                Ok(false)
            }
        }
    }

    fn get(&self) -> Result<u64> {
        if self.vacant {
            return Err(GraphError::VacantIterator);
        }
        if self.list_pos == pm::NULL {
            return Err(GraphError::NullIterator);
        }
        Ok(list::node_value::<u64>(self.list_pos))
    }
}

/// Shared cell wrapping a cursor so the transaction can notify it while the
/// caller holds the iterator.
pub(crate) struct CursorCell<K: TreeKey>(RefCell<IndexCursor<K>>);

impl<K: TreeKey> IndexIterSink for CursorCell<K> {
    fn remove_notify(&self, list_node: u64) {
        let mut cursor = self.0.borrow_mut();
        if cursor.list_pos == list_node {
            // Advance past the doomed entity, then flag the vacancy.
            cursor.vacant = false;
            if let Ok(tx) = TransactionImpl::current() {
                if let Err(err) = cursor.next_inner(tx) {
                    debug!(%err, "cursor advance during remove notification failed");
                    cursor.list_pos = pm::NULL;
                }
            }
            cursor.vacant = true;
        }
    }

    fn rebalance_notify(&self, tree: u64) {
        let mut cursor = self.0.borrow_mut();
        if tree == cursor.tree_pm && cursor.curr != pm::NULL && cursor.list_pos != pm::NULL {
            cursor.path.clear();
            if let Ok(tx) = TransactionImpl::current() {
                if let Err(err) = cursor.reseek(tx) {
                    debug!(%err, "cursor reseek after rebalance failed");
                    return;
                }
            }
            if let Some(curr) = cursor.path.pop() {
                cursor.curr = curr;
            }
        }
    }
}

/// Type-erased view of a cursor for the public iterators.
pub(crate) trait ObjCursor {
    /// Whether the cursor refers to an entity (or a vacant slot).
    fn valid(&self) -> bool;
    /// Advances; returns whether an entity is available.
    fn advance(&self) -> Result<bool>;
    /// The current entity address.
    fn get(&self) -> Result<u64>;
}

impl<K: TreeKey> ObjCursor for CursorCell<K> {
    fn valid(&self) -> bool {
        self.0.borrow().valid()
    }

    fn advance(&self) -> Result<bool> {
        let tx = TransactionImpl::current()?;
        self.0.borrow_mut().next_inner(tx)
    }

    fn get(&self) -> Result<u64> {
        self.0.borrow().get()
    }
}

fn build<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    kind: CursorKind<K>,
    seed: impl FnOnce(&TransactionImpl, u64, &mut Path) -> Result<()>,
) -> Result<Rc<CursorCell<K>>> {
    let mut cursor = IndexCursor {
        tree_pm,
        kind,
        curr: pm::NULL,
        path: Path::new(),
        list_pos: pm::NULL,
        vacant: false,
    };
    let root = AvlTree::<K>::at(tree_pm).root();
    seed(tx, root, &mut cursor.path)?;
    cursor.finish_init();

    let cell = Rc::new(CursorCell(RefCell::new(cursor)));
    let sink: Rc<dyn IndexIterSink> = cell.clone();
    tx.register_index_iter(Rc::downgrade(&sink));
    Ok(cell)
}

/// Cursor over every key, forward or reverse.
pub(crate) fn cursor_any<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    reverse: bool,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    if reverse {
        build(tx, tree_pm, CursorKind::RangeNomin, |tx, root, path| {
            add_full_left_tree::<K>(tx, root, path)
        })
    } else {
        build(tx, tree_pm, CursorKind::RangeNomax, |tx, root, path| {
            add_full_right_tree::<K>(tx, root, path)
        })
    }
}

/// Cursor over one key's entity list.
pub(crate) fn cursor_eq<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    key: K,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    let cell = build(tx, tree_pm, CursorKind::Eq, |_tx, _root, _path| Ok(()))?;
    {
        let mut cursor = cell.0.borrow_mut();
        if let Some(value_addr) = AvlTree::<K>::at(tree_pm).find(&key) {
            cursor.list_pos = List::<u64>::at(value_addr).first();
        }
    }
    Ok(cell)
}

/// Cursor over every key except one.
pub(crate) fn cursor_ne<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    key: K,
    reverse: bool,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    if reverse {
        build(
            tx,
            tree_pm,
            CursorKind::NeqReverse { neq: key },
            |tx, root, path| add_nodes_neq_reverse(tx, root, &key, path),
        )
    } else {
        build(tx, tree_pm, CursorKind::Neq { neq: key }, |tx, root, path| {
            add_nodes_neq(tx, root, &key, path)
        })
    }
}

/// Cursor for `< key` / `<= key`: from the tree minimum up to the bound.
pub(crate) fn cursor_below<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    key: K,
    incl: bool,
    reverse: bool,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    let cmax = CompVal::new(key, incl);
    if reverse {
        build(tx, tree_pm, CursorKind::RangeNomin, |tx, root, path| {
            find_start_min_reverse(tx, root, &cmax, path)
        })
    } else {
        build(tx, tree_pm, CursorKind::Range { cmax }, |tx, root, path| {
            find_start_min(tx, root, &cmax, path)
        })
    }
}

/// Cursor for `> key` / `>= key`: from the bound to the tree maximum.
pub(crate) fn cursor_above<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    key: K,
    incl: bool,
    reverse: bool,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    let cmin = CompVal::new(key, incl);
    if reverse {
        build(
            tx,
            tree_pm,
            CursorKind::RangeReverse { cmin },
            |tx, root, path| find_start_max_reverse(tx, root, &cmin, path),
        )
    } else {
        build(tx, tree_pm, CursorKind::RangeNomax, |tx, root, path| {
            find_start_max(tx, root, &cmin, path)
        })
    }
}

/// Cursor over `[min, max]` with open or closed endpoints.
pub(crate) fn cursor_range<K: TreeKey + 'static>(
    tx: &TransactionImpl,
    tree_pm: u64,
    min: K,
    max: K,
    incl_min: bool,
    incl_max: bool,
    reverse: bool,
) -> Result<Rc<CursorCell<K>>> {
    tx.acquire_lock(LockDomain::Index, tree_pm, false)?;
    let cmin = CompVal::new(min, incl_min);
    let cmax = CompVal::new(max, incl_max);
    if reverse {
        build(
            tx,
            tree_pm,
            CursorKind::RangeReverse { cmin },
            |tx, root, path| find_start_reverse(tx, root, &cmin, &cmax, path),
        )
    } else {
        build(tx, tree_pm, CursorKind::Range { cmax }, |tx, root, path| {
            find_start(tx, root, &cmin, &cmax, path)
        })
    }
}
