//! Singly-linked list in persistent memory.
//!
//! Used as the per-key payload of the property indices (entity addresses)
//! and for edge adjacency pairs. The list head lives wherever its owner
//! embeds it; nodes come from the generic allocator.

use std::marker::PhantomData;
use std::mem::offset_of;

use crate::alloc::Allocator;
use crate::error::Result;
use crate::region::pm;
use crate::tx::TransactionImpl;

/// Embedded persistent list head: first node plus element count.
#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct ListHead {
    head: u64,
    num_elems: u64,
}

/// Size of an embedded list head.
pub(crate) const LIST_HEAD_SIZE: u64 = std::mem::size_of::<ListHead>() as u64;

#[repr(C)]
#[derive(Copy, Clone)]
struct ListNode<T> {
    value: T,
    next: u64,
}

/// Handle to a list whose head is embedded at `addr`.
pub(crate) struct List<T> {
    addr: u64,
    _t: PhantomData<T>,
}

impl<T: Copy + PartialEq> List<T> {
    pub(crate) fn at(addr: u64) -> List<T> {
        List {
            addr,
            _t: PhantomData,
        }
    }

    /// Zeroes a freshly embedded head. Flushed with the owning record.
    pub(crate) fn init(addr: u64) {
        pm::write(
            addr,
            ListHead {
                head: pm::NULL,
                num_elems: 0,
            },
        );
    }

    fn head(&self) -> u64 {
        pm::read(self.addr + offset_of!(ListHead, head) as u64)
    }

    pub(crate) fn num_elems(&self) -> u64 {
        pm::read(self.addr + offset_of!(ListHead, num_elems) as u64)
    }

    pub(crate) fn node_size() -> u64 {
        std::mem::size_of::<ListNode<T>>() as u64
    }

    /// Prepends a node and returns its address.
    pub(crate) fn add(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        value: T,
    ) -> Result<u64> {
        let node = allocator.alloc(tx, Self::node_size())?;
        pm::write(
            node,
            ListNode {
                value,
                next: self.head(),
            },
        );
        // Fresh allocation: flushed, not logged.
        tx.flush(node, Self::node_size());

        // Head pointer and count are contiguous; one log covers both.
        tx.log(self.addr, LIST_HEAD_SIZE as usize)?;
        pm::write(self.addr + offset_of!(ListHead, head) as u64, node);
        pm::write(
            self.addr + offset_of!(ListHead, num_elems) as u64,
            self.num_elems() + 1,
        );
        Ok(node)
    }

    /// Removes the first node matching `pred`, notifying live iterators
    /// before unlinking.
    pub(crate) fn remove_where(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        pred: impl Fn(&T) -> bool,
    ) -> Result<bool> {
        let mut prev = pm::NULL;
        let mut temp = self.head();
        while temp != pm::NULL {
            let node: ListNode<T> = pm::read(temp);
            if pred(&node.value) {
                tx.iterator_remove_notify(temp);
                if prev == pm::NULL {
                    tx.log(self.addr, LIST_HEAD_SIZE as usize)?;
                    pm::write(self.addr + offset_of!(ListHead, head) as u64, node.next);
                    pm::write(
                        self.addr + offset_of!(ListHead, num_elems) as u64,
                        self.num_elems() - 1,
                    );
                } else {
                    tx.write(prev + offset_of!(ListNode<T>, next) as u64, node.next)?;
                    tx.write(
                        self.addr + offset_of!(ListHead, num_elems) as u64,
                        self.num_elems() - 1,
                    )?;
                }
                allocator.free(tx, temp, Self::node_size());
                return Ok(true);
            }
            prev = temp;
            temp = node.next;
        }
        Ok(false)
    }

    /// Removes the first node equal to `value`.
    pub(crate) fn remove(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        value: T,
    ) -> Result<bool> {
        self.remove_where(tx, allocator, |v| *v == value)
    }

    /// Address of the first node, for cursors.
    pub(crate) fn first(&self) -> u64 {
        self.head()
    }

    pub(crate) fn find(&self, value: T) -> Option<u64> {
        let mut temp = self.head();
        while temp != pm::NULL {
            let node: ListNode<T> = pm::read(temp);
            if node.value == value {
                return Some(temp);
            }
            temp = node.next;
        }
        None
    }
}

/// Value stored at a list node.
pub(crate) fn node_value<T: Copy>(node: u64) -> T {
    pm::read::<ListNode<T>>(node).value
}

/// Successor of a list node, or null.
pub(crate) fn node_next<T: Copy>(node: u64) -> u64 {
    pm::read::<ListNode<T>>(node).next
}
