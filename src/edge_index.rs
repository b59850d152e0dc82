//! Per-node adjacency: tag → list of (edge, other endpoint).
//!
//! Each node owns two of these, one per direction. The tag directory is a
//! small chunk list; the per-tag pair list is walked in insertion order.

use crate::alloc::Allocator;
use crate::error::Result;
use crate::index::chunklist::{ChunkList, CHUNKLIST_HEAD_SIZE};
use crate::index::list::{self, List, ListHead};
use crate::region::pm;
use crate::tx::TransactionImpl;
use crate::types::StringId;

/// One adjacency entry: the edge and the node at its far end.
#[repr(C)]
#[derive(Copy, Clone, PartialEq)]
pub(crate) struct EdgeNodePair {
    pub(crate) edge: u64,
    pub(crate) node: u64,
}

const EDGE_TAG_CHUNK_BYTES: u32 = 128;

type TagMap = ChunkList<StringId, ListHead, EDGE_TAG_CHUNK_BYTES>;

/// Handle to one direction's adjacency directory.
#[derive(Copy, Clone, Debug)]
pub(crate) struct EdgeIndex {
    addr: u64,
}

impl EdgeIndex {
    pub(crate) fn at(addr: u64) -> EdgeIndex {
        EdgeIndex { addr }
    }

    /// Allocates an empty directory and returns its address.
    pub(crate) fn create(tx: &TransactionImpl, allocator: &Allocator) -> Result<u64> {
        let addr = allocator.alloc(tx, CHUNKLIST_HEAD_SIZE)?;
        TagMap::init(addr);
        tx.flush(addr, CHUNKLIST_HEAD_SIZE);
        Ok(addr)
    }

    /// Frees the directory. Entries are already gone (edge removal drains
    /// them); any lingering emptied head chunk goes with the head.
    pub(crate) fn free(tx: &TransactionImpl, allocator: &Allocator, addr: u64) -> Result<()> {
        TagMap::at(addr).drain_chunks(tx, allocator)?;
        allocator.free(tx, addr, CHUNKLIST_HEAD_SIZE);
        Ok(())
    }

    fn tags(&self) -> TagMap {
        TagMap::at(self.addr)
    }

    pub(crate) fn add(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        tag: StringId,
        edge: u64,
        other: u64,
    ) -> Result<()> {
        let list_addr = self.tags().add(tx, allocator, tag)?;
        List::<EdgeNodePair>::at(list_addr).add(tx, allocator, EdgeNodePair { edge, node: other })?;
        Ok(())
    }

    /// Removes the entry for `edge` under `tag`; an emptied tag leaves the
    /// directory.
    pub(crate) fn remove(
        &self,
        tx: &TransactionImpl,
        allocator: &Allocator,
        tag: StringId,
        edge: u64,
    ) -> Result<()> {
        if let Some(list_addr) = self.tags().find(tx, tag)? {
            let list = List::<EdgeNodePair>::at(list_addr);
            list.remove_where(tx, allocator, |pair| pair.edge == edge)?;
            if list.num_elems() == 0 {
                self.tags().remove(tx, allocator, tag)?;
            }
        }
        Ok(())
    }

    /// First pair under `tag`, or null.
    pub(crate) fn first(&self, tx: &TransactionImpl, tag: StringId) -> Result<u64> {
        Ok(match self.tags().find(tx, tag)? {
            Some(list_addr) => List::<EdgeNodePair>::at(list_addr).first(),
            None => pm::NULL,
        })
    }

    /// Tags present in this direction, with the first pair of each.
    pub(crate) fn tag_heads(&self, tx: &TransactionImpl) -> Result<Vec<(StringId, u64)>> {
        let mut out = Vec::new();
        for (tag, list_addr) in self.tags().entries(tx)? {
            let head = List::<EdgeNodePair>::at(list_addr).first();
            if head != pm::NULL {
                out.push((tag, head));
            }
        }
        Ok(out)
    }

    /// Whether any adjacency entry exists under any tag.
    pub(crate) fn is_empty(&self, tx: &TransactionImpl) -> Result<bool> {
        Ok(self.tags().num_elems(tx)? == 0)
    }
}

/// Pair stored at an adjacency list node.
pub(crate) fn pair_at(node: u64) -> EdgeNodePair {
    list::node_value::<EdgeNodePair>(node)
}

/// Next adjacency list node, or null.
pub(crate) fn pair_next(node: u64) -> u64 {
    list::node_next::<EdgeNodePair>(node)
}
