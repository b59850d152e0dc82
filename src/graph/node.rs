//! Node records and operations.
//!
//! A node record holds its two adjacency directories, its tag, and its
//! property chain inline; the record's slot index is its id.

use crate::edge_index::EdgeIndex;
use crate::error::Result;
use crate::graph::GraphImpl;
use crate::index::IndexKind;
use crate::props::{PropertyIterator, PropertyList};
use crate::region::pm;
use crate::tx::{LockDomain, TransactionImpl};
use crate::types::{Direction, Property, StringId};

const OUT_EDGES_OFFSET: u64 = 0;
const IN_EDGES_OFFSET: u64 = 8;
const TAG_OFFSET: u64 = 16;
/// Property chain starts right after the tag.
pub(crate) const NODE_PROPS_OFFSET: u64 = 18;

/// Handle to one node. Valid while the node exists; operations require an
/// active transaction on the calling thread.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct NodeRef {
    addr: u64,
}

pub(crate) fn init_node(
    tx: &TransactionImpl,
    db: &GraphImpl,
    addr: u64,
    tag: StringId,
) -> Result<()> {
    let out = EdgeIndex::create(tx, db.allocator())?;
    let inn = EdgeIndex::create(tx, db.allocator())?;
    pm::write(addr + OUT_EDGES_OFFSET, out);
    pm::write(addr + IN_EDGES_OFFSET, inn);
    pm::write_unaligned(addr + TAG_OFFSET, tag.0);
    PropertyList::at(addr + NODE_PROPS_OFFSET).init(db.node_size() - NODE_PROPS_OFFSET as u32);
    // Fresh slot: flushed, not logged.
    tx.flush(addr, db.node_size() as u64);
    Ok(())
}

/// Tears down a node that has already lost its edges and index entries.
pub(crate) fn destroy_node(tx: &TransactionImpl, db: &GraphImpl, addr: u64) -> Result<()> {
    let node = NodeRef::at(addr);
    if cfg!(debug_assertions) {
        debug_assert!(node.out_index().is_empty(tx)?);
        debug_assert!(node.in_index().is_empty(tx)?);
    }
    node.props()
        .remove_all_properties(IndexKind::Node, node.tag_raw(), addr)?;
    EdgeIndex::free(tx, db.allocator(), pm::read(addr + OUT_EDGES_OFFSET))?;
    EdgeIndex::free(tx, db.allocator(), pm::read(addr + IN_EDGES_OFFSET))?;
    Ok(())
}

/// Records one endpoint's half of a new edge.
pub(crate) fn add_edge_half(
    tx: &TransactionImpl,
    db: &GraphImpl,
    node: u64,
    edge: u64,
    other: u64,
    tag: StringId,
    outgoing: bool,
) -> Result<()> {
    tx.acquire_lock(LockDomain::Node, node, true)?;
    let offset = if outgoing {
        OUT_EDGES_OFFSET
    } else {
        IN_EDGES_OFFSET
    };
    EdgeIndex::at(pm::read(node + offset)).add(tx, db.allocator(), tag, edge, other)
}

/// Detaches one endpoint's half of a dying edge.
pub(crate) fn remove_edge_half(
    tx: &TransactionImpl,
    db: &GraphImpl,
    node: u64,
    edge: u64,
    tag: StringId,
    outgoing: bool,
) -> Result<()> {
    tx.acquire_lock(LockDomain::Node, node, true)?;
    let offset = if outgoing {
        OUT_EDGES_OFFSET
    } else {
        IN_EDGES_OFFSET
    };
    EdgeIndex::at(pm::read(node + offset)).remove(tx, db.allocator(), tag, edge)
}

impl NodeRef {
    pub(crate) fn at(addr: u64) -> NodeRef {
        NodeRef { addr }
    }

    pub(crate) fn addr(&self) -> u64 {
        self.addr
    }

    pub(crate) fn tag_raw(&self) -> StringId {
        StringId(pm::read_unaligned(self.addr + TAG_OFFSET))
    }

    pub(crate) fn out_index(&self) -> EdgeIndex {
        EdgeIndex::at(pm::read(self.addr + OUT_EDGES_OFFSET))
    }

    pub(crate) fn in_index(&self) -> EdgeIndex {
        EdgeIndex::at(pm::read(self.addr + IN_EDGES_OFFSET))
    }

    pub(crate) fn props(&self) -> PropertyList {
        PropertyList::at(self.addr + NODE_PROPS_OFFSET)
    }

    /// The node's tag id (0 when untagged).
    pub fn tag(&self) -> Result<StringId> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        Ok(self.tag_raw())
    }

    /// The property value for `id`, or `None`.
    pub fn check_property(&self, id: StringId) -> Result<Option<Property>> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        self.props().check_property(id)
    }

    /// The property value for `id`; `PropertyNotFound` when absent.
    pub fn get_property(&self, id: StringId) -> Result<Property> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        self.props().get_property(id)
    }

    /// Sets `id` to `value`, replacing any prior value and updating every
    /// index covering (tag, id).
    pub fn set_property(&self, id: StringId, value: &Property) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Node, self.addr, true)?;
        self.props()
            .set_property(IndexKind::Node, self.tag_raw(), self.addr, id, value)
    }

    /// Removes `id` if present.
    pub fn remove_property(&self, id: StringId) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Node, self.addr, true)?;
        self.props()
            .remove_property(IndexKind::Node, self.tag_raw(), self.addr, id)
    }

    /// Iterator over this node's properties.
    pub fn properties(&self) -> Result<PropertyIterator> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        self.props().iter()
    }

    /// Iterator over this node's edges: incoming first, then outgoing;
    /// within a direction, tags in directory order, edges in insertion
    /// order. `tag` narrows to one edge tag.
    pub fn edges(&self, dir: Direction, tag: Option<StringId>) -> Result<crate::iter::EdgeIterator> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        crate::iter::EdgeIterator::node_edges(tx, *self, dir, tag)
    }

    /// The first neighbor in `dir` (optionally restricted to an edge tag);
    /// `NullIterator` when there is none.
    pub fn neighbor(&self, dir: Direction, tag: Option<StringId>) -> Result<NodeRef> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, self.addr, false)?;
        let tag = tag.unwrap_or_default();

        if matches!(dir, Direction::Outgoing | Direction::Any) {
            let pos = if tag.is_none() {
                first_any_tag(tx, self.out_index())?
            } else {
                self.out_index().first(tx, tag)?
            };
            if pos != pm::NULL {
                let pair = crate::edge_index::pair_at(pos);
                tx.acquire_lock(LockDomain::Node, pair.node, false)?;
                return Ok(NodeRef::at(pair.node));
            }
        }
        if matches!(dir, Direction::Incoming | Direction::Any) {
            let pos = if tag.is_none() {
                first_any_tag(tx, self.in_index())?
            } else {
                self.in_index().first(tx, tag)?
            };
            if pos != pm::NULL {
                let pair = crate::edge_index::pair_at(pos);
                tx.acquire_lock(LockDomain::Node, pair.node, false)?;
                return Ok(NodeRef::at(pair.node));
            }
        }
        Err(crate::error::GraphError::NullIterator)
    }
}

fn first_any_tag(tx: &TransactionImpl, index: EdgeIndex) -> Result<u64> {
    Ok(index
        .tag_heads(tx)?
        .first()
        .map(|&(_, head)| head)
        .unwrap_or(pm::NULL))
}
