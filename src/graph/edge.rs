//! Edge records and operations.

use crate::error::Result;
use crate::graph::{GraphImpl, NodeRef};
use crate::index::IndexKind;
use crate::props::{PropertyIterator, PropertyList};
use crate::region::pm;
use crate::tx::{LockDomain, TransactionImpl};
use crate::types::{Property, StringId};

const SRC_OFFSET: u64 = 0;
const DEST_OFFSET: u64 = 8;
const TAG_OFFSET: u64 = 16;
/// Property chain starts right after the tag.
pub(crate) const EDGE_PROPS_OFFSET: u64 = 18;

/// Handle to one directed edge. Valid while the edge exists; operations
/// require an active transaction on the calling thread.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct EdgeRef {
    addr: u64,
}

pub(crate) fn init_edge(
    tx: &TransactionImpl,
    db: &GraphImpl,
    addr: u64,
    src: u64,
    dest: u64,
    tag: StringId,
) -> Result<()> {
    pm::write(addr + SRC_OFFSET, src);
    pm::write(addr + DEST_OFFSET, dest);
    pm::write_unaligned(addr + TAG_OFFSET, tag.0);
    PropertyList::at(addr + EDGE_PROPS_OFFSET).init(db.edge_size() - EDGE_PROPS_OFFSET as u32);
    // Fresh slot: flushed, not logged.
    tx.flush(addr, db.edge_size() as u64);
    Ok(())
}

/// Tears down an edge already detached from its endpoints and indices.
pub(crate) fn destroy_edge(_tx: &TransactionImpl, _db: &GraphImpl, addr: u64) -> Result<()> {
    let edge = EdgeRef::at(addr);
    edge.props()
        .remove_all_properties(IndexKind::Edge, edge.tag_raw(), addr)
}

impl EdgeRef {
    pub(crate) fn at(addr: u64) -> EdgeRef {
        EdgeRef { addr }
    }

    pub(crate) fn addr(&self) -> u64 {
        self.addr
    }

    pub(crate) fn tag_raw(&self) -> StringId {
        StringId(pm::read_unaligned(self.addr + TAG_OFFSET))
    }

    pub(crate) fn source_addr(&self) -> u64 {
        pm::read(self.addr + SRC_OFFSET)
    }

    pub(crate) fn dest_addr(&self) -> u64 {
        pm::read(self.addr + DEST_OFFSET)
    }

    pub(crate) fn props(&self) -> PropertyList {
        PropertyList::at(self.addr + EDGE_PROPS_OFFSET)
    }

    /// The edge's tag id (0 when untagged).
    pub fn tag(&self) -> Result<StringId> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        Ok(self.tag_raw())
    }

    /// The edge's source node.
    pub fn source(&self) -> Result<NodeRef> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        Ok(NodeRef::at(self.source_addr()))
    }

    /// The edge's destination node.
    pub fn destination(&self) -> Result<NodeRef> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        Ok(NodeRef::at(self.dest_addr()))
    }

    /// The property value for `id`, or `None`.
    pub fn check_property(&self, id: StringId) -> Result<Option<Property>> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        self.props().check_property(id)
    }

    /// The property value for `id`; `PropertyNotFound` when absent.
    pub fn get_property(&self, id: StringId) -> Result<Property> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        self.props().get_property(id)
    }

    /// Sets `id` to `value`, replacing any prior value and updating every
    /// index covering (tag, id).
    pub fn set_property(&self, id: StringId, value: &Property) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, true)?;
        self.props()
            .set_property(IndexKind::Edge, self.tag_raw(), self.addr, id, value)
    }

    /// Removes `id` if present.
    pub fn remove_property(&self, id: StringId) -> Result<()> {
        let tx = TransactionImpl::current()?;
        tx.check_read_write()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, true)?;
        self.props()
            .remove_property(IndexKind::Edge, self.tag_raw(), self.addr, id)
    }

    /// Iterator over this edge's properties.
    pub fn properties(&self) -> Result<PropertyIterator> {
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, self.addr, false)?;
        self.props().iter()
    }
}
