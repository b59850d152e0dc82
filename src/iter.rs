//! Node and edge iterators.
//!
//! Iterators are explicit state machines: a current position plus an
//! `advance` step. Index-backed iterators delegate to a tree cursor;
//! table-scan iterators walk a fixed allocator skipping freed slots;
//! filtered iterators wrap another iterator and apply a property
//! predicate. An iterator whose current target disappears raises
//! `VacantIterator` on dereference and recovers on the next advance.

use std::cell::RefCell;
use std::rc::Rc;

use crate::alloc::fixed::FixedAllocator;
use crate::edge_index::{self, EdgeIndex};
use crate::error::{GraphError, Result};
use crate::graph::{EdgeRef, NodeRef};
use crate::index::cursor::ObjCursor;
use crate::region::pm;
use crate::tx::{IndexIterSink, LockDomain, TransactionImpl};
use crate::types::{Direction, PropertyPredicate, StringId};

struct TableScan {
    table: FixedAllocator,
    cur: u64,
}

impl TableScan {
    fn new(table: FixedAllocator) -> TableScan {
        let mut scan = TableScan {
            table,
            cur: table.begin(),
        };
        scan.settle();
        scan
    }

    // Skip freed slots; park at null past the tail.
    fn settle(&mut self) {
        while self.cur != pm::NULL && self.cur < self.table.end() && self.table.is_free(self.cur) {
            self.cur = self.table.next(self.cur);
        }
        if self.cur >= self.table.end() {
            self.cur = pm::NULL;
        }
    }

    fn valid(&self) -> bool {
        self.cur != pm::NULL
    }

    fn advance(&mut self) -> bool {
        if self.cur == pm::NULL {
            return false;
        }
        self.cur = self.table.next(self.cur);
        self.settle();
        self.valid()
    }

    fn get(&self) -> Result<u64> {
        if self.cur == pm::NULL {
            return Err(GraphError::NullIterator);
        }
        // The slot may have been freed by this same transaction after the
        // iterator passed it.
        if self.table.is_free(self.cur) {
            return Err(GraphError::VacantIterator);
        }
        Ok(self.cur)
    }
}

enum NodeIterInner {
    Empty,
    Table(TableScan),
    Index(Rc<dyn ObjCursor>),
    Filter {
        base: Box<NodeIterator>,
        pp: PropertyPredicate,
    },
}

/// Iterator over nodes.
pub struct NodeIterator {
    inner: NodeIterInner,
}

impl NodeIterator {
    pub(crate) fn empty() -> NodeIterator {
        NodeIterator {
            inner: NodeIterInner::Empty,
        }
    }

    pub(crate) fn table_scan(table: FixedAllocator) -> NodeIterator {
        NodeIterator {
            inner: NodeIterInner::Table(TableScan::new(table)),
        }
    }

    pub(crate) fn index(cursor: Rc<dyn ObjCursor>) -> NodeIterator {
        NodeIterator {
            inner: NodeIterInner::Index(cursor),
        }
    }

    /// Wraps this iterator with a property predicate.
    pub fn filter(self, pp: PropertyPredicate) -> NodeIterator {
        let mut it = NodeIterator {
            inner: NodeIterInner::Filter {
                base: Box::new(self),
                pp,
            },
        };
        let _ = it.settle_filter();
        it
    }

    fn settle_filter(&mut self) -> Result<()> {
        if let NodeIterInner::Filter { base, pp } = &mut self.inner {
            while base.valid() {
                let node = match base.get() {
                    Ok(node) => node,
                    Err(GraphError::VacantIterator) => {
                        base.next()?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                match node.check_property(pp.id)? {
                    Some(value) if pp.matches(&value) => return Ok(()),
                    _ => {
                        base.next()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the iterator refers to a node (possibly a vacant slot).
    pub fn valid(&self) -> bool {
        match &self.inner {
            NodeIterInner::Empty => false,
            NodeIterInner::Table(scan) => scan.valid(),
            NodeIterInner::Index(cursor) => cursor.valid(),
            NodeIterInner::Filter { base, .. } => base.valid(),
        }
    }

    /// The current node, read-locked.
    pub fn get(&self) -> Result<NodeRef> {
        let addr = match &self.inner {
            NodeIterInner::Empty => return Err(GraphError::NullIterator),
            NodeIterInner::Table(scan) => scan.get()?,
            NodeIterInner::Index(cursor) => cursor.get()?,
            NodeIterInner::Filter { base, .. } => return base.get(),
        };
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Node, addr, false)?;
        Ok(NodeRef::at(addr))
    }

    /// Advances; returns whether a node is available.
    pub fn next(&mut self) -> Result<bool> {
        match &mut self.inner {
            NodeIterInner::Empty => return Ok(false),
            NodeIterInner::Table(scan) => return Ok(scan.advance()),
            NodeIterInner::Index(cursor) => return cursor.advance(),
            NodeIterInner::Filter { base, .. } => {
                if base.valid() {
                    base.next()?;
                }
            }
        }
        self.settle_filter()?;
        Ok(self.valid())
    }

    /// Drains the iterator, collecting every remaining node.
    pub fn collect_nodes(mut self) -> Result<Vec<NodeRef>> {
        let mut out = Vec::new();
        while self.valid() {
            out.push(self.get()?);
            self.next()?;
        }
        Ok(out)
    }
}

// Edge iteration over one node's adjacency. Incoming first, then outgoing;
// within a direction, tags in directory order; within a tag, pairs in
// insertion order.
struct NodeEdgeState {
    // (direction, directory) entries still to visit, last first.
    pending: Vec<(Direction, EdgeIndex)>,
    tag_filter: Option<StringId>,
    tags: Vec<(StringId, u64)>,
    tag_idx: usize,
    pos: u64,
    vacant: bool,
}

impl NodeEdgeState {
    fn load_direction(&mut self, tx: &TransactionImpl) -> Result<bool> {
        while let Some((_dir, index)) = self.pending.pop() {
            self.tags = match self.tag_filter {
                Some(tag) => {
                    let head = index.first(tx, tag)?;
                    if head != pm::NULL {
                        vec![(tag, head)]
                    } else {
                        Vec::new()
                    }
                }
                None => index.tag_heads(tx)?,
            };
            self.tag_idx = 0;
            if let Some(&(_, head)) = self.tags.first() {
                self.pos = head;
                return Ok(true);
            }
        }
        self.pos = pm::NULL;
        Ok(false)
    }

    fn advance(&mut self, tx: &TransactionImpl) -> Result<bool> {
        if self.vacant {
            self.vacant = false;
            return Ok(self.valid());
        }
        if self.pos != pm::NULL {
            self.pos = edge_index::pair_next(self.pos);
            if self.pos != pm::NULL {
                return Ok(true);
            }
        }
        // Next tag in this direction, then the next direction.
        self.tag_idx += 1;
        if self.tag_idx < self.tags.len() {
            self.pos = self.tags[self.tag_idx].1;
            return Ok(true);
        }
        self.load_direction(tx)
    }

    fn valid(&self) -> bool {
        self.vacant || self.pos != pm::NULL
    }

    fn get(&self) -> Result<u64> {
        if self.vacant {
            return Err(GraphError::VacantIterator);
        }
        if self.pos == pm::NULL {
            return Err(GraphError::NullIterator);
        }
        Ok(edge_index::pair_at(self.pos).edge)
    }
}

struct NodeEdgeCell(RefCell<NodeEdgeState>);

impl IndexIterSink for NodeEdgeCell {
    fn remove_notify(&self, list_node: u64) {
        let mut state = self.0.borrow_mut();
        if state.pos == list_node {
            state.vacant = false;
            if let Ok(tx) = TransactionImpl::current() {
                if state.advance(tx).is_err() {
                    state.pos = pm::NULL;
                }
            }
            state.vacant = true;
        }
    }

    fn rebalance_notify(&self, _tree: u64) {}
}

enum EdgeIterInner {
    Empty,
    Table(TableScan),
    Index(Rc<dyn ObjCursor>),
    NodeEdges(Rc<NodeEdgeCell>),
    Filter {
        base: Box<EdgeIterator>,
        pp: PropertyPredicate,
    },
}

/// Iterator over edges.
pub struct EdgeIterator {
    inner: EdgeIterInner,
}

impl EdgeIterator {
    pub(crate) fn empty() -> EdgeIterator {
        EdgeIterator {
            inner: EdgeIterInner::Empty,
        }
    }

    pub(crate) fn table_scan(table: FixedAllocator) -> EdgeIterator {
        EdgeIterator {
            inner: EdgeIterInner::Table(TableScan::new(table)),
        }
    }

    pub(crate) fn index(cursor: Rc<dyn ObjCursor>) -> EdgeIterator {
        EdgeIterator {
            inner: EdgeIterInner::Index(cursor),
        }
    }

    pub(crate) fn node_edges(
        tx: &TransactionImpl,
        node: NodeRef,
        dir: Direction,
        tag: Option<StringId>,
    ) -> Result<EdgeIterator> {
        let mut pending = Vec::new();
        match dir {
            Direction::Outgoing => pending.push((Direction::Outgoing, node.out_index())),
            Direction::Incoming => pending.push((Direction::Incoming, node.in_index())),
            Direction::Any => {
                // Popped from the back: incoming runs first.
                pending.push((Direction::Outgoing, node.out_index()));
                pending.push((Direction::Incoming, node.in_index()));
            }
        }
        let mut state = NodeEdgeState {
            pending,
            tag_filter: tag.filter(|t| !t.is_none()),
            tags: Vec::new(),
            tag_idx: 0,
            pos: pm::NULL,
            vacant: false,
        };
        state.load_direction(tx)?;

        let cell = Rc::new(NodeEdgeCell(RefCell::new(state)));
        let sink: Rc<dyn IndexIterSink> = cell.clone();
        tx.register_index_iter(Rc::downgrade(&sink));
        Ok(EdgeIterator {
            inner: EdgeIterInner::NodeEdges(cell),
        })
    }

    /// Wraps this iterator with a property predicate.
    pub fn filter(self, pp: PropertyPredicate) -> EdgeIterator {
        let mut it = EdgeIterator {
            inner: EdgeIterInner::Filter {
                base: Box::new(self),
                pp,
            },
        };
        let _ = it.settle_filter();
        it
    }

    fn settle_filter(&mut self) -> Result<()> {
        if let EdgeIterInner::Filter { base, pp } = &mut self.inner {
            while base.valid() {
                let e = match base.get() {
                    Ok(e) => e,
                    Err(GraphError::VacantIterator) => {
                        base.next()?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                match e.check_property(pp.id)? {
                    Some(value) if pp.matches(&value) => return Ok(()),
                    _ => {
                        base.next()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the iterator refers to an edge (possibly a vacant slot).
    pub fn valid(&self) -> bool {
        match &self.inner {
            EdgeIterInner::Empty => false,
            EdgeIterInner::Table(scan) => scan.valid(),
            EdgeIterInner::Index(cursor) => cursor.valid(),
            EdgeIterInner::NodeEdges(cell) => cell.0.borrow().valid(),
            EdgeIterInner::Filter { base, .. } => base.valid(),
        }
    }

    /// The current edge, read-locked.
    pub fn get(&self) -> Result<EdgeRef> {
        let addr = match &self.inner {
            EdgeIterInner::Empty => return Err(GraphError::NullIterator),
            EdgeIterInner::Table(scan) => scan.get()?,
            EdgeIterInner::Index(cursor) => cursor.get()?,
            EdgeIterInner::NodeEdges(cell) => cell.0.borrow().get()?,
            EdgeIterInner::Filter { base, .. } => return base.get(),
        };
        let tx = TransactionImpl::current()?;
        tx.acquire_lock(LockDomain::Edge, addr, false)?;
        Ok(EdgeRef::at(addr))
    }

    /// Advances; returns whether an edge is available.
    pub fn next(&mut self) -> Result<bool> {
        match &mut self.inner {
            EdgeIterInner::Empty => return Ok(false),
            EdgeIterInner::Table(scan) => return Ok(scan.advance()),
            EdgeIterInner::Index(cursor) => return cursor.advance(),
            EdgeIterInner::NodeEdges(cell) => {
                let tx = TransactionImpl::current()?;
                return cell.0.borrow_mut().advance(tx);
            }
            EdgeIterInner::Filter { base, .. } => {
                if base.valid() {
                    base.next()?;
                }
            }
        }
        self.settle_filter()?;
        Ok(self.valid())
    }

    /// Drains the iterator, collecting every remaining edge.
    pub fn collect_edges(mut self) -> Result<Vec<EdgeRef>> {
        let mut out = Vec::new();
        while self.valid() {
            out.push(self.get()?);
            self.next()?;
        }
        Ok(out)
    }
}
