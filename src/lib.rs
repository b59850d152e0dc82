//! # pmgraph - Persistent-Memory Property Graph Engine
//!
//! An embedded, single-process property graph stored in memory-mapped
//! region files. A caller opens a named on-media graph, begins a
//! transaction, and performs node/edge/property/index operations; commit
//! makes the mutations durable and recoverable, while abort (or a crash)
//! restores the graph to its pre-transaction state.
//!
//! ## Quick start
//!
//! ```no_run
//! use pmgraph::{Graph, GraphConfig, OpenOptions, Property, Transaction, TxMode};
//!
//! let graph = Graph::open("my_graph", &GraphConfig::default(), &OpenOptions::create())?;
//!
//! let tx = Transaction::begin(&graph, TxMode::ReadWrite)?;
//! let tag = graph.intern("person")?;
//! let name = graph.intern("name")?;
//!
//! let alice = graph.add_node(tag)?;
//! let bob = graph.add_node(tag)?;
//! alice.set_property(name, &Property::String("alice".into()))?;
//! bob.set_property(name, &Property::String("bob".into()))?;
//!
//! let knows = graph.intern("knows")?;
//! graph.add_edge(alice, bob, knows)?;
//! tx.commit()?;
//! # Ok::<(), pmgraph::GraphError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Regions**: files mapped at fixed virtual addresses, so raw pointers
//!   stored on media stay valid across reopenings.
//! - **Allocator stack**: fixed-size, variable-size, and chunk allocators
//!   over a 2 MiB chunk pool, one lane per concurrency slot.
//! - **Transactions**: per-thread undo journal, striped locks, and
//!   deferred commit/abort callback chains.
//! - **Indices**: balanced trees per (kind, tag, property), plus implicit
//!   tag indices, with invalidation-aware iterators.

pub mod error;
pub mod logging;

mod alloc;
mod config;
mod edge_index;
mod graph;
mod index;
mod iter;
mod props;
mod region;
mod strings;
mod tx;
mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::config::{GraphConfig, OpenOptions};
pub use crate::error::{GraphError, Result};
pub use crate::graph::{AllocatorStats, EdgeRef, Graph, NodeRef};
pub use crate::index::{ChunkStats, IndexKind, IndexStats};
pub use crate::iter::{EdgeIterator, NodeIterator};
pub use crate::props::PropertyIterator;
pub use crate::region::SyncMode;
pub use crate::tx::{Transaction, TxMode};
pub use crate::types::{
    Direction, EdgeId, NodeId, PredicateOp, Property, PropertyPredicate, PropertyType, StringId,
    Time,
};
