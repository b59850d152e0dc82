//! Shared helpers for the in-crate tests.
//!
//! Unit tests across modules run in one process, and every open graph maps
//! its regions at fixed virtual addresses, so each test graph gets a
//! disjoint base address.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{GraphConfig, OpenOptions};
use crate::graph::Graph;

static NEXT_BASE_SLOT: AtomicU64 = AtomicU64::new(0);

const TEST_BASE: u64 = 0x4800_0000_0000;
const SLOT_SPACING: u64 = 0x10_0000_0000;

/// A config whose region layout cannot collide with any other test graph
/// in this process.
pub(crate) fn unique_config() -> GraphConfig {
    let slot = NEXT_BASE_SLOT.fetch_add(1, Ordering::SeqCst);
    GraphConfig {
        base_address: TEST_BASE + slot * SLOT_SPACING,
        ..GraphConfig::default()
    }
}

/// A fresh graph in a scratch directory.
pub(crate) fn open_temp_graph() -> (tempfile::TempDir, GraphConfig, Graph) {
    let dir = tempfile::tempdir().unwrap();
    let config = unique_config();
    let graph = Graph::open(dir.path().join("g"), &config, &OpenOptions::create()).unwrap();
    (dir, config, graph)
}
