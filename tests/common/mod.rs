//! Shared helpers for the integration tests.
//!
//! Graphs map their regions at fixed virtual addresses, so concurrent
//! tests inside one test binary each take a disjoint base address.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use pmgraph::{Graph, GraphConfig, OpenOptions};

static NEXT_BASE_SLOT: AtomicU64 = AtomicU64::new(0);

const TEST_BASE: u64 = 0x4a00_0000_0000;
const SLOT_SPACING: u64 = 0x10_0000_0000;

pub fn unique_config() -> GraphConfig {
    let slot = NEXT_BASE_SLOT.fetch_add(1, Ordering::SeqCst);
    GraphConfig {
        base_address: TEST_BASE + slot * SLOT_SPACING,
        ..GraphConfig::default()
    }
}

pub fn create_graph(dir: &std::path::Path, config: &GraphConfig) -> Graph {
    Graph::open(dir, config, &OpenOptions::create()).expect("graph create")
}

pub fn reopen_graph(dir: &std::path::Path, config: &GraphConfig) -> Graph {
    Graph::open(dir, config, &OpenOptions::default()).expect("graph reopen")
}
