//! String interning, configuration validation, and header checks.

mod common;

use std::collections::HashSet;

use pmgraph::{Graph, GraphConfig, GraphError, OpenOptions, StringId, Transaction, TxMode};
use tempfile::tempdir;

#[test]
fn interning_is_idempotent_and_ids_unique() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let first = graph.intern("alpha").unwrap();
    assert_eq!(graph.intern("alpha").unwrap(), first);

    let mut seen = HashSet::new();
    for i in 0..200 {
        let id = graph.intern(&format!("name-{i}")).unwrap();
        assert!(!id.is_none());
        assert!(seen.insert(id), "duplicate id for name-{i}");
        assert_eq!(graph.string_name(id), format!("name-{i}"));
    }

    // The empty string is always id 0 and needs no table slot.
    assert_eq!(graph.intern("").unwrap(), StringId(0));
    assert_eq!(graph.string_name(StringId(0)), "");
    tx.commit().unwrap();

    // Interned strings survive reopen.
    drop(graph);
    let graph = common::reopen_graph(dir.path(), &config);
    assert_eq!(graph.lookup_string("alpha").unwrap(), Some(first));
    assert_eq!(graph.string_name(first), "alpha");
}

#[test]
fn overlong_strings_are_rejected() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    // Default limit is 16 bytes.
    assert!(graph.intern("exactly-16-chars").is_ok());
    assert!(matches!(
        graph.intern("seventeen-chars!!"),
        Err(GraphError::InvalidID(_))
    ));
    tx.commit().unwrap();
}

#[test]
fn lookup_does_not_intern() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    // No transaction needed for a miss, and the miss leaves no trace.
    assert_eq!(graph.lookup_string("ghost").unwrap(), None);
    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let id = graph.intern("ghost").unwrap();
    tx.commit().unwrap();
    assert_eq!(graph.lookup_string("ghost").unwrap(), Some(id));
}

#[test]
fn invalid_configs_are_rejected() {
    let dir = tempdir().unwrap();
    let base = common::unique_config();

    let bad_node = GraphConfig {
        node_size: 48,
        ..base.clone()
    };
    assert!(matches!(
        Graph::open(dir.path().join("a"), &bad_node, &OpenOptions::create()),
        Err(GraphError::InvalidConfig(_))
    ));

    let bad_lanes = GraphConfig {
        num_allocators: 0,
        ..base.clone()
    };
    assert!(matches!(
        Graph::open(dir.path().join("b"), &bad_lanes, &OpenOptions::create()),
        Err(GraphError::InvalidConfig(_))
    ));

    let bad_locale = GraphConfig {
        locale_name: "xx_YY".into(),
        ..base
    };
    assert!(matches!(
        Graph::open(dir.path().join("c"), &bad_locale, &OpenOptions::create()),
        Err(GraphError::InvalidConfig(_))
    ));
}

#[test]
fn version_mismatch_refuses_to_open() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    drop(common::create_graph(dir.path(), &config));

    // Bump the stored version in place.
    let header = dir.path().join("graph.jdb");
    let mut bytes = std::fs::read(&header).unwrap();
    bytes[0] = bytes[0].wrapping_add(1);
    std::fs::write(&header, &bytes).unwrap();

    assert!(matches!(
        Graph::open(dir.path(), &config, &OpenOptions::default()),
        Err(GraphError::VersionMismatch { .. })
    ));
}

#[test]
fn corrupted_header_refuses_to_open() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    drop(common::create_graph(dir.path(), &config));

    // Flip a byte inside a region descriptor; the checksum catches it.
    let header = dir.path().join("graph.jdb");
    let mut bytes = std::fs::read(&header).unwrap();
    bytes[40] ^= 0xff;
    std::fs::write(&header, &bytes).unwrap();

    assert!(matches!(
        Graph::open(dir.path(), &config, &OpenOptions::default()),
        Err(GraphError::OpenFailed { .. })
    ));
}

#[test]
fn resized_region_refuses_to_open() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    drop(common::create_graph(dir.path(), &config));

    let nodes = dir.path().join("nodes.jdb");
    let len = std::fs::metadata(&nodes).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&nodes).unwrap();
    file.set_len(len / 2).unwrap();
    drop(file);

    assert!(matches!(
        Graph::open(dir.path(), &config, &OpenOptions::default()),
        Err(GraphError::OpenFailed { .. })
    ));
}

#[test]
fn allocator_stats_reflect_usage() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    for _ in 0..4 {
        graph.add_node(StringId(0)).unwrap();
    }
    tx.commit().unwrap();

    let stats = graph.allocator_stats();
    let nodes = stats.iter().find(|s| s.name == "NodeTable").unwrap();
    assert_eq!(nodes.num_objects, 4);
    assert_eq!(nodes.used_bytes, 4 * nodes.object_size as u64);
    assert!(nodes.occupancy <= 100);
    let generic = stats.iter().find(|s| s.name == "GenericAllocator").unwrap();
    assert!(generic.used_bytes > 0, "adjacency structures consume space");
}
