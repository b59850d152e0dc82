//! End-to-end: build a small chain, commit, reopen, and dump it back.

mod common;

use pmgraph::{Property, StringId, Transaction, TxMode};
use tempfile::tempdir;

#[test]
fn linear_chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();

    {
        let graph = common::create_graph(dir.path(), &config);
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();

        let a = graph.add_node(StringId(0)).unwrap();
        let b = graph.add_node(StringId(0)).unwrap();
        let c = graph.add_node(StringId(0)).unwrap();
        a.set_property(StringId(0), &Property::String("a".into())).unwrap();
        b.set_property(StringId(0), &Property::String("b".into())).unwrap();
        c.set_property(StringId(0), &Property::String("c".into())).unwrap();

        graph.add_edge(a, b, StringId(0)).unwrap();
        graph.add_edge(b, c, StringId(0)).unwrap();

        tx.commit().unwrap();
    }

    let graph = common::reopen_graph(dir.path(), &config);
    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();

    let nodes = graph.get_nodes().unwrap().collect_nodes().unwrap();
    assert_eq!(nodes.len(), 3);
    let mut names = Vec::new();
    for node in &nodes {
        assert_eq!(node.tag().unwrap(), StringId(0));
        names.push(
            node.get_property(StringId(0))
                .unwrap()
                .string_value()
                .unwrap()
                .to_owned(),
        );
    }
    names.sort();
    assert_eq!(names, ["a", "b", "c"]);

    let edges = graph.get_edges().unwrap().collect_edges().unwrap();
    assert_eq!(edges.len(), 2);
    let mut hops = Vec::new();
    for edge in &edges {
        let src = edge
            .source()
            .unwrap()
            .get_property(StringId(0))
            .unwrap()
            .string_value()
            .unwrap()
            .to_owned();
        let dst = edge
            .destination()
            .unwrap()
            .get_property(StringId(0))
            .unwrap()
            .string_value()
            .unwrap()
            .to_owned();
        hops.push((src, dst));
    }
    hops.sort();
    assert_eq!(
        hops,
        [("a".to_string(), "b".to_string()), ("b".to_string(), "c".to_string())]
    );

    drop(tx);
}

#[test]
fn node_and_edge_ids_are_slot_ordinals() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let n1 = graph.add_node(StringId(0)).unwrap();
    let n2 = graph.add_node(StringId(0)).unwrap();
    assert_eq!(graph.node_id(n1).unwrap().0, 1);
    assert_eq!(graph.node_id(n2).unwrap().0, 2);

    let e = graph.add_edge(n1, n2, StringId(0)).unwrap();
    assert_eq!(graph.edge_id(e).unwrap().0, 1);

    let found = graph.node_by_id(pmgraph::NodeId(2)).unwrap().unwrap();
    assert_eq!(found, n2);
    assert!(graph.node_by_id(pmgraph::NodeId(99)).unwrap().is_none());
    tx.commit().unwrap();
}

#[test]
fn tagged_lookup_uses_implicit_index() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let person = graph.intern("person").unwrap();
    let city = graph.intern("city").unwrap();
    for _ in 0..3 {
        graph.add_node(person).unwrap();
    }
    graph.add_node(city).unwrap();
    graph.add_node(StringId(0)).unwrap();

    assert_eq!(
        graph.get_nodes_by_tag(person).unwrap().collect_nodes().unwrap().len(),
        3
    );
    assert_eq!(
        graph.get_nodes_by_tag(city).unwrap().collect_nodes().unwrap().len(),
        1
    );
    // A tag that never existed yields an empty iterator, not an error.
    let ghost = graph.intern("ghost").unwrap();
    assert!(!graph.get_nodes_by_tag(ghost).unwrap().valid());
    // Tag 0 falls back to the full scan.
    assert_eq!(
        graph.get_nodes_by_tag(StringId(0)).unwrap().collect_nodes().unwrap().len(),
        5
    );
    tx.commit().unwrap();
}
