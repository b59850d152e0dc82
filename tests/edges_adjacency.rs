//! Edge adjacency: both endpoints agree with the edge, iteration order,
//! neighbor lookup, and cascade on node removal.

mod common;

use pmgraph::{Direction, GraphError, Property, StringId, Transaction, TxMode};
use tempfile::tempdir;

#[test]
fn endpoints_and_edge_agree() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let knows = graph.intern("knows").unwrap();
    let a = graph.add_node(StringId(0)).unwrap();
    let b = graph.add_node(StringId(0)).unwrap();
    let e = graph.add_edge(a, b, knows).unwrap();

    assert_eq!(e.source().unwrap(), a);
    assert_eq!(e.destination().unwrap(), b);
    assert_eq!(e.tag().unwrap(), knows);

    // Exactly one entry in a's outgoing edges and one in b's incoming.
    let out: Vec<_> = a
        .edges(Direction::Outgoing, None)
        .unwrap()
        .collect_edges()
        .unwrap();
    assert_eq!(out, vec![e]);
    let inn: Vec<_> = b
        .edges(Direction::Incoming, None)
        .unwrap()
        .collect_edges()
        .unwrap();
    assert_eq!(inn, vec![e]);
    assert!(a
        .edges(Direction::Incoming, None)
        .unwrap()
        .collect_edges()
        .unwrap()
        .is_empty());
    tx.commit().unwrap();
}

#[test]
fn any_direction_lists_incoming_first() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let t = graph.intern("t").unwrap();
    let hub = graph.add_node(StringId(0)).unwrap();
    let x = graph.add_node(StringId(0)).unwrap();
    let y = graph.add_node(StringId(0)).unwrap();

    let into_hub = graph.add_edge(x, hub, t).unwrap();
    let out_of_hub = graph.add_edge(hub, y, t).unwrap();

    let all: Vec<_> = hub
        .edges(Direction::Any, None)
        .unwrap()
        .collect_edges()
        .unwrap();
    assert_eq!(all, vec![into_hub, out_of_hub]);

    // Tag filter keeps only matching edges.
    let other = graph.intern("other").unwrap();
    let tagged: Vec<_> = hub
        .edges(Direction::Any, Some(other))
        .unwrap()
        .collect_edges()
        .unwrap();
    assert!(tagged.is_empty());
    tx.commit().unwrap();
}

#[test]
fn neighbor_lookup() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let road = graph.intern("road").unwrap();
    let rail = graph.intern("rail").unwrap();
    let a = graph.add_node(StringId(0)).unwrap();
    let b = graph.add_node(StringId(0)).unwrap();
    let c = graph.add_node(StringId(0)).unwrap();
    graph.add_edge(a, b, road).unwrap();
    graph.add_edge(c, a, rail).unwrap();

    assert_eq!(a.neighbor(Direction::Outgoing, None).unwrap(), b);
    assert_eq!(a.neighbor(Direction::Outgoing, Some(road)).unwrap(), b);
    assert_eq!(a.neighbor(Direction::Incoming, None).unwrap(), c);
    assert!(matches!(
        a.neighbor(Direction::Incoming, Some(road)),
        Err(GraphError::NullIterator)
    ));
    assert!(matches!(
        b.neighbor(Direction::Outgoing, None),
        Err(GraphError::NullIterator)
    ));
    tx.commit().unwrap();
}

#[test]
fn removing_an_edge_detaches_both_halves() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let t = graph.intern("t").unwrap();
    let a = graph.add_node(StringId(0)).unwrap();
    let b = graph.add_node(StringId(0)).unwrap();
    let e = graph.add_edge(a, b, t).unwrap();

    graph.remove_edge(e).unwrap();
    assert!(a
        .edges(Direction::Any, None)
        .unwrap()
        .collect_edges()
        .unwrap()
        .is_empty());
    assert!(b
        .edges(Direction::Any, None)
        .unwrap()
        .collect_edges()
        .unwrap()
        .is_empty());
    assert!(!graph.get_edges().unwrap().valid());
    tx.commit().unwrap();
}

#[test]
fn removing_a_node_removes_its_edges() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let t = graph.intern("t").unwrap();
    let w = graph.intern("weight").unwrap();
    let hub = graph.add_node(StringId(0)).unwrap();
    let x = graph.add_node(StringId(0)).unwrap();
    let y = graph.add_node(StringId(0)).unwrap();
    let e1 = graph.add_edge(hub, x, t).unwrap();
    let e2 = graph.add_edge(y, hub, t).unwrap();
    e1.set_property(w, &Property::Integer(10)).unwrap();
    e2.set_property(w, &Property::Integer(20)).unwrap();

    graph.remove_node(hub).unwrap();
    tx.commit().unwrap();

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert_eq!(graph.get_nodes().unwrap().collect_nodes().unwrap().len(), 2);
    assert!(!graph.get_edges().unwrap().valid());
    // The survivors lost their halves of the removed edges.
    assert!(x
        .edges(Direction::Any, None)
        .unwrap()
        .collect_edges()
        .unwrap()
        .is_empty());
    assert!(y
        .edges(Direction::Any, None)
        .unwrap()
        .collect_edges()
        .unwrap()
        .is_empty());
    drop(tx);
}

#[test]
fn edge_slots_are_reused_after_removal() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let t = graph.intern("t").unwrap();
    let a = graph.add_node(StringId(0)).unwrap();
    let b = graph.add_node(StringId(0)).unwrap();
    let e1 = graph.add_edge(a, b, t).unwrap();
    let id1 = graph.edge_id(e1).unwrap();
    graph.remove_edge(e1).unwrap();
    tx.commit().unwrap();

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let e2 = graph.add_edge(b, a, t).unwrap();
    assert_eq!(graph.edge_id(e2).unwrap(), id1, "freed slot reused");
    assert_eq!(e2.source().unwrap(), b);
    tx.commit().unwrap();
}
