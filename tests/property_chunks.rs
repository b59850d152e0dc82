//! Property storage: round trips for every type, chunk chaining, and
//! iterator behavior under removal.

mod common;

use pmgraph::{GraphError, Property, StringId, Time, Transaction, TxMode};
use tempfile::tempdir;

#[test]
fn values_round_trip_for_every_type() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let node = graph.add_node(StringId(0)).unwrap();

    let cases: Vec<(&str, Property)> = vec![
        ("none", Property::NoValue),
        ("flag", Property::Boolean(true)),
        ("off", Property::Boolean(false)),
        ("zero", Property::Integer(0)),
        ("small", Property::Integer(-1)),
        ("big", Property::Integer(i64::MAX)),
        ("tiny", Property::Integer(i64::MIN)),
        ("pi", Property::Float(3.141592653589793)),
        (
            "when",
            Property::Time(Time {
                usec_utc: 1_600_000_000_000_000,
                tz_min: -330,
            }),
        ),
        ("short", Property::String("inline13chars".into())),
        ("long", Property::String("this string is far too long to stay inline".into())),
        ("empty", Property::String(String::new())),
        ("blob", Property::Blob((0..=255u8).collect())),
    ];

    let mut ids = Vec::new();
    for (name, value) in &cases {
        let id = graph.intern(name).unwrap();
        node.set_property(id, value).unwrap();
        ids.push(id);
    }
    tx.commit().unwrap();

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    for (id, (name, value)) in ids.iter().zip(&cases) {
        let read = node.get_property(*id).unwrap();
        assert_eq!(&read, value, "round trip of {name}");
    }
    drop(tx);
}

#[test]
fn ten_integers_span_linked_chunks() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let node = graph.add_node(StringId(0)).unwrap();

    let mut ids = Vec::new();
    for i in 0..10i64 {
        let id = graph.intern(&format!("p{i}")).unwrap();
        node.set_property(id, &Property::Integer(1000 + i)).unwrap();
        ids.push(id);
    }

    // All ten come back through the lazy iterator.
    let mut seen = Vec::new();
    let mut it = node.properties().unwrap();
    while it.valid() {
        seen.push((it.id().unwrap(), it.value().unwrap().int_value().unwrap()));
        it.next();
    }
    assert_eq!(seen.len(), 10);

    // Removing a middle property leaves the other nine intact.
    node.remove_property(ids[5]).unwrap();
    assert!(matches!(
        node.get_property(ids[5]),
        Err(GraphError::PropertyNotFound)
    ));
    for (i, id) in ids.iter().enumerate() {
        if i != 5 {
            assert_eq!(
                node.get_property(*id).unwrap().int_value().unwrap(),
                1000 + i as i64
            );
        }
    }
    tx.commit().unwrap();

    // The freed middle slot is reused for a replacement value.
    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    node.set_property(ids[5], &Property::Integer(4242)).unwrap();
    assert_eq!(node.get_property(ids[5]).unwrap().int_value().unwrap(), 4242);
    tx.commit().unwrap();
}

#[test]
fn replacing_values_keeps_single_record() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let node = graph.add_node(StringId(0)).unwrap();
    let id = graph.intern("value").unwrap();

    node.set_property(id, &Property::Integer(1)).unwrap();
    node.set_property(id, &Property::String("now a string".into())).unwrap();
    node.set_property(id, &Property::Boolean(true)).unwrap();

    let mut count = 0;
    let mut it = node.properties().unwrap();
    while it.valid() {
        count += 1;
        assert_eq!(it.id().unwrap(), id);
        it.next();
    }
    assert_eq!(count, 1);
    assert_eq!(node.get_property(id).unwrap(), Property::Boolean(true));
    tx.commit().unwrap();
}

#[test]
fn property_iterator_goes_vacant_on_removal() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let node = graph.add_node(StringId(0)).unwrap();
    let first = graph.intern("first").unwrap();
    let second = graph.intern("second").unwrap();
    node.set_property(first, &Property::Integer(1)).unwrap();
    node.set_property(second, &Property::Integer(2)).unwrap();

    let mut it = node.properties().unwrap();
    assert!(it.valid());
    let current = it.id().unwrap();
    node.remove_property(current).unwrap();

    // The current target is gone: dereference fails, advancing recovers.
    assert!(matches!(it.id(), Err(GraphError::VacantIterator)));
    assert!(it.next());
    let other = it.id().unwrap();
    assert_ne!(other, current);
    assert!(!it.next());
    tx.commit().unwrap();
}

#[test]
fn remove_all_properties_resets_the_chain() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let node = graph.add_node(StringId(0)).unwrap();
    for i in 0..12i64 {
        let id = graph.intern(&format!("k{i}")).unwrap();
        node.set_property(id, &Property::Integer(i)).unwrap();
    }
    let long = graph.intern("longstr").unwrap();
    node.set_property(long, &Property::String("x".repeat(100))).unwrap();

    // Removing the node drops every property, chained chunks included.
    graph.remove_node(node).unwrap();
    tx.commit().unwrap();

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert!(!graph.get_nodes().unwrap().valid());
    drop(tx);
}

#[test]
fn edge_properties_chain_early() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let a = graph.add_node(StringId(0)).unwrap();
    let b = graph.add_node(StringId(0)).unwrap();
    let e = graph.add_edge(a, b, StringId(0)).unwrap();

    // The inline chunk of an edge is small; a handful of values forces
    // linked chunks immediately.
    for i in 0..6i64 {
        let id = graph.intern(&format!("w{i}")).unwrap();
        e.set_property(id, &Property::Integer(i * 11)).unwrap();
    }
    for i in 0..6i64 {
        let id = graph.lookup_string(&format!("w{i}")).unwrap().unwrap();
        assert_eq!(e.get_property(id).unwrap().int_value().unwrap(), i * 11);
    }
    tx.commit().unwrap();
}
