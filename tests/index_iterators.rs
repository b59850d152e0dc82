//! Property indices: predicate selection, reverse iteration, consistency
//! under value changes, and iterator behavior under mutation.

mod common;

use pmgraph::{
    GraphError, IndexKind, PredicateOp, Property, PropertyPredicate, PropertyType, StringId,
    Transaction, TxMode,
};
use tempfile::tempdir;

#[test]
fn integer_index_serves_predicates() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let rank = graph.intern("rank").unwrap();
    graph
        .create_index(IndexKind::Node, item, rank, PropertyType::Integer)
        .unwrap();

    for v in [5i64, 3, 9, 1, 7, 3] {
        let n = graph.add_node(item).unwrap();
        n.set_property(rank, &Property::Integer(v)).unwrap();
    }

    let collect = |pp: &PropertyPredicate, reverse: bool| -> Vec<i64> {
        let mut out = Vec::new();
        let mut it = graph.get_nodes_where(item, pp, reverse).unwrap();
        while it.valid() {
            out.push(
                it.get()
                    .unwrap()
                    .get_property(rank)
                    .unwrap()
                    .int_value()
                    .unwrap(),
            );
            it.next().unwrap();
        }
        out
    };

    let eq = PropertyPredicate::new(rank, PredicateOp::Eq, Property::Integer(3));
    assert_eq!(collect(&eq, false), [3, 3]);

    let ge = PropertyPredicate::new(rank, PredicateOp::Ge, Property::Integer(5));
    assert_eq!(collect(&ge, false), [5, 7, 9]);
    assert_eq!(collect(&ge, true), [9, 7, 5]);

    let lt = PropertyPredicate::new(rank, PredicateOp::Lt, Property::Integer(5));
    assert_eq!(collect(&lt, false), [1, 3, 3]);

    let ne = PropertyPredicate::new(rank, PredicateOp::Ne, Property::Integer(3));
    assert_eq!(collect(&ne, false), [1, 5, 7, 9]);

    let range = PropertyPredicate::range(
        rank,
        PredicateOp::GtLe,
        Property::Integer(3),
        Property::Integer(7),
    );
    assert_eq!(collect(&range, false), [5, 7]);
    assert_eq!(collect(&range, true), [7, 5]);

    let any = PropertyPredicate::exists(rank);
    assert_eq!(collect(&any, false), [1, 3, 3, 5, 7, 9]);
    tx.commit().unwrap();
}

#[test]
fn index_follows_value_changes() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let rank = graph.intern("rank").unwrap();
    graph
        .create_index(IndexKind::Node, item, rank, PropertyType::Integer)
        .unwrap();

    let n = graph.add_node(item).unwrap();
    n.set_property(rank, &Property::Integer(10)).unwrap();
    n.set_property(rank, &Property::Integer(20)).unwrap();

    let eq10 = PropertyPredicate::new(rank, PredicateOp::Eq, Property::Integer(10));
    assert!(!graph.get_nodes_where(item, &eq10, false).unwrap().valid());
    let eq20 = PropertyPredicate::new(rank, PredicateOp::Eq, Property::Integer(20));
    assert!(graph.get_nodes_where(item, &eq20, false).unwrap().valid());

    // Removing the property removes the index entry too.
    n.remove_property(rank).unwrap();
    assert!(!graph.get_nodes_where(item, &eq20, false).unwrap().valid());
    tx.commit().unwrap();
}

#[test]
fn global_index_catches_every_tag() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let person = graph.intern("person").unwrap();
    let city = graph.intern("city").unwrap();
    let loader = graph.intern("loader_id").unwrap();
    // Tag 0 indexes the property across every tag.
    graph
        .create_index(IndexKind::Node, StringId(0), loader, PropertyType::Integer)
        .unwrap();

    let p = graph.add_node(person).unwrap();
    p.set_property(loader, &Property::Integer(42)).unwrap();
    let c = graph.add_node(city).unwrap();
    c.set_property(loader, &Property::Integer(42)).unwrap();

    let eq = PropertyPredicate::new(loader, PredicateOp::Eq, Property::Integer(42));
    let hits = graph
        .get_nodes_where(StringId(0), &eq, false)
        .unwrap()
        .collect_nodes()
        .unwrap();
    assert_eq!(hits.len(), 2);
    tx.commit().unwrap();
}

#[test]
fn unindexed_predicate_falls_back_to_filter() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let size = graph.intern("size").unwrap();
    for v in [1i64, 2, 3, 4] {
        let n = graph.add_node(item).unwrap();
        n.set_property(size, &Property::Integer(v)).unwrap();
    }

    // No index on (item, size): the tag index is scanned and filtered.
    let gt = PropertyPredicate::new(size, PredicateOp::Gt, Property::Integer(2));
    let hits = graph
        .get_nodes_where(item, &gt, false)
        .unwrap()
        .collect_nodes()
        .unwrap();
    assert_eq!(hits.len(), 2);
    tx.commit().unwrap();
}

#[test]
fn index_iterator_vacates_on_entity_removal() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let rank = graph.intern("rank").unwrap();
    graph
        .create_index(IndexKind::Node, item, rank, PropertyType::Integer)
        .unwrap();

    for v in [1i64, 2, 3] {
        let n = graph.add_node(item).unwrap();
        n.set_property(rank, &Property::Integer(v)).unwrap();
    }

    let any = PropertyPredicate::exists(rank);
    let mut it = graph.get_nodes_where(item, &any, false).unwrap();
    assert!(it.valid());
    let current = it.get().unwrap();

    // Removing the iterator's current entity invalidates the position.
    graph.remove_node(current).unwrap();
    assert!(matches!(it.get(), Err(GraphError::VacantIterator)));

    // Advancing proceeds to the remaining live entities.
    let mut remaining = 0;
    while it.next().unwrap() {
        let node = it.get().unwrap();
        assert_ne!(node, current);
        remaining += 1;
    }
    assert_eq!(remaining, 2);
    tx.commit().unwrap();
}

#[test]
fn range_iterator_survives_rebalance() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let name = graph.intern("name").unwrap();
    graph
        .create_index(IndexKind::Node, item, name, PropertyType::String)
        .unwrap();

    let keys: Vec<String> = (1..=9).map(|i| format!("M{i:02}")).collect();
    for k in &keys {
        let n = graph.add_node(item).unwrap();
        n.set_property(name, &Property::String(k.clone())).unwrap();
    }

    let ge_m = PropertyPredicate::new(name, PredicateOp::Ge, Property::String("M".into()));
    let mut it = graph.get_nodes_where(item, &ge_m, false).unwrap();

    // Consume the first two keys.
    let mut yielded = Vec::new();
    for _ in 0..2 {
        yielded.push(
            it.get()
                .unwrap()
                .get_property(name)
                .unwrap()
                .string_value()
                .unwrap()
                .to_owned(),
        );
        it.next().unwrap();
    }

    // Flood the tree with smaller keys; the rotations cross the
    // iterator's current node.
    for i in 0..30 {
        let n = graph.add_node(item).unwrap();
        n.set_property(name, &Property::String(format!("A{i:02}")))
            .unwrap();
    }

    // The remaining keys still come out in order, no skips, no revisits.
    while it.valid() {
        yielded.push(
            it.get()
                .unwrap()
                .get_property(name)
                .unwrap()
                .string_value()
                .unwrap()
                .to_owned(),
        );
        it.next().unwrap();
    }
    assert_eq!(yielded, keys);
    tx.commit().unwrap();
}

#[test]
fn index_stats_count_entries() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let item = graph.intern("item").unwrap();
    let rank = graph.intern("rank").unwrap();
    graph
        .create_index(IndexKind::Node, item, rank, PropertyType::Integer)
        .unwrap();
    for v in [1i64, 1, 2, 3] {
        let n = graph.add_node(item).unwrap();
        n.set_property(rank, &Property::Integer(v)).unwrap();
    }

    let stats = graph.index_stats(IndexKind::Node, item, rank).unwrap();
    assert_eq!(stats.unique_entries, 3);
    assert_eq!(stats.total_elements, 4);
    assert!(stats.total_size_bytes > 0);

    let dir_stats = graph.chunk_list_stats().unwrap();
    assert!(dir_stats.num_elements > 0);
    tx.commit().unwrap();
}
