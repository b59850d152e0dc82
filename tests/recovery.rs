//! Durability and recovery: aborts restore the pre-transaction state, an
//! interrupted transaction is rolled back on the next open, and read-only
//! opens refuse both mutation and recovery.

mod common;

use pmgraph::{
    Graph, GraphError, OpenOptions, Property, StringId, SyncMode, Transaction, TxMode,
};
use tempfile::tempdir;

#[test]
fn abort_restores_previous_state() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    let name = graph.intern("name").unwrap();
    let node = graph.add_node(StringId(0)).unwrap();
    node.set_property(name, &Property::String("committed".into()))
        .unwrap();
    tx.commit().unwrap();

    // Dropping without commit rolls everything back.
    {
        let _tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        node.set_property(name, &Property::String("doomed".into()))
            .unwrap();
        graph.add_node(StringId(0)).unwrap();
    }

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert_eq!(
        node.get_property(name).unwrap().string_value().unwrap(),
        "committed"
    );
    assert_eq!(graph.get_nodes().unwrap().collect_nodes().unwrap().len(), 1);
    drop(tx);
}

#[test]
fn interrupted_transaction_is_rolled_back_on_reopen() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();

    {
        let graph = common::create_graph(dir.path(), &config);
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        let name = graph.intern("name").unwrap();
        let node = graph.add_node(StringId(0)).unwrap();
        node.set_property(name, &Property::String("baseline".into()))
            .unwrap();
        tx.commit().unwrap();

        // Simulate a crash mid-transaction: the journal holds pre-images,
        // the slot stays active, and rollback never runs.
        std::thread::scope(|s| {
            s.spawn(|| {
                let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
                node.set_property(name, &Property::String("torn".into()))
                    .unwrap();
                graph.add_node(StringId(0)).unwrap();
                std::mem::forget(tx);
            });
        });
    }

    // Recovery runs before the first transaction and redoes the rollback.
    let graph = common::reopen_graph(dir.path(), &config);
    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    let nodes = graph.get_nodes().unwrap().collect_nodes().unwrap();
    assert_eq!(nodes.len(), 1);
    let name = graph.lookup_string("name").unwrap().unwrap();
    assert_eq!(
        nodes[0].get_property(name).unwrap().string_value().unwrap(),
        "baseline"
    );
    drop(tx);
}

#[test]
fn read_only_open_refuses_recovery() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();

    {
        let graph = common::create_graph(dir.path(), &config);
        std::thread::scope(|s| {
            s.spawn(|| {
                let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
                graph.add_node(StringId(0)).unwrap();
                std::mem::forget(tx);
            });
        });
    }

    let err = Graph::open(dir.path(), &config, &OpenOptions::read_only()).unwrap_err();
    assert!(matches!(err, GraphError::ReadOnly));

    // A writable open recovers; a read-only open afterwards succeeds.
    drop(common::reopen_graph(dir.path(), &config));
    let graph = Graph::open(dir.path(), &config, &OpenOptions::read_only()).unwrap();
    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert!(!graph.get_nodes().unwrap().valid());
    drop(tx);
}

#[test]
fn read_only_graph_refuses_mutation() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();

    {
        let graph = common::create_graph(dir.path(), &config);
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        graph.add_node(StringId(0)).unwrap();
        tx.commit().unwrap();
    }

    let graph = Graph::open(dir.path(), &config, &OpenOptions::read_only()).unwrap();
    assert!(matches!(
        Transaction::begin(&graph, TxMode::ReadWrite),
        Err(GraphError::ReadOnly)
    ));

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert_eq!(graph.get_nodes().unwrap().collect_nodes().unwrap().len(), 1);
    // Interning a new string is a mutation.
    assert!(graph.intern("fresh-string").is_err());
    drop(tx);
}

#[test]
fn read_only_transaction_cannot_write() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert!(matches!(
        graph.add_node(StringId(0)),
        Err(GraphError::ReadOnly)
    ));
    drop(tx);
}

#[test]
fn sync_modes_smoke() {
    for mode in [SyncMode::NoMsync, SyncMode::MsyncOnCommit, SyncMode::AlwaysMsync] {
        let dir = tempdir().unwrap();
        let config = common::unique_config();
        let options = OpenOptions::create().sync_mode(mode);
        {
            let graph = Graph::open(dir.path(), &config, &options).unwrap();
            let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
            let n = graph.add_node(StringId(0)).unwrap();
            let id = graph.intern("v").unwrap();
            n.set_property(id, &Property::Integer(7)).unwrap();
            tx.commit().unwrap();
        }
        let graph = common::reopen_graph(dir.path(), &config);
        let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
        assert_eq!(graph.get_nodes().unwrap().collect_nodes().unwrap().len(), 1);
        drop(tx);
    }
}

#[test]
fn nested_dependent_transactions_are_rejected() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
    assert!(matches!(
        Transaction::begin(&graph, TxMode::ReadWrite),
        Err(GraphError::NotImplemented)
    ));
    drop(tx);
}
