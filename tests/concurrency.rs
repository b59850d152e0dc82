//! Parallel transactions from multiple threads.

mod common;

use pmgraph::{GraphError, Property, StringId, Transaction, TxMode};
use tempfile::tempdir;

#[test]
fn two_threads_insert_concurrently() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    const PER_THREAD: usize = 25;

    std::thread::scope(|s| {
        for t in 0..2u32 {
            let graph = &graph;
            s.spawn(move || {
                let mut done = 0;
                while done < PER_THREAD {
                    // Contention on stripes or allocator lanes surfaces as
                    // LockTimeout; back off and retry the transaction.
                    let attempt = (|| -> pmgraph::Result<()> {
                        let tx = Transaction::begin(graph, TxMode::ReadWrite)?;
                        let node = graph.add_node(StringId(0))?;
                        node.set_property(
                            StringId(0),
                            &Property::Integer((t as i64) << 32 | done as i64),
                        )?;
                        tx.commit()
                    })();
                    match attempt {
                        Ok(()) => done += 1,
                        Err(GraphError::LockTimeout) => {
                            std::thread::sleep(std::time::Duration::from_millis(1));
                        }
                        Err(e) => panic!("unexpected error: {e:?}"),
                    }
                }
            });
        }
    });

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    let nodes = graph.get_nodes().unwrap().collect_nodes().unwrap();
    assert_eq!(nodes.len(), 2 * PER_THREAD);
    let mut values = std::collections::HashSet::new();
    for node in nodes {
        let v = node
            .get_property(StringId(0))
            .unwrap()
            .int_value()
            .unwrap();
        assert!(values.insert(v), "duplicate payload {v}");
    }
    drop(tx);
}

#[test]
fn readers_run_alongside_a_writer() {
    let dir = tempdir().unwrap();
    let config = common::unique_config();
    let graph = common::create_graph(dir.path(), &config);

    {
        let tx = Transaction::begin(&graph, TxMode::ReadWrite).unwrap();
        for _ in 0..10 {
            graph.add_node(StringId(0)).unwrap();
        }
        tx.commit().unwrap();
    }

    std::thread::scope(|s| {
        for _ in 0..3 {
            let graph = &graph;
            s.spawn(move || {
                let mut reads = 0;
                while reads < 20 {
                    let attempt = (|| -> pmgraph::Result<usize> {
                        let tx = Transaction::begin(graph, TxMode::ReadOnly)?;
                        let n = graph.get_nodes()?.collect_nodes()?.len();
                        drop(tx);
                        Ok(n)
                    })();
                    match attempt {
                        Ok(n) => {
                            assert!(n >= 10);
                            reads += 1;
                        }
                        Err(GraphError::LockTimeout) => {
                            std::thread::sleep(std::time::Duration::from_millis(1));
                        }
                        Err(e) => panic!("unexpected error: {e:?}"),
                    }
                }
            });
        }
        let graph = &graph;
        s.spawn(move || {
            let mut added = 0;
            while added < 5 {
                let attempt = (|| -> pmgraph::Result<()> {
                    let tx = Transaction::begin(graph, TxMode::ReadWrite)?;
                    graph.add_node(StringId(0))?;
                    tx.commit()
                })();
                match attempt {
                    Ok(()) => added += 1,
                    Err(GraphError::LockTimeout) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
        });
    });

    let tx = Transaction::begin(&graph, TxMode::ReadOnly).unwrap();
    assert_eq!(graph.get_nodes().unwrap().collect_nodes().unwrap().len(), 15);
    drop(tx);
}
