//! Integration tests for collection metrics.
//!
//! Global counters are shared by every test in this binary, so assertions on
//! them compare against a snapshot and only expect growth.

use cyclic_rc::{
    buffer_stats, collect, collect_full, global_metrics, last_collect_metrics, Cc,
    CollectMetrics, CollectionType, Trace, MEDIUM_BUCKETS,
};
use std::cell::RefCell;

#[derive(Trace)]
struct Node {
    next: RefCell<Option<Cc<Node>>>,
}

fn make_garbage_ring(len: usize) {
    let head = Cc::new(Node {
        next: RefCell::new(None),
    });
    let mut tail = Cc::clone(&head);
    for _ in 1..len {
        let node = Cc::new(Node {
            next: RefCell::new(None),
        });
        *tail.next.borrow_mut() = Some(Cc::clone(&node));
        tail = node;
    }
    *tail.next.borrow_mut() = Some(head);
}

#[test]
fn test_metrics_before_any_collection() {
    let metrics = std::thread::spawn(last_collect_metrics).join().unwrap();
    assert_eq!(metrics, CollectMetrics::new());
    assert_eq!(metrics.collection_type, CollectionType::None);
}

#[test]
fn test_full_collection_metrics() {
    collect_full();
    make_garbage_ring(10);
    let before = global_metrics().total_objects_collected();

    collect_full();
    let metrics = last_collect_metrics();
    assert_eq!(metrics.collection_type, CollectionType::Full);
    assert_eq!(metrics.passes, MEDIUM_BUCKETS + 2);
    assert_eq!(metrics.objects_collected, 10);
    assert_eq!(metrics.objects_freed, 10);
    assert_eq!(metrics.candidates_remaining, 0);
    assert!(!metrics.multithreaded);
    assert!(metrics.roots_examined >= 1);
    assert!(global_metrics().total_objects_collected() >= before + 10);
}

#[test]
fn test_partial_collection_metrics() {
    collect_full();
    make_garbage_ring(3);
    let buffered = buffer_stats().total_buffered();
    assert!(buffered >= 1);

    collect();
    let metrics = last_collect_metrics();
    assert_eq!(metrics.collection_type, CollectionType::Partial);
    assert_eq!(metrics.passes, 1);
    assert_eq!(metrics.objects_collected, 0);
    assert_eq!(metrics.candidates_remaining, buffered);
    collect_full();
}

#[test]
fn test_global_counters_grow() {
    let metrics = global_metrics();
    let collections = metrics.total_collections();
    let full = metrics.total_full_collections();
    let released = metrics.total_objects_released();
    let buffered = metrics.total_candidates_buffered();

    let x = Cc::new(1);
    drop(Cc::clone(&x));
    drop(x);
    collect_full();

    assert!(metrics.total_collections() > collections);
    assert!(metrics.total_full_collections() > full);
    assert!(metrics.total_objects_released() > released);
    assert!(metrics.total_candidates_buffered() > buffered);
}

#[test]
fn test_buffer_stats_track_aging() {
    collect_full();
    let x = Cc::new(Node {
        next: RefCell::new(None),
    });
    drop(Cc::clone(&x));
    assert_eq!(buffer_stats().young, 1);

    collect();
    let stats = buffer_stats();
    assert_eq!(stats.young, 0);
    assert_eq!(stats.medium[0], 1);
    assert_eq!(stats.total_buffered(), 1);
    collect_full();
    assert_eq!(buffer_stats().total_buffered(), 0);
}
