//! Tests for the multi-thread configuration.
//!
//! These tests verify that shared handles can cross threads when
//! `T: Send + Sync`, and that cycles built through `parking_lot` locks are
//! collected by the process-wide collector.

#![allow(clippy::items_after_statements)]

use cyclic_rc::sync::{self, Cc};
use cyclic_rc::{Shared, Trace};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// Compile-time assertions for Send + Sync traits
#[allow(dead_code)]
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Cc<i32>>();
    assert_send_sync::<Cc<Mutex<Vec<Cc<String>>>>>();
    assert_send_sync::<cyclic_rc::Cc<u8, Shared>>();
};

/// A shared node that counts its drops.
#[derive(Trace)]
struct Node {
    value: usize,
    next: Mutex<Option<Cc<Node>>>,
    #[cyclic_rc(skip)]
    drops: Arc<AtomicUsize>,
}

impl Node {
    fn new(value: usize, drops: &Arc<AtomicUsize>) -> Cc<Self> {
        Cc::new_shared(Self {
            value,
            next: Mutex::new(None),
            drops: Arc::clone(drops),
        })
    }

    fn link(&self, next: &Cc<Self>) {
        *self.next.lock() = Some(Cc::clone(next));
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_share_across_threads() {
    let x = Cc::new_shared(String::from("shared"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let x = Cc::clone(&x);
            thread::spawn(move || {
                assert_eq!(x.as_str(), "shared");
                Cc::use_count(&x)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap() >= 2);
    }
    assert_eq!(Cc::use_count(&x), 1);
}

#[test]
fn test_concurrent_clone_and_drop() {
    let x = Cc::new_shared(7_u64);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let x = Cc::clone(&x);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let y = Cc::clone(&x);
                    assert_eq!(*y, 7);
                    drop(y);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(Cc::use_count(&x), 1);
}

#[test]
fn test_last_drop_on_other_thread_destroys() {
    let drops = Arc::new(AtomicUsize::new(0));
    let a = Node::new(1, &drops);
    thread::spawn(move || drop(a)).join().unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cycle_through_mutex_is_collected() {
    let drops = Arc::new(AtomicUsize::new(0));
    let a = Node::new(1, &drops);
    let b = Node::new(2, &drops);
    a.link(&b);
    b.link(&a);
    assert_eq!(a.value + b.value, 3);

    let worker = thread::spawn(move || drop(b));
    worker.join().unwrap();
    drop(a);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    sync::collect_full();
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cycle_through_rwlock_is_collected() {
    #[derive(Trace)]
    struct Vertex {
        edges: RwLock<Vec<Cc<Vertex>>>,
        #[cyclic_rc(skip)]
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Vertex {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let vertices: Vec<Cc<Vertex>> = (0..4)
        .map(|_| {
            Cc::new_shared(Vertex {
                edges: RwLock::new(Vec::new()),
                drops: Arc::clone(&drops),
            })
        })
        .collect();
    // Complete graph.
    for from in &vertices {
        for to in &vertices {
            from.edges.write().push(Cc::clone(to));
        }
    }
    drop(vertices);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    sync::collect_full();
    assert_eq!(drops.load(Ordering::SeqCst), 4);
}

#[test]
fn test_live_shared_cycle_survives_collection() {
    let drops = Arc::new(AtomicUsize::new(0));
    let a = Node::new(1, &drops);
    let b = Node::new(2, &drops);
    a.link(&b);
    b.link(&a);
    drop(b);

    sync::collect_full();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    let value = a.next.lock().as_ref().map(|b| b.value);
    assert_eq!(value, Some(2));

    *a.next.lock() = None;
    drop(a);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn test_collections_from_many_threads() {
    let drops = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let drops = Arc::clone(&drops);
            thread::spawn(move || {
                for j in 0..25 {
                    let a = Node::new(i * 100 + j, &drops);
                    a.link(&a);
                    drop(a);
                    sync::collect();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    sync::collect_full();
    assert_eq!(drops.load(Ordering::SeqCst), 100);
}

#[test]
fn test_contended_lock_defers_collection() {
    let drops = Arc::new(AtomicUsize::new(0));
    let a = Node::new(1, &drops);
    a.link(&a);
    let held = Cc::clone(&a);
    drop(a);

    // While this thread holds the lock, the collector cannot see the edge
    // and treats the object as externally owned.
    let guard = held.next.lock();
    let stranger = thread::spawn(sync::collect_full);
    stranger.join().unwrap();
    drop(guard);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(held);
    sync::collect_full();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_is_freeing_and_stats() {
    assert!(!sync::is_freeing());
    sync::collect_full();
    let metrics = sync::last_collect_metrics();
    assert!(metrics.multithreaded);
    assert_eq!(sync::buffer_stats().pending_free, 0);
}

#[test]
fn test_local_and_shared_collectors_are_separate() {
    use std::cell::RefCell;

    let local = cyclic_rc::Cc::new(RefCell::new(0_u8));
    drop(cyclic_rc::Cc::clone(&local));
    assert!(cyclic_rc::Cc::is_buffered(&local));

    sync::collect_full();
    // The shared collector never touches local candidates.
    assert!(cyclic_rc::Cc::is_buffered(&local));
    cyclic_rc::collect_full();
    assert!(!cyclic_rc::Cc::is_buffered(&local));
}
