//! Integration tests for the tracing feature.
//!
//! These tests verify that collection spans and phase events are emitted.

#![cfg(feature = "tracing")]

use cyclic_rc::{collect, collect_full, sync, Cc, Trace};
use std::cell::RefCell;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Captures formatted log output in memory.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture(f: impl FnOnce()) -> String {
    let output = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(output.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    output.contents()
}

#[derive(Trace)]
struct Node {
    next: RefCell<Option<Cc<Node>>>,
}

#[test]
fn test_basic_collection_with_tracing() {
    let x = Cc::new(42);
    let log = capture(collect);
    assert_eq!(*x, 42);
    assert!(log.contains("cc_collect"));
    assert!(log.contains("collect_end"));
}

#[test]
fn test_full_collection_logs_every_phase() {
    let log = capture(|| {
        let a = Cc::new(Node {
            next: RefCell::new(None),
        });
        *a.next.borrow_mut() = Some(Cc::clone(&a));
        drop(a);
        collect_full();
    });

    assert!(log.contains("full=true"));
    assert!(log.contains("mode=\"local\""));
    for phase in ["Mark", "Scan", "CollectRoots"] {
        assert!(log.contains(phase), "missing phase {phase}");
    }
    assert!(log.contains("phase_start"));
    assert!(log.contains("phase_end"));
    assert!(log.contains("objects_collected=1"));
}

#[test]
fn test_shared_collection_is_tagged() {
    let log = capture(sync::collect_full);
    assert!(log.contains("mode=\"shared\""));
}
