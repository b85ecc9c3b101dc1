//! Tests for the #[derive(Trace)] macro.

use cyclic_rc::{collect_full, Cc, Trace, Tracer, VisitTag};
use std::cell::RefCell;
use std::collections::HashMap;

fn edges<T: Trace>(value: &T) -> usize {
    let mut tracer = Tracer::new(VisitTag::User(0));
    value.trace(&mut tracer);
    tracer.edge_count()
}

/// A simple struct with a Cc field.
#[derive(Trace)]
struct SimpleNode {
    value: i32,
    next: Option<Cc<Self>>,
}

#[test]
fn test_derive_simple_struct() {
    let node = Cc::new(SimpleNode {
        value: 42,
        next: None,
    });
    assert_eq!(node.value, 42);
    assert!(node.next.is_none());
    assert_eq!(edges(&*node), 0);
}

#[test]
fn test_derive_with_cc_field() {
    let node1 = Cc::new(SimpleNode {
        value: 1,
        next: None,
    });
    let node2 = SimpleNode {
        value: 2,
        next: Some(Cc::clone(&node1)),
    };
    assert_eq!(node2.value, 2);
    assert_eq!(node2.next.as_ref().map(|n| n.value), Some(1));
    assert_eq!(edges(&node2), 1);
}

/// Tuple struct.
#[derive(Trace)]
struct Pair(Cc<u8>, Cc<u8>);

#[test]
fn test_derive_tuple_struct() {
    let leaf = Cc::new(1);
    let pair = Pair(Cc::clone(&leaf), Cc::clone(&leaf));
    assert_eq!(*pair.0 + *pair.1, 2);
    assert_eq!(edges(&pair), 2);
}

/// Enum with every variant shape.
#[derive(Trace)]
enum Shape {
    Empty,
    Leaf(Cc<u8>),
    Branch { left: Cc<u8>, right: Cc<u8>, label: String },
}

#[test]
fn test_derive_enum() {
    let leaf = Cc::new(3);
    assert_eq!(edges(&Shape::Empty), 0);
    assert_eq!(edges(&Shape::Leaf(Cc::clone(&leaf))), 1);
    let branch = Shape::Branch {
        left: Cc::clone(&leaf),
        right: Cc::clone(&leaf),
        label: String::from("b"),
    };
    if let Shape::Branch { label, .. } = &branch {
        assert_eq!(label, "b");
    }
    assert_eq!(edges(&branch), 2);
}

/// Skipped fields are not reported.
#[derive(Trace)]
struct WithSkip {
    traced: Cc<u8>,
    #[cyclic_rc(skip)]
    hidden: Cc<u8>,
}

#[derive(Trace)]
enum SkipVariant {
    Two(Cc<u8>, #[cyclic_rc(skip)] Cc<u8>),
}

#[test]
fn test_derive_skip() {
    let leaf = Cc::new(4);
    let value = WithSkip {
        traced: Cc::clone(&leaf),
        hidden: Cc::new(5),
    };
    assert_eq!(*value.hidden, 5);
    assert_eq!(edges(&value), 1);

    let SkipVariant::Two(first, second) = SkipVariant::Two(Cc::clone(&leaf), Cc::new(6));
    assert_eq!(*first + *second, 10);
    assert_eq!(edges(&SkipVariant::Two(Cc::clone(&leaf), Cc::new(6))), 1);
}

/// Generic struct gets a `Trace` bound on its parameter.
#[derive(Trace)]
struct Wrapper<T> {
    inner: Vec<T>,
    index: HashMap<String, T>,
}

#[test]
fn test_derive_generic() {
    let leaf = Cc::new(7);
    let mut index = HashMap::new();
    index.insert(String::from("a"), Cc::clone(&leaf));
    let wrapper = Wrapper {
        inner: vec![Cc::clone(&leaf), Cc::clone(&leaf)],
        index,
    };
    assert_eq!(edges(&wrapper), 3);
}

mod renamed {
    pub use cyclic_rc as runtime;
}

#[derive(Trace)]
#[cyclic_rc(crate = renamed::runtime)]
struct Renamed {
    next: RefCell<Option<Cc<Renamed>>>,
}

#[test]
fn test_derive_crate_path_and_cycle() {
    let a = Cc::new(Renamed {
        next: RefCell::new(None),
    });
    *a.next.borrow_mut() = Some(Cc::clone(&a));
    assert_eq!(edges(&*a), 1);
    drop(a);
    collect_full();
}
