//! Basic handle tests for cyclic-rc.

use cyclic_rc::{collect, Cc, Trace, Tracer, VisitTag};
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::rc::Rc;

/// Counts how many times it was dropped.
#[derive(Trace)]
struct Tracked {
    drops: Rc<Cell<usize>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn test_basic_allocation() {
    let x = Cc::new(42);
    assert_eq!(*x, 42);
}

#[test]
fn test_deref() {
    let x = Cc::new(String::from("hello"));
    assert_eq!(&*x, "hello");
    assert_eq!(x.len(), 5);
}

#[test]
fn test_clone() {
    let x = Cc::new(42);
    let y = Cc::clone(&x);
    assert_eq!(*x, 42);
    assert_eq!(*y, 42);
    assert!(Cc::ptr_eq(&x, &y));
}

#[test]
fn test_use_count() {
    let x = Cc::new(42);
    assert_eq!(Cc::use_count(&x), 1);
    assert!(Cc::is_unique(&x));

    let y = Cc::clone(&x);
    assert_eq!(Cc::use_count(&x), 2);
    assert_eq!(Cc::use_count(&y), 2);
    assert!(!Cc::is_unique(&x));

    drop(y);
    assert_eq!(Cc::use_count(&x), 1);
}

#[test]
fn test_last_handle_drop_destroys_immediately() {
    let drops = Rc::new(Cell::new(0));
    let x = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    let y = Cc::clone(&x);
    drop(x);
    assert_eq!(drops.get(), 0);
    drop(y);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_drop_and_collect() {
    let x = Cc::new(42);
    drop(x);
    collect(); // Should not panic
}

#[test]
fn test_multiple_allocations() {
    let values: Vec<Cc<i32>> = (0..100).map(Cc::new).collect();
    for (i, cc) in values.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let i_i32 = i as i32;
        assert_eq!(**cc, i_i32);
    }
}

#[test]
fn test_ptr_eq() {
    let x = Cc::new(42);
    let y = Cc::clone(&x);
    let z = Cc::new(42);

    assert!(Cc::ptr_eq(&x, &y));
    assert!(!Cc::ptr_eq(&x, &z));
    // Value equality is separate from identity.
    assert_eq!(x, z);
}

#[test]
fn test_null_handles() {
    let n: Cc<i32> = Cc::default();
    assert!(Cc::is_null(&n));
    assert_eq!(Cc::use_count(&n), 0);
    assert!(Cc::get(&n).is_none());
    assert!(!Cc::is_unique(&n));

    let m = n.clone();
    assert!(Cc::ptr_eq(&n, &m));
}

#[test]
#[should_panic(expected = "null Cc")]
fn test_deref_null_panics() {
    let n: Cc<String> = Cc::null();
    let _ = n.len();
}

#[test]
fn test_reset() {
    let drops = Rc::new(Cell::new(0));
    let mut x = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    Cc::reset(&mut x);
    assert!(Cc::is_null(&x));
    assert_eq!(drops.get(), 1);

    // Resetting a null handle is a no-op.
    Cc::reset(&mut x);
    assert!(Cc::is_null(&x));
}

#[test]
fn test_reset_with_releases_old_target() {
    let drops = Rc::new(Cell::new(0));
    let mut x = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    let replacement = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    let keep = Cc::clone(&replacement);
    Cc::reset_with(&mut x, replacement);
    assert_eq!(drops.get(), 1);
    assert!(Cc::ptr_eq(&x, &keep));
    assert_eq!(Cc::use_count(&keep), 2);
}

#[test]
fn test_assignment_is_destroy_then_reinitialize() {
    let drops = Rc::new(Cell::new(0));
    let mut x = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    x = Cc::new(Tracked {
        drops: Rc::clone(&drops),
    });
    assert_eq!(drops.get(), 1);
    assert_eq!(Cc::use_count(&x), 1);
}

#[test]
fn test_swap_keeps_counts() {
    let mut a = Cc::new(1);
    let mut b = Cc::new(2);
    let a2 = Cc::clone(&a);

    Cc::swap(&mut a, &mut b);
    assert_eq!(*a, 2);
    assert_eq!(*b, 1);
    assert_eq!(Cc::use_count(&b), 2);
    assert_eq!(Cc::use_count(&a), 1);
    assert!(Cc::ptr_eq(&b, &a2));
}

#[test]
fn test_move_does_not_touch_count() {
    let a = Cc::new(5);
    let b = Cc::clone(&a);
    let moved = a;
    assert_eq!(Cc::use_count(&moved), 2);
    drop(b);
    assert_eq!(Cc::use_count(&moved), 1);
}

#[test]
fn test_upcast_to_trait_object() {
    let n = Cc::new(11_u32);
    let shown: Cc<dyn Display> = Cc::upcast(Cc::clone(&n), |v| v as &dyn Display);
    assert_eq!(format!("{shown}"), "11");
    assert_eq!(Cc::use_count(&n), 2);
    drop(shown);
    assert_eq!(Cc::use_count(&n), 1);
}

#[test]
fn test_upcast_null_stays_null() {
    let n: Cc<u32> = Cc::null();
    let shown: Cc<dyn Display> = Cc::upcast(n, |v| v as &dyn Display);
    assert!(Cc::is_null(&shown));
}

#[test]
fn test_visit_children_counts_edges() {
    #[derive(Trace)]
    struct Pair {
        left: Cc<u8>,
        right: Option<Cc<u8>>,
        label: String,
    }

    let leaf = Cc::new(0_u8);
    let pair = Cc::new(Pair {
        left: Cc::clone(&leaf),
        right: Some(Cc::clone(&leaf)),
        label: String::from("pair"),
    });

    let mut tracer = Tracer::new(VisitTag::User(7));
    Cc::visit_children(&pair, &mut tracer);
    assert_eq!(tracer.edge_count(), 2);
    assert_eq!(tracer.tag(), VisitTag::User(7));
    assert_eq!(pair.label, "pair");

    let mut tracer = Tracer::new(VisitTag::User(7));
    Cc::visit_children(&Cc::<Pair>::null(), &mut tracer);
    assert_eq!(tracer.edge_count(), 0);
}

#[test]
fn test_formatting() {
    let x = Cc::new(3);
    assert_eq!(format!("{x:?}"), "Cc(3)");
    assert_eq!(format!("{x}"), "3");
    assert!(format!("{x:p}").starts_with("0x"));
}

#[test]
fn test_cc_in_collections() {
    let list: RefCell<Vec<Cc<i32>>> = RefCell::new(Vec::new());
    let shared = Cc::new(9);
    for _ in 0..10 {
        list.borrow_mut().push(Cc::clone(&shared));
    }
    assert_eq!(Cc::use_count(&shared), 11);
    list.borrow_mut().clear();
    assert_eq!(Cc::use_count(&shared), 1);
}

#[test]
fn test_from_value() {
    let x: Cc<&'static str> = Cc::from("from");
    assert_eq!(*x, "from");
}
