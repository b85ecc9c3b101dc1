//! Reference counting with synchronous cycle collection for Rust.
//!
//! `cyclic-rc` provides a `Cc<T>` smart pointer that behaves like `Rc<T>`:
//! values are destroyed the moment their last handle goes away. Handles that
//! only keep each other alive are found by **trial deletion** (Bacon-Rajan):
//! every handle drop that leaves a count above zero buffers the target as a
//! possible cycle root, and a collection subtracts internal edges from the
//! buffered subgraphs to see what is left with no outside owner.
//!
//! # Features
//!
//! - **Prompt destruction**: acyclic garbage never waits for a collection
//! - **Generational root buffers**: candidates age through
//!   [`MEDIUM_BUCKETS`] buckets so short-lived decrements are filtered out
//!   cheaply
//! - **Bounded stack use**: traversals and destruction are iterative, so long
//!   chains never overflow the stack
//! - **Two configurations**: [`Local`] per-thread collectors, and a
//!   [`Shared`] process-wide one for handles that cross threads ([`sync`])
//!
//! # Quick Start
//!
//! ```
//! use cyclic_rc::{Cc, Trace};
//!
//! let x = Cc::new(42);
//! println!("Value: {}", *x);
//!
//! #[derive(Trace)]
//! struct Node {
//!     value: i32,
//!     next: Option<Cc<Node>>,
//! }
//!
//! let node = Cc::new(Node { value: 1, next: None });
//! assert_eq!(node.value, 1);
//! ```
//!
//! # Handling Cycles
//!
//! A tree whose root points at itself through both children is never
//! released by counting alone:
//!
//! ```
//! use cyclic_rc::{collect_full, global_metrics, Cc, Trace};
//! use std::cell::RefCell;
//!
//! #[derive(Trace, Default)]
//! struct Tree {
//!     left: RefCell<Cc<Tree>>,
//!     right: RefCell<Cc<Tree>>,
//! }
//!
//! let root = Cc::new(Tree::default());
//! *root.left.borrow_mut() = Cc::clone(&root);
//! *root.right.borrow_mut() = Cc::clone(&root);
//! assert_eq!(Cc::use_count(&root), 3);
//!
//! let before = global_metrics().total_objects_collected();
//! drop(root);
//! collect_full(); // the cycle is detected and freed
//! assert!(global_metrics().total_objects_collected() > before);
//! ```
//!
//! # Thread Safety
//!
//! `Cc<T>` is `!Send` and `!Sync`; each thread has its own collector. Use
//! [`sync::Cc<T>`](sync::Cc) for handles shared between threads.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod collector;
pub mod lifecycle;
mod metrics;
pub mod mode;
mod ptr;
mod slot;
mod state;
pub mod sync;
mod trace;
mod tracing;

// Re-export public API
pub use collector::{buffer_stats, collect, collect_full, is_freeing, BufferStats, MEDIUM_BUCKETS};
pub use metrics::{global_metrics, last_collect_metrics, CollectMetrics, CollectionType, GlobalMetrics};
pub use mode::{Local, Mode, Shared};
pub use ptr::Cc;
pub use trace::{Trace, Tracer, VisitTag};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use cyclic_rc_derive::Trace;
