//! # Grip
//!
//! Ownership handles over a single reference-count hub:
//!
//! - **Exclusive**: [`Unique`] / [`UniqueArray`]: move-only sole
//!   ownership, no bookkeeping
//! - **Shared**: [`Shared`] / [`SharedArray`]: atomic reference counting
//!   through a hub
//! - **Weak**: [`Weak`] / [`WeakArray`]: non-owning observers that can
//!   attempt an upgrade
//! - **Combined allocation**: `Shared::new` and friends place the managed
//!   object(s) and the hub in one aligned block
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           GRIP                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │   Unique   │   │   Shared   │   │    Weak    │            │
//! │  │ (unique.rs)│   │ (shared.rs)│   │  (weak.rs) │            │
//! │  └────────────┘   └─────┬──────┘   └─────┬──────┘            │
//! │                         │                │                   │
//! │                         └───────┬────────┘                   │
//! │                                 │                            │
//! │  ┌────────────┐   ┌─────────────┴──┐   ┌────────────┐        │
//! │  │  Combined  │   │      Hub       │   │   Stats    │        │
//! │  │ (block.rs) │   │   (hub.rs)     │   │ (stats.rs) │        │
//! │  └────────────┘   └────────────────┘   └────────────┘        │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sharing model
//!
//! Copies of a shared handle may be used freely from different threads;
//! count traffic is atomic and lock-free. One handle *instance* is not a
//! synchronization point: state changes take `&mut self`, so the borrow
//! checker enforces the single-mutator rule. The managed object's data is
//! not synchronized by this crate; wrap it in a lock if you mutate it
//! through [`Shared::get`].
//!
//! ## Example
//!
//! ```rust
//! use grip::Shared;
//!
//! let a = Shared::new(100);
//! let b = a.clone();
//! assert_eq!(*b, 100);
//! assert_eq!(a.use_count(), 2);
//!
//! let w = a.downgrade();
//! drop(a);
//! drop(b);
//! assert!(w.expired());
//! assert!(w.upgrade().is_none());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod block;
mod error;
mod hub;
mod shared;
mod stats;
mod unique;
mod weak;

pub use error::AllocError;
pub use shared::{Shared, SharedArray};
pub use stats::{stats, StatsSnapshot};
pub use unique::{Unique, UniqueArray};
pub use weak::{Weak, WeakArray};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
