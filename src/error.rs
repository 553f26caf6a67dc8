//! Error types for the fallible construction paths.
//!
//! Construction is the only fallible surface of this crate: the allocator
//! can be exhausted, or a requested array can overflow `Layout` arithmetic.
//! Copy, move, reset, swap, and upgrade are total and never fail.

use std::alloc::Layout;

use thiserror::Error;

/// Error returned by the `try_` constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The requested element count overflows `Layout` arithmetic.
    #[error("allocation layout overflow for {elements} element(s) of `{type_name}`")]
    Layout {
        /// Number of elements requested.
        elements: usize,
        /// Element type name, for diagnostics.
        type_name: &'static str,
    },

    /// The system allocator returned null.
    #[error("allocator exhausted: failed to allocate {size} bytes (align {align})")]
    Exhausted {
        /// Requested allocation size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
}

/// Fatal path used by the non-`try` constructors.
///
/// Allocator exhaustion is routed through [`std::alloc::handle_alloc_error`]
/// so the global OOM hook applies; layout overflow is a caller bug and
/// panics with the error's display form.
pub(crate) fn alloc_failure(err: AllocError) -> ! {
    match err {
        AllocError::Exhausted { size, align } => {
            let layout =
                Layout::from_size_align(size, align).unwrap_or_else(|_| Layout::new::<u8>());
            std::alloc::handle_alloc_error(layout)
        }
        err @ AllocError::Layout { .. } => panic!("{err}"),
    }
}
