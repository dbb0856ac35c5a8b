//! An exponential (powers of 2), sorted (best memory utilization)
//! segregated-fit free-list allocator for page ranges.
//!
//! Unlike common allocators, no actual memory is managed - the allocator
//! only tracks ownership of page indices `0..N` and all metadata is kept
//! out-of-band. Pages themselves are opaque.
//!
//! ```
//! use pagealloc::{PageAllocator, INV};
//!
//! let mut pa = PageAllocator::new(1024, 16).unwrap();
//!
//! let base = pa.create_block(100);
//! assert_ne!(base, INV);
//! assert_eq!(pa.used_pages(), 100);
//!
//! assert!(pa.free_block(base));
//! assert_eq!(pa.free_pages(), 1024);
//! ```

pub mod mem;
pub mod utils;

pub use crate::mem::allocator::{InvalidArgument, PageAllocator};

/// Sentinel handle meaning "no valid block".
///
/// Returned by [`PageAllocator::create_block`] when the request cannot be
/// satisfied. The total page count of an allocator is always strictly
/// smaller than this value.
pub const INV: u64 = u64::MAX;
