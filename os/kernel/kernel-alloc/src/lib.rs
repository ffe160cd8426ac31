//! # Physical Frame Allocation
//!
//! This crate provides the physical page allocator the memory manager builds
//! on. Everything above it (page tables, region mappings, descriptor slabs)
//! consumes 4 KiB frames through the [`PhysicalPageAllocator`] trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Region Allocator (kernel-mm)           │
//! │    • Page directories / tables                      │
//! │    • Committed region pages                         │
//! │    • Descriptor slabs                               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ alloc_page / free_page / set_page_mark
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Page Allocator                   │
//! │    • 4KiB page frame management                     │
//! │    • Bitmap-based free/used tracking                │
//! │    • Low 4 MiB permanently reserved                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//! * **Bitmap Management**: one bit per frame, set while in use
//! * **No-Heap Design**: the bitmap storage is supplied by the caller
//! * **Explicit Marks**: exact-target mappings claim specific frames with
//!   [`PhysicalPageAllocator::set_page_mark`]
//!
//! ## Safety Considerations
//! * The allocator never touches the frames it hands out; zeroing is the
//!   caller's job (usually through the temporary mapping window).

#![cfg_attr(not(test), no_std)]

pub mod frame_alloc;

pub use frame_alloc::{BitmapFrameAlloc, PhysicalPageAllocator};
