//! # Linear and Physical Memory Address Types
//!
//! Strongly typed wrappers for the 32-bit addresses handled by the i386
//! paging and memory management code.
//!
//! ## Overview
//!
//! Protected-mode paging translates a **linear** address (the result of
//! segmentation, flat in this kernel) into a **physical** address. Both are
//! plain `u32` values at the hardware level; mixing them up is the classic
//! source of page-table corruption. This crate keeps them apart at compile time:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 32-bit address, either linear or physical. |
//! | [`LinearAddress`] | An address as seen by the CPU after segmentation; translated by paging. |
//! | [`PhysicalAddress`] | A frame address in RAM or MMIO space. |
//!
//! ## Page Sizes
//!
//! Classic 32-bit paging knows two leaf sizes, exposed as marker types
//! implementing [`PageSize`]:
//!
//! - [`Size4K`]: 4 KiB pages mapped by a page table entry
//! - [`Size4M`]: 4 MiB pages mapped directly by a directory entry (`PS=1`)
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let la = LinearAddress::new(0xC000_1234);
//! assert_eq!(la.align_down::<Size4K>().as_u32(), 0xC000_1000);
//! assert_eq!(la.offset::<Size4K>(), 0x234);
//!
//! assert_eq!(pages_for(1), 1);
//! assert_eq!(pages_for(4097), 2);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as map keys.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod linear_address;
mod memory_address;
mod physical_address;

use core::fmt;
use core::hash::Hash;

pub use crate::linear_address::LinearAddress;
pub use crate::memory_address::MemoryAddress;
pub use crate::physical_address::PhysicalAddress;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u32;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;

    fn as_str() -> &'static str;
}

/// 4 KiB page (4096 bytes).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u32 = 4096;
    const SHIFT: u32 = 12;

    fn as_str() -> &'static str {
        "4K"
    }
}

/// 4 MiB page (`4_194_304` bytes), one full page table's worth.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4M;
impl sealed::Sealed for Size4M {}
impl PageSize for Size4M {
    const SIZE: u32 = 4 * 1024 * 1024;
    const SHIFT: u32 = 22;

    fn as_str() -> &'static str {
        "4M"
    }
}

impl fmt::Display for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Display for Size4M {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl fmt::Debug for Size4M {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

/// The base page size used by every allocation.
pub const PAGE_SIZE: u32 = Size4K::SIZE;

/// Mask selecting the frame bits of an address.
pub const PAGE_MASK: u32 = !(PAGE_SIZE - 1);

/// Rounds `bytes` up to the next multiple of [`PAGE_SIZE`].
///
/// Returns `None` if the result does not fit into 32 bits.
#[inline]
#[must_use]
pub const fn align_up(bytes: u32) -> Option<u32> {
    match bytes.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & PAGE_MASK),
        None => None,
    }
}

/// Number of 4 KiB pages needed to hold `bytes`.
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(0xFFFF_FFFF), 0x10_0000);
/// ```
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_pages() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(0x1000));
        assert_eq!(align_up(0x1000), Some(0x1000));
        assert_eq!(align_up(0xFFFF_F001), None);
    }

    #[test]
    fn page_counts() {
        assert_eq!(pages_for(0x1000), 1);
        assert_eq!(pages_for(0x1001), 2);
        assert_eq!(pages_for(0x3000), 3);
    }
}
