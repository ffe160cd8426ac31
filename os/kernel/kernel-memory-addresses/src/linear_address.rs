use crate::{MemoryAddress, PageSize, Size4K};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Linear (paged) memory address.
///
/// The kernel uses flat segments, so linear addresses equal the pointers the
/// code dereferences. Paging splits them as follows:
///
/// ```text
/// | 31‒22     | 21‒12 | 11‒0   |
/// | Directory | Table | Offset |
/// ```
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let la = LinearAddress::new(0xC040_3123);
/// assert_eq!(la.directory_index(), 769);
/// assert_eq!(la.table_index(), 3);
/// assert_eq!(la.offset::<Size4K>(), 0x123);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LinearAddress(MemoryAddress);

impl LinearAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.as_u32() == 0
    }

    /// Page directory slot (bits 31..=22).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.as_u32() >> 22) as usize
    }

    /// Page table slot (bits 21..=12).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.as_u32() >> Size4K::SHIFT) & 0x3FF) as usize
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> u32 {
        self.0.offset::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0.align_down::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn align_up<S: PageSize>(self) -> Option<Self> {
        match self.0.align_up::<S>() {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0.is_aligned::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The address `index` 4 KiB pages above this one.
    #[inline]
    #[must_use]
    pub const fn page_offset(self, index: u32) -> Self {
        Self::new(self.as_u32() + index * Size4K::SIZE)
    }
}

impl fmt::Debug for LinearAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for LinearAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for LinearAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<LinearAddress> for u32 {
    #[inline]
    fn from(a: LinearAddress) -> Self {
        a.as_u32()
    }
}

impl Add<u32> for LinearAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for LinearAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size4M;

    #[test]
    fn indices_split_the_address() {
        let la = LinearAddress::new(0xFFFF_F004);
        assert_eq!(la.directory_index(), 1023);
        assert_eq!(la.table_index(), 1023);
        assert_eq!(la.offset::<Size4K>(), 4);
    }

    #[test]
    fn large_page_alignment() {
        let la = LinearAddress::new(0x0040_1000);
        assert_eq!(la.align_down::<Size4M>().as_u32(), 0x0040_0000);
        assert_eq!(la.align_up::<Size4M>(), Some(LinearAddress::new(0x0080_0000)));
        assert_eq!(LinearAddress::new(0xFFFF_F001).align_up::<Size4K>(), None);
    }
}
