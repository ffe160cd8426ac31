//! # i386 Page Directory and Page Table Entries
//!
//! - [`PdEntry`]: a page directory entry (PDE). Points at a page table, or maps a
//!   4 MiB page when `PS=1` (not used by this kernel).
//! - [`PtEntry`]: a page table entry (PTE). Every present entry maps one 4 KiB page.
//!
//! ## Invariants & Notes
//!
//! - Both tables hold exactly 1024 four-byte entries and occupy one frame.
//! - A PTE is *used* when its raw value is non-zero. Present entries map a
//!   frame; non-present entries with frame [`PageEntryBits::RESERVED_FRAME`]
//!   reserve the linear page without backing it.
//! - After modifying active mappings, the caller must perform any required TLB maintenance.

use crate::PageEntryBits;
use kernel_memory_addresses::PhysicalAddress;

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PdEntry(PageEntryBits);

/// A single Page Table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PtEntry(PageEntryBits);

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Entry pointing at the page table in frame `table`.
    ///
    /// Present, writable and fixed; `user` opens the span to ring 3.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalAddress, user: bool) -> Self {
        Self(PageEntryBits::new_fixed_rw(table).with_user_access(user))
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// Physical address of the referenced page table.
    #[inline]
    #[must_use]
    pub const fn table_address(self) -> PhysicalAddress {
        self.0.physical_address()
    }

    /// `true` if the entry references any table, present or not.
    #[inline]
    #[must_use]
    pub const fn has_table(self) -> bool {
        self.0.frame() != 0
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PtEntry {
    /// Create a zero (unused) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Create a present 4 KiB leaf mapping `page` with the given flags.
    ///
    /// Forces `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_4k(page: PhysicalAddress, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(page);
        Self(flags)
    }

    /// Create a non-present entry that keeps the linear page reserved.
    #[inline]
    #[must_use]
    pub const fn reserved(mut flags: PageEntryBits) -> Self {
        flags.set_present(false);
        flags.set_physical_address(PhysicalAddress::from_frame(PageEntryBits::RESERVED_FRAME));
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// `true` for present mappings and reservations alike.
    #[inline]
    #[must_use]
    pub const fn is_used(self) -> bool {
        self.0.into_bits() != 0
    }

    /// `true` for a reservation placeholder.
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        !self.0.present() && self.0.frame() == PageEntryBits::RESERVED_FRAME
    }

    #[inline]
    #[must_use]
    pub const fn is_fixed(self) -> bool {
        self.0.fixed()
    }

    /// If present, the mapped physical page.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(self.0.physical_address())
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pte_4k_leaf() {
        let e = PtEntry::make_4k(
            PhysicalAddress::new(0x0055_5000),
            PageEntryBits::new().with_writable(true).with_user_access(true),
        );
        assert_eq!(e.page_4k(), Some(PhysicalAddress::new(0x0055_5000)));
        assert!(e.flags().user_access());
        assert!(!e.flags().large_page());
        assert!(e.is_used());
        assert!(!e.is_reserved());
    }

    #[test]
    fn reservation_is_used_but_not_present() {
        let e = PtEntry::reserved(PageEntryBits::new().with_writable(true));
        assert!(e.is_used());
        assert!(e.is_reserved());
        assert_eq!(e.page_4k(), None);
        assert!(!PtEntry::zero().is_used());
    }

    #[test]
    fn pde_references_table() {
        let e = PdEntry::table(PhysicalAddress::new(0x0040_1000), true);
        assert!(e.is_present());
        assert!(e.flags().fixed());
        assert!(e.flags().user_access());
        assert_eq!(e.table_address().as_u32(), 0x0040_1000);
        assert_eq!(PdEntry::from_raw(e.raw()), e);
    }
}
