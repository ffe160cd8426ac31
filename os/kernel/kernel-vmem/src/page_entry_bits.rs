use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Represents a single 32-bit i386 paging entry in its raw bitfield form.
///
/// Directory entries (PDE) and table entries (PTE) share this layout in
/// classic (non-PAE) paging; only `large_page` differs in meaning. The type
/// allows read/write access to individual bits without manual masking or
/// shifting, using the [`bitfield_struct`](https://docs.rs/bitfield-struct/)
/// derive.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page (PDE) |
/// | 8      | `G`             | Global (PTE only) |
/// | 9      | Fixed (OS)      | Frame is not owned by the physical allocator |
/// | 10–11  | OS available    | Unused |
/// | 12–31  | `frame`         | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// For a PDE the bit gates the whole 4 MiB span; both levels must allow
    /// user access for a user-mode reference to succeed.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Only meaningful in a PDE with `CR4.PSE`.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Fixed (bit 9, OS available).
    ///
    /// The mapped frame belongs to someone else (MMIO, page tables, kernel
    /// image); freeing the mapping must not return it to the allocator.
    pub fixed: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    /// Frame number used by reserved-but-uncommitted entries.
    pub const RESERVED_FRAME: u32 = 0xF_FFFF;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_number(phys.frame());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::from_frame(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame_number()
    }

    /// Supervisor, present, writable, fixed: the shape of every structural
    /// entry (self map, identity map, kernel image, temporary slots).
    #[inline]
    #[must_use]
    pub const fn new_fixed_rw(phys: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_fixed(true)
            .with_physical_address(phys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_hardware() {
        let e = PageEntryBits::new()
            .with_present(true)
            .with_user_access(true)
            .with_cache_disabled(true)
            .with_fixed(true);
        assert_eq!(e.into_bits(), 0x0000_0215);
    }

    #[test]
    fn frame_round_trips_through_raw_bits() {
        let e = PageEntryBits::new_fixed_rw(PhysicalAddress::new(0xFEE0_0000));
        let raw: u32 = e.into();
        assert_eq!(raw, 0xFEE0_0203);
        assert_eq!(PageEntryBits::from(raw).physical_address().as_u32(), 0xFEE0_0000);
    }
}
