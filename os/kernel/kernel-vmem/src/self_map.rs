//! # Self-Map Navigator
//!
//! Every directory built by this kernel stores its own physical address in
//! slot [`SELF_MAP_SLOT`](kernel_info::memory::SELF_MAP_SLOT). The MMU then
//! treats the directory as a page table for the top 4 MiB of the address
//! space, which makes every page table of the *active* directory addressable
//! without knowing any physical address:
//!
//! ```text
//!   0xFFC0_0000 + D * 4096      page table of directory slot D
//!   0xFFFF_F000                 the directory itself (slot 1023 of slot 1023)
//!
//!   PTE of linear address A:    0xFFC0_0000 + (A >> 12) * 4
//!   PDE of linear address A:    0xFFFF_F000 + (A >> 22) * 4
//! ```
//!
//! Only the active directory is reachable this way; other directories are
//! edited through the [temporary window](crate::temporary).

use crate::cpu::Cpu;
use crate::page_table::{PdEntry, PtEntry};
use kernel_info::memory::{PD_VA, PT_BASE_VA};
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress, Size4K};

/// Linear address of the directory entry for slot `dir`.
#[inline]
#[must_use]
pub const fn directory_entry_address(dir: usize) -> LinearAddress {
    LinearAddress::new(PD_VA + (dir as u32) * 4)
}

/// Linear address at which the page table for directory slot `dir` is visible.
#[inline]
#[must_use]
pub const fn table_address(dir: usize) -> LinearAddress {
    LinearAddress::new(PT_BASE_VA + (dir as u32) * PAGE_SIZE)
}

/// Linear address of the table entry translating `linear`.
///
/// ```rust
/// # use kernel_memory_addresses::LinearAddress;
/// # use kernel_vmem::self_map::table_entry_address;
/// let la = table_entry_address(LinearAddress::new(0xC040_3000));
/// assert_eq!(la.as_u32(), 0xFFF0_100C);
/// ```
#[inline]
#[must_use]
pub const fn table_entry_address(linear: LinearAddress) -> LinearAddress {
    LinearAddress::new(PT_BASE_VA + (linear.as_u32() >> 12) * 4)
}

/// View of the active address space through the self map.
///
/// Borrowing the CPU for the lifetime of the view keeps a directory switch
/// from invalidating the addresses it computes.
pub struct ActiveDirectory<'c, C: Cpu> {
    cpu: &'c mut C,
}

impl<'c, C: Cpu> ActiveDirectory<'c, C> {
    pub const fn new(cpu: &'c mut C) -> Self {
        Self { cpu }
    }

    /// Physical address of the directory this view edits.
    #[must_use]
    pub fn physical_address(&self) -> PhysicalAddress {
        self.cpu.page_directory()
    }

    #[must_use]
    pub fn read_pde(&mut self, dir: usize) -> PdEntry {
        PdEntry::from_raw(self.cpu.read_u32(directory_entry_address(dir)))
    }

    /// Write a directory entry.
    ///
    /// The caller flushes the TLB once the directory edit is complete; a
    /// changed PDE can invalidate up to 1024 cached translations.
    pub fn write_pde(&mut self, dir: usize, entry: PdEntry) {
        self.cpu.write_u32(directory_entry_address(dir), entry.raw());
    }

    /// Read the table entry for `linear`. The PDE must be present.
    #[must_use]
    pub fn read_pte(&mut self, linear: LinearAddress) -> PtEntry {
        PtEntry::from_raw(self.cpu.read_u32(table_entry_address(linear)))
    }

    /// Read the table entry for `linear`, or `None` if no table covers it.
    #[must_use]
    pub fn try_read_pte(&mut self, linear: LinearAddress) -> Option<PtEntry> {
        if self.read_pde(linear.directory_index()).is_present() {
            Some(self.read_pte(linear))
        } else {
            None
        }
    }

    /// Write the table entry for `linear` and invalidate its translation.
    pub fn write_pte(&mut self, linear: LinearAddress, entry: PtEntry) {
        self.cpu.write_u32(table_entry_address(linear), entry.raw());
        self.cpu.invalidate_page(linear.align_down::<Size4K>());
    }

    /// `true` if both the PDE and the PTE of `linear` are present.
    #[must_use]
    pub fn is_valid(&mut self, linear: LinearAddress) -> bool {
        self.try_read_pte(linear).is_some_and(PtEntry::is_present)
    }

    /// Translate `linear` to the physical address it maps, offset included.
    #[must_use]
    pub fn resolve(&mut self, linear: LinearAddress) -> Option<PhysicalAddress> {
        let page = self.try_read_pte(linear)?.page_4k()?;
        Some(page + linear.offset::<Size4K>())
    }

    /// Read entry `index` of the table for directory slot `dir`.
    #[must_use]
    pub fn read_table_entry(&mut self, dir: usize, index: usize) -> PtEntry {
        PtEntry::from_raw(self.cpu.read_u32(table_address(dir) + (index as u32) * 4))
    }

    /// Zero the page table of slot `dir` through the self map.
    pub fn zero_table(&mut self, dir: usize) {
        self.cpu.zero_page(table_address(dir));
    }
}
