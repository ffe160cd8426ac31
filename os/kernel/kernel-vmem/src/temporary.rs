//! # Temporary Mapping Window
//!
//! Three scratch pages directly behind the kernel image, used to reach
//! physical frames that are not part of the active directory: freshly
//! allocated directories and tables, or the canonical kernel directory while
//! a process directory is loaded.
//!
//! ```text
//!  kernel image end (page aligned)
//!  │
//!  ├── slot 1: page directories
//!  ├── slot 2: page tables
//!  └── slot 3: spare
//! ```
//!
//! Mapping a slot rewrites its PTE in the active directory (supervisor,
//! writable, fixed) and invalidates the slot page. A slot stays valid until
//! it is mapped again; the slots are shared scratch state and must not be
//! held across calls that may remap them.

use crate::cpu::Cpu;
use crate::page_table::{PdEntry, PtEntry};
use crate::self_map::ActiveDirectory;
use crate::PageEntryBits;
use kernel_info::memory::TEMPORARY_SLOTS;
use kernel_memory_addresses::{LinearAddress, PageSize, PhysicalAddress, Size4K};

/// One of the three scratch pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TemporarySlot {
    /// Page directories.
    First,
    /// Page tables.
    Second,
    /// Spare.
    Third,
}

impl TemporarySlot {
    const fn index(self) -> u32 {
        match self {
            Self::First => 0,
            Self::Second => 1,
            Self::Third => 2,
        }
    }
}

/// The temporary mapping window.
#[derive(Debug, Clone)]
pub struct TemporaryWindow {
    image_end: LinearAddress,
    base: Option<LinearAddress>,
}

impl TemporaryWindow {
    /// A window to be placed behind the kernel image ending at `image_end`.
    ///
    /// Placement happens on first use.
    #[must_use]
    pub const fn new(image_end: LinearAddress) -> Self {
        Self {
            image_end,
            base: None,
        }
    }

    /// Linear address of `slot`, placing the window if necessary.
    ///
    /// # Panics
    /// Panics if the window cannot be placed behind the kernel image.
    pub fn slot_address(&mut self, slot: TemporarySlot) -> LinearAddress {
        let image_end = self.image_end;
        let base = *self.base.get_or_insert_with(|| {
            let base = match image_end.align_up::<Size4K>() {
                Some(base) if !image_end.is_null() => base,
                _ => panic!("temporary mapping slots were never reserved"),
            };
            log::debug!("temporary mapping window placed at {base}");
            base
        });

        let last = base.checked_add(TEMPORARY_SLOTS as u32 * Size4K::SIZE - 1);
        assert!(last.is_some(), "temporary mapping window wraps the address space");
        base.page_offset(slot.index())
    }

    /// Map `physical` into `slot` and return the slot's linear address.
    ///
    /// # Panics
    /// Panics if the slot was never reserved or its page table is missing.
    pub fn map<C: Cpu>(&mut self, cpu: &mut C, slot: TemporarySlot, physical: PhysicalAddress) -> LinearAddress {
        let linear = self.slot_address(slot);
        let mut active = ActiveDirectory::new(cpu);
        assert!(
            active.read_pde(linear.directory_index()).is_present(),
            "no page table backs temporary slot {slot:?} at {linear}"
        );
        let entry = PtEntry::make_4k(physical.align_down::<Size4K>(), PageEntryBits::new_fixed_rw(physical));
        active.write_pte(linear, entry);
        linear
    }

    /// Read entry `index` of the directory or table in frame `physical`.
    pub fn read_entry<C: Cpu>(&mut self, cpu: &mut C, slot: TemporarySlot, physical: PhysicalAddress, index: usize) -> u32 {
        let linear = self.map(cpu, slot, physical);
        cpu.read_u32(linear + (index as u32) * 4)
    }

    /// Write entry `index` of the directory or table in frame `physical`.
    pub fn write_entry<C: Cpu>(
        &mut self,
        cpu: &mut C,
        slot: TemporarySlot,
        physical: PhysicalAddress,
        index: usize,
        value: u32,
    ) {
        let linear = self.map(cpu, slot, physical);
        cpu.write_u32(linear + (index as u32) * 4, value);
    }

    /// Read the PDE `dir` of the directory in frame `directory` through slot 1.
    pub fn read_directory_entry<C: Cpu>(&mut self, cpu: &mut C, directory: PhysicalAddress, dir: usize) -> PdEntry {
        PdEntry::from_raw(self.read_entry(cpu, TemporarySlot::First, directory, dir))
    }

    /// Zero the frame at `physical` through `slot`.
    pub fn zero_frame<C: Cpu>(&mut self, cpu: &mut C, slot: TemporarySlot, physical: PhysicalAddress) {
        let linear = self.map(cpu, slot, physical);
        cpu.zero_page(linear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_the_page_aligned_image_end() {
        let mut window = TemporaryWindow::new(LinearAddress::new(0xC020_0123));
        assert_eq!(window.slot_address(TemporarySlot::First).as_u32(), 0xC020_1000);
        assert_eq!(window.slot_address(TemporarySlot::Second).as_u32(), 0xC020_2000);
        assert_eq!(window.slot_address(TemporarySlot::Third).as_u32(), 0xC020_3000);
    }

    #[test]
    #[should_panic(expected = "never reserved")]
    fn missing_image_end_is_fatal() {
        let mut window = TemporaryWindow::new(LinearAddress::zero());
        let _ = window.slot_address(TemporarySlot::First);
    }
}
