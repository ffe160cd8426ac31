//! # Paging primitives of the executing CPU
//!
//! The memory manager never dereferences raw pointers itself; every access to
//! paging structures goes through a [`Cpu`], which supplies the handful of
//! privileged operations i386 paging needs:
//!
//! | Operation | Hardware |
//! |-----------|----------|
//! | [`Cpu::page_directory`] | `mov eax, cr3` |
//! | [`Cpu::load_page_directory`] | `mov cr3, eax` |
//! | [`Cpu::flush_tlb`] | CR3 reload |
//! | [`Cpu::invalidate_page`] | `invlpg` |
//! | [`Cpu::read_u32`] / [`Cpu::write_u32`] | volatile access through the active mapping |
//!
//! [`X86Cpu`] is the bare-metal implementation; host tests use a software MMU.

use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress, Size4K};

#[cfg(target_arch = "x86")]
mod x86;

#[cfg(target_arch = "x86")]
pub use x86::X86Cpu;

/// Privileged paging operations and linear memory access.
///
/// Linear accesses are translated by the currently loaded directory and are
/// subject to the TLB: after changing a live entry the caller must invalidate
/// the affected page (or flush) before relying on the new translation.
pub trait Cpu {
    /// Physical address of the active page directory (CR3).
    fn page_directory(&self) -> PhysicalAddress;

    /// Switch to the directory at `directory`; implies a full TLB flush.
    fn load_page_directory(&mut self, directory: PhysicalAddress);

    /// Drop all non-global cached translations.
    fn flush_tlb(&mut self);

    /// Drop the cached translation of the page containing `linear`.
    fn invalidate_page(&mut self, linear: LinearAddress);

    /// Read a 32-bit word at `linear` through the active mapping.
    fn read_u32(&mut self, linear: LinearAddress) -> u32;

    /// Write a 32-bit word at `linear` through the active mapping.
    fn write_u32(&mut self, linear: LinearAddress, value: u32);

    /// Zero the 4 KiB page at `linear`.
    fn zero_page(&mut self, linear: LinearAddress) {
        let base = linear.align_down::<Size4K>();
        for offset in (0..PAGE_SIZE).step_by(4) {
            self.write_u32(base + offset, 0);
        }
    }
}
