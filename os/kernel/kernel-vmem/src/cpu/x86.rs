use super::Cpu;
use core::arch::asm;
use kernel_memory_addresses::{LinearAddress, PAGE_MASK, PhysicalAddress};

/// The executing i386 processor.
pub struct X86Cpu {
    _private: (),
}

impl X86Cpu {
    /// # Safety
    /// Paging must be enabled and the active directory must carry the self
    /// map; only one instance may exist.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Cpu for X86Cpu {
    fn page_directory(&self) -> PhysicalAddress {
        let cr3: u32;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        PhysicalAddress::new(cr3 & PAGE_MASK)
    }

    fn load_page_directory(&mut self, directory: PhysicalAddress) {
        debug_assert_eq!(directory.as_u32() & !PAGE_MASK, 0, "directory must be 4K-aligned");
        unsafe {
            asm!("mov cr3, {}", in(reg) directory.as_u32(), options(nostack, preserves_flags));
        }
    }

    fn flush_tlb(&mut self) {
        unsafe {
            asm!(
                "mov {tmp}, cr3",
                "mov cr3, {tmp}",
                tmp = out(reg) _,
                options(nostack, preserves_flags)
            );
        }
    }

    fn invalidate_page(&mut self, linear: LinearAddress) {
        unsafe {
            asm!("invlpg [{}]", in(reg) linear.as_u32(), options(nostack, preserves_flags));
        }
    }

    fn read_u32(&mut self, linear: LinearAddress) -> u32 {
        let ptr = linear.as_u32() as usize as *const u32;
        unsafe { core::ptr::read_volatile(ptr) }
    }

    fn write_u32(&mut self, linear: LinearAddress, value: u32) {
        let ptr = linear.as_u32() as usize as *mut u32;
        unsafe { core::ptr::write_volatile(ptr, value) }
    }
}
