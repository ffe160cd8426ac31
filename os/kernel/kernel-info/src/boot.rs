//! # Kernel Boot Information

use crate::memory::{VMA_KERNEL, VMA_USER};
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress};

/// What the loader reports about the kernel image and the machine.
///
/// Keep this `#[repr(C)]`; the loader fills it before jumping to the kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelStartup {
    /// Physical address the kernel image was loaded at. [`VMA_KERNEL`] maps here.
    pub kernel_physical_base: u32,

    /// Bytes of physical memory owned by the image (text, data, bss, stacks).
    pub kernel_reserved_bytes: u32,

    /// Linear address of the first byte past the kernel image (`__bss_init_end`).
    pub kernel_image_end: u32,

    /// Linear address of the task runner section inside the image.
    pub task_runner_start: u32,

    /// Total physical memory in bytes.
    pub memory_size: u32,
}

impl KernelStartup {
    #[inline]
    #[must_use]
    pub const fn kernel_physical_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_physical_base)
    }

    #[inline]
    #[must_use]
    pub const fn kernel_image_end(&self) -> LinearAddress {
        LinearAddress::new(self.kernel_image_end)
    }

    #[inline]
    #[must_use]
    pub const fn task_runner_start(&self) -> LinearAddress {
        LinearAddress::new(self.task_runner_start)
    }

    /// Physical page backing the task runner section.
    ///
    /// ```rust
    /// # use kernel_info::boot::KernelStartup;
    /// let startup = KernelStartup {
    ///     kernel_physical_base: 0x0010_0000,
    ///     kernel_reserved_bytes: 0x0010_0000,
    ///     kernel_image_end: 0xC010_0000,
    ///     task_runner_start: 0xC000_8000,
    ///     memory_size: 32 << 20,
    /// };
    /// assert_eq!(startup.task_runner_physical().as_u32(), 0x0010_8000);
    /// ```
    #[inline]
    #[must_use]
    pub const fn task_runner_physical(&self) -> PhysicalAddress {
        let offset = self.task_runner_start.wrapping_sub(VMA_KERNEL) & !(PAGE_SIZE - 1);
        PhysicalAddress::new(self.kernel_physical_base.wrapping_add(offset))
    }

    /// Number of physical 4 KiB pages.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.memory_size / PAGE_SIZE
    }

    /// Basic plausibility checks of the loader hand-off.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.memory_size > VMA_USER
            && self.kernel_physical_base.is_multiple_of(PAGE_SIZE)
            && self.kernel_image_end > VMA_KERNEL
            && self.task_runner_start >= VMA_KERNEL
            && self.task_runner_start < self.kernel_image_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup() -> KernelStartup {
        KernelStartup {
            kernel_physical_base: 0x0010_0000,
            kernel_reserved_bytes: 0x0020_0000,
            kernel_image_end: 0xC020_0000,
            task_runner_start: 0xC000_9123,
            memory_size: 64 << 20,
        }
    }

    #[test]
    fn task_runner_page_is_page_aligned() {
        assert_eq!(startup().task_runner_physical().as_u32(), 0x0010_9000);
    }

    #[test]
    fn consistency() {
        assert!(startup().is_consistent());
        let broken = KernelStartup {
            kernel_image_end: 0x0010_0000,
            ..startup()
        };
        assert!(!broken.is_consistent());
        assert_eq!(startup().page_count(), 16384);
    }
}
