//! # Memory Layout

use kernel_memory_addresses::{LinearAddress, PAGE_SIZE};

/// Size of the low region identity mapped by every directory and never
/// handed out by the physical allocator.
pub const RESERVED_LOW_MEMORY: u32 = 0x0040_0000; // 4 MiB

/// Start of user space.
pub const VMA_USER: u32 = 0x0040_0000;

/// Start of the shared library area.
pub const VMA_LIBRARY: u32 = 0xA000_0000;

/// User-visible alias of the kernel's task runner trampoline page.
pub const VMA_TASK_RUNNER: u32 = VMA_LIBRARY - PAGE_SIZE;

/// Start of kernel space; directory slots from here on are shared.
pub const VMA_KERNEL: u32 = 0xC000_0000;

/// Directory slot pointing back at the directory itself.
pub const SELF_MAP_SLOT: usize = 1023;

/// Linear base of the self-map window; the page table for directory slot
/// `D` is visible at `PT_BASE_VA + D * 4096`.
pub const PT_BASE_VA: u32 = 0xFFC0_0000;

/// Linear address of the active page directory through the self map.
pub const PD_VA: u32 = 0xFFFF_F000;

/// Entries per page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by one page table.
pub const TABLE_SPAN: u32 = 0x0040_0000;

/// Start (exclusive) of the legacy BIOS / option ROM zone.
pub const BIOS_ZONE_START: u32 = 0x000C_0000;

/// End (inclusive) of the legacy BIOS zone.
pub const BIOS_ZONE_END: u32 = 0x000F_FFFF;

/// Number of scratch pages in the temporary mapping window.
pub const TEMPORARY_SLOTS: usize = 3;

/// Returns `true` if pages at `addr` are user accessible.
///
/// ```rust
/// # use kernel_info::memory::*;
/// # use kernel_memory_addresses::LinearAddress;
/// assert!(is_user_address(LinearAddress::new(VMA_USER)));
/// assert!(!is_user_address(LinearAddress::new(VMA_KERNEL)));
/// assert!(!is_user_address(LinearAddress::new(0x1000)));
/// ```
#[inline]
#[must_use]
pub const fn is_user_address(addr: LinearAddress) -> bool {
    addr.as_u32() >= VMA_USER && addr.as_u32() < VMA_KERNEL
}

/// Returns `true` if `addr` lies in the shared kernel half.
#[inline]
#[must_use]
pub const fn is_kernel_address(addr: LinearAddress) -> bool {
    addr.as_u32() >= VMA_KERNEL
}

/// Directory slot of the first kernel page table.
pub const KERNEL_DIRECTORY_SLOT: usize = (VMA_KERNEL >> 22) as usize;

/// Directory slot of the task runner alias.
pub const TASK_RUNNER_DIRECTORY_SLOT: usize = (VMA_TASK_RUNNER >> 22) as usize;

/// First directory slot private to a user address space.
pub const USER_DIRECTORY_SLOT: usize = (VMA_USER >> 22) as usize;

const _: () = {
    assert!(VMA_USER.is_multiple_of(TABLE_SPAN));
    assert!(VMA_LIBRARY.is_multiple_of(TABLE_SPAN));
    assert!(VMA_KERNEL.is_multiple_of(TABLE_SPAN));
    assert!(VMA_USER < VMA_TASK_RUNNER);
    assert!(VMA_TASK_RUNNER < VMA_LIBRARY);
    assert!(VMA_LIBRARY < VMA_KERNEL);
    assert!(VMA_KERNEL < PT_BASE_VA);
    assert!(PT_BASE_VA == (SELF_MAP_SLOT as u32) << 22);
    assert!(PD_VA == PT_BASE_VA + (SELF_MAP_SLOT as u32) * PAGE_SIZE);
    assert!(RESERVED_LOW_MEMORY == TABLE_SPAN);
    assert!(KERNEL_DIRECTORY_SLOT == 768);
    assert!(TASK_RUNNER_DIRECTORY_SLOT == 639);
};
