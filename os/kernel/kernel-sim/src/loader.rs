//! The paging state a loader leaves behind when it enters the kernel.
//!
//! ```text
//!  0x0000_9000   loader page directory
//!  0x0000_A000   identity table (low 4 MiB)
//!  0x0000_B000   kernel table (VMA_KERNEL → kernel_physical_base)
//!  0x0010_0000   kernel image
//! ```
//!
//! All of it lives in the reserved low 4 MiB, so the physical allocator never
//! hands these frames out.

use crate::SimulatedMachine;
use alloc::boxed::Box;
use alloc::vec;
use kernel_alloc::BitmapFrameAlloc;
use kernel_info::boot::KernelStartup;
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_DIRECTORY_SLOT, SELF_MAP_SLOT};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::{Cpu, PageEntryBits, PdEntry, PtEntry};
use log::debug;

/// Physical address of the loader's page directory.
pub const LOADER_DIRECTORY: PhysicalAddress = PhysicalAddress::new(0x0000_9000);
const LOADER_LOW_TABLE: PhysicalAddress = PhysicalAddress::new(0x0000_A000);
const LOADER_KERNEL_TABLE: PhysicalAddress = PhysicalAddress::new(0x0000_B000);

/// A machine right after the loader jumped into the kernel.
pub struct SimulatedBoot {
    pub cpu: SimulatedMachine,
    pub frames: BitmapFrameAlloc<'static>,
    pub startup: KernelStartup,
}

/// Loader hand-off for a 2 MiB kernel image loaded at 1 MiB.
#[must_use]
pub const fn default_startup(memory_size: u32) -> KernelStartup {
    KernelStartup {
        kernel_physical_base: 0x0010_0000,
        kernel_reserved_bytes: 0x0020_0000,
        kernel_image_end: 0xC020_0000,
        task_runner_start: 0xC000_8000,
        memory_size,
    }
}

/// Boot a machine with `memory_size` bytes of RAM and the default image.
#[must_use]
pub fn boot(memory_size: u32) -> SimulatedBoot {
    boot_with(default_startup(memory_size))
}

/// Boot a machine described by `startup`.
///
/// # Panics
/// Panics if `startup` is inconsistent.
#[must_use]
pub fn boot_with(startup: KernelStartup) -> SimulatedBoot {
    assert!(startup.is_consistent(), "inconsistent loader hand-off: {startup:?}");

    let mut cpu = SimulatedMachine::new(startup.memory_size);
    install_loader_directory(&mut cpu, startup.kernel_physical_base());
    cpu.load_page_directory(LOADER_DIRECTORY);
    debug!(
        "simulated boot: {} KiB RAM, kernel image at {}",
        startup.memory_size / 1024,
        startup.kernel_physical_base()
    );

    SimulatedBoot {
        cpu,
        frames: frame_allocator(startup.memory_size),
        startup,
    }
}

/// A bitmap frame allocator with leaked storage, good for the whole test.
#[must_use]
pub fn frame_allocator(memory_size: u32) -> BitmapFrameAlloc<'static> {
    let storage = Box::leak(vec![0u8; BitmapFrameAlloc::bitmap_bytes(memory_size)].into_boxed_slice());
    BitmapFrameAlloc::new(storage, memory_size)
}

fn install_loader_directory(cpu: &mut SimulatedMachine, kernel_physical_base: PhysicalAddress) {
    let write = |cpu: &mut SimulatedMachine, table: PhysicalAddress, index: usize, value: u32| {
        cpu.write_physical(table + (index as u32) * 4, value);
    };

    write(cpu, LOADER_DIRECTORY, 0, PdEntry::table(LOADER_LOW_TABLE, false).raw());
    write(
        cpu,
        LOADER_DIRECTORY,
        KERNEL_DIRECTORY_SLOT,
        PdEntry::table(LOADER_KERNEL_TABLE, false).raw(),
    );
    write(
        cpu,
        LOADER_DIRECTORY,
        SELF_MAP_SLOT,
        PdEntry::table(LOADER_DIRECTORY, false).raw(),
    );

    for index in 0..ENTRIES_PER_TABLE {
        let offset = (index as u32) * PAGE_SIZE;
        let identity = PtEntry::make_4k(PhysicalAddress::new(offset), PageEntryBits::new_fixed_rw(PhysicalAddress::zero()));
        write(cpu, LOADER_LOW_TABLE, index, identity.raw());

        let kernel = PtEntry::make_4k(kernel_physical_base + offset, PageEntryBits::new_fixed_rw(PhysicalAddress::zero()));
        write(cpu, LOADER_KERNEL_TABLE, index, kernel.raw());
    }
}
