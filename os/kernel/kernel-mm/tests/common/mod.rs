#![allow(dead_code)]

use kernel_alloc::{BitmapFrameAlloc, PhysicalPageAllocator};
use kernel_memory_addresses::LinearAddress;
use kernel_mm::{AllocFlags, MemoryConfig, MemoryManager};
use kernel_sim::SimulatedMachine;

pub type Manager = MemoryManager<SimulatedMachine, BitmapFrameAlloc<'static>>;

pub const MEMORY: u32 = 32 << 20;
pub const PAGE: u32 = 4096;

pub const COMMIT_RW: AllocFlags = AllocFlags::COMMIT.union(AllocFlags::READ_WRITE);

pub fn manager() -> Manager {
    manager_with(MEMORY, MemoryConfig::default())
}

pub fn manager_with(memory: u32, config: MemoryConfig) -> Manager {
    let boot = kernel_sim::boot(memory);
    MemoryManager::initialize(boot.cpu, boot.frames, boot.startup, config).expect("memory manager initializes")
}

pub fn used_frames(mm: &Manager) -> u32 {
    mm.frames().used_pages()
}

pub fn la(addr: u32) -> LinearAddress {
    LinearAddress::new(addr)
}
