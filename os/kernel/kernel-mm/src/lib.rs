//! # Virtual Memory Region Manager
//!
//! Manages the i386 linear address space of the kernel and its processes:
//!
//! - builds the bootstrap page directory and per-process user directories,
//! - allocates, resizes and frees page-granular regions, committed or merely
//!   reserved, at a fixed base or at the first free span above a bound,
//! - maps device and framebuffer memory,
//! - keeps the shared kernel half of all directories consistent,
//! - records every live region in a per-process [`RegionTracker`].
//!
//! ## Address space
//!
//! ```text
//! 0x0000_0000 ┌────────────────────┐ identity mapped, supervisor only
//! 0x0040_0000 ├────────────────────┤ VMA_USER: private to a process
//! 0x9FFF_F000 ├────────────────────┤ VMA_TASK_RUNNER (user alias of a kernel page)
//! 0xA000_0000 ├────────────────────┤ VMA_LIBRARY
//! 0xC000_0000 ├────────────────────┤ VMA_KERNEL: shared by every directory
//! 0xFFC0_0000 ├────────────────────┤ self map: page tables of the active directory
//! 0xFFFF_F000 └────────────────────┘ the active directory
//! ```
//!
//! ## Example
//!
//! ```rust
//! use kernel_mm::{AllocFlags, MemoryConfig, MemoryManager};
//! use kernel_memory_addresses::{LinearAddress, PhysicalAddress};
//!
//! let boot = kernel_sim::boot(32 << 20);
//! let mut mm = MemoryManager::initialize(boot.cpu, boot.frames, boot.startup, MemoryConfig::default())?;
//!
//! let base = mm.alloc_region(
//!     LinearAddress::new(0x0040_0000),
//!     PhysicalAddress::zero(),
//!     3 * 4096,
//!     AllocFlags::COMMIT | AllocFlags::READ_WRITE | AllocFlags::AT_OR_OVER,
//!     "Heap",
//! )?;
//! assert!(mm.is_valid_memory(base));
//! mm.free_region(base, 3 * 4096)?;
//! assert!(!mm.is_valid_memory(base));
//! # Ok::<(), kernel_mm::MemoryError>(())
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod config;
mod descriptor;
mod directory;
mod error;
mod flags;
mod manager;
mod memory_map;
mod process;
mod region;
#[cfg(test)]
mod testing;
mod tracker;

pub use crate::config::MemoryConfig;
pub use crate::descriptor::{Granularity, REGION_TAG_MAX, RegionAttributes, RegionDescriptor, RegionTag};
pub use crate::error::MemoryError;
pub use crate::flags::AllocFlags;
pub use crate::manager::MemoryManager;
pub use crate::memory_map::MemoryMap;
pub use crate::process::ProcessId;
pub use crate::tracker::{DescriptorSlab, PoolStats, RegionTracker};
