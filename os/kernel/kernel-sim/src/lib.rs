//! # Simulated i386 Machine
//!
//! A host-side stand-in for the processor the memory manager runs on. It
//! implements [`kernel_vmem::Cpu`] with a real two-level page walk, so code
//! under test reaches page tables through the self map and the temporary
//! window exactly as on hardware, and a missing `invlpg` shows up as a stale
//! translation instead of going unnoticed.
//!
//! ```rust
//! # use kernel_memory_addresses::LinearAddress;
//! # use kernel_vmem::Cpu;
//! let mut boot = kernel_sim::boot(16 << 20);
//! // the loader identity maps the low 4 MiB
//! boot.cpu.write_u32(LinearAddress::new(0x0020_0000), 0xDEAD_BEEF);
//! // and maps the kernel image at 0xC000_0000
//! assert_eq!(boot.cpu.read_u32(LinearAddress::new(0xC010_0000)), 0xDEAD_BEEF);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod loader;
mod machine;

pub use loader::{LOADER_DIRECTORY, SimulatedBoot, boot, boot_with, default_startup, frame_allocator};
pub use machine::{SimulatedMachine, TlbStats};
