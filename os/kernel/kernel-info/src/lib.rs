//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the memory layout constants and the loader hand-off
//! structure that govern the kernel's paging setup. It serves as the single
//! source of truth for addresses shared by the loader, the memory manager and
//! the process code.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! Defines what the loader tells the kernel about itself:
//! * **Kernel Placement**: physical load address and reserved span of the image
//! * **Image End**: where the temporary mapping window may be placed
//! * **Task Runner**: the trampoline section aliased into every user space
//! * **Memory Size**: total physical memory reported by the firmware
//!
//! ### Memory Layout ([`memory`])
//! Establishes the 32-bit linear address space:
//!
//! ```text
//! Linear Address Space Layout (i386, 4 GiB):
//!
//! 0x0000_0000      ┌─────────────────────────────────┐
//!                  │  Low 4 MiB (identity mapped)    │
//! VMA_USER         ├─────────────────────────────────┤ 0x0040_0000
//!                  │         User Space              │
//!                  │   (process private, per PD)     │
//! VMA_TASK_RUNNER  ├─────────────────────────────────┤ 0x9FFF_F000
//!                  │    Task runner alias (user)     │
//! VMA_LIBRARY      ├─────────────────────────────────┤ 0xA000_0000
//!                  │    Shared libraries (user)      │
//! VMA_KERNEL       ├─────────────────────────────────┤ 0xC000_0000
//!                  │  Kernel image, heaps, MMIO      │
//!                  │  (shared by all directories)    │
//! PT_BASE_VA       ├─────────────────────────────────┤ 0xFFC0_0000
//!                  │  Self-map window (page tables)  │
//! PD_VA            ├─────────────────────────────────┤ 0xFFFF_F000
//!                  │  Active page directory          │
//! 0xFFFF_FFFF      └─────────────────────────────────┘
//! ```
//!
//! ### Design Principles
//! * **Fixed Layout**: Compile-time constants with compile-time assertions
//! * **Self Map**: directory slot 1023 points at the directory itself
//! * **Shared Kernel Half**: slots 768..=1022 are identical in every directory

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod memory;
