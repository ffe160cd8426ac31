//! # Virtual Memory Support
//!
//! i386 (non-PAE) paging helpers for the kernel's memory manager.
//!
//! ## What you get
//! - A raw [`PageEntryBits`] bitfield shared by directory and table entries.
//! - Typed [`PdEntry`]/[`PtEntry`] wrappers.
//! - The [`Cpu`] trait abstracting CR3, TLB maintenance and linear memory access.
//! - The [self-map navigator](self_map) to edit the active directory.
//! - The [temporary mapping window](temporary) to edit any other frame.
//!
//! ## i386 Linear Address → Physical Address Walk
//!
//! Each 32-bit linear address is divided into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory → Page Table → Physical Page
//!          │                 │
//!          │                 └───► PTE (Page Table Entry) → maps 4 KiB page
//!          └─────────────────────► PDE (Page Directory Entry) → points to a table
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | 1024 entries, each covering 4 MiB. Referenced by [`CR3`](https://wiki.osdev.org/CPU_Registers_x86#CR3). |
//! | 2 | **PT** (Page Table) | **PTE** | 1024 entries, each mapping a 4 KiB page. |
//!
//! ### Permissions
//!
//! Write and user access must be granted by *both* levels. The kernel keeps
//! PDEs writable and decides per PTE; only directory slots in user space (and
//! the task runner alias) carry the user bit.
//!
//! ### Self map
//!
//! Directory slot 1023 points back to the directory. This turns the top
//! 4 MiB of the address space into a window onto all page tables of the
//! active directory; see [`self_map`].

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod cpu;
mod page_entry_bits;
mod page_table;
pub mod self_map;
pub mod temporary;

pub use crate::cpu::Cpu;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PdEntry, PtEntry};
pub use crate::self_map::ActiveDirectory;
pub use crate::temporary::{TemporarySlot, TemporaryWindow};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
