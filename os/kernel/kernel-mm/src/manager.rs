//! # The memory manager context
//!
//! [`MemoryManager`] owns everything the region code touches: the CPU, the
//! physical allocator, the temporary window, the canonical kernel directory,
//! the registered address spaces and the descriptor tracker. All operations
//! take `&mut self`; callers serialize access (typically behind the kernel's
//! memory mutex).

use crate::config::MemoryConfig;
use crate::descriptor::RegionDescriptor;
use crate::memory_map::MemoryMap;
use crate::tracker::{DescriptorSlab, PoolStats, RegionTracker};
use crate::{AllocFlags, MemoryError, ProcessId};
use alloc::collections::BTreeMap;
use core::mem;
use kernel_alloc::PhysicalPageAllocator;
use kernel_info::boot::KernelStartup;
use kernel_info::memory::is_kernel_address;
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress, pages_for};
use kernel_vmem::{Cpu, TemporarySlot, TemporaryWindow};
use log::{debug, error, info};

/// Kernel virtual memory manager.
pub struct MemoryManager<C: Cpu, A: PhysicalPageAllocator> {
    pub(crate) cpu: C,
    pub(crate) frames: A,
    pub(crate) startup: KernelStartup,
    pub(crate) config: MemoryConfig,
    pub(crate) window: TemporaryWindow,
    /// The canonical directory whose kernel half every other directory mirrors.
    pub(crate) kernel_directory: PhysicalAddress,
    pub(crate) spaces: BTreeMap<ProcessId, PhysicalAddress>,
    pub(crate) current: ProcessId,
    pub(crate) tracker: RegionTracker,
    pub(crate) tracking_enabled: bool,
    /// Set while a descriptor slab is being mapped; the slab mapping itself
    /// is not tracked.
    pub(crate) bootstrap_suppressed: bool,
}

impl<C: Cpu, A: PhysicalPageAllocator> MemoryManager<C, A> {
    /// Bring up virtual memory.
    ///
    /// Expects the loader's paging to be active (identity mapped low memory,
    /// the kernel image at [`VMA_KERNEL`](kernel_info::memory::VMA_KERNEL) and
    /// a self map). Reserves the kernel image frames, builds and loads the
    /// bootstrap directory and enables descriptor tracking.
    ///
    /// # Errors
    /// Fails if frames for the directory or the first descriptor slab cannot
    /// be allocated. The kernel cannot continue in that case.
    ///
    /// # Panics
    /// Panics if the physical allocator reports no memory.
    pub fn initialize(cpu: C, mut frames: A, startup: KernelStartup, config: MemoryConfig) -> Result<Self, MemoryError> {
        assert!(frames.memory_size() != 0, "physical allocator reports no memory");

        let first = startup.kernel_physical_base().frame();
        for frame in first..first + pages_for(startup.kernel_reserved_bytes) {
            frames.set_page_mark(frame, true);
        }

        let loader_directory = cpu.page_directory();
        let mut mm = Self {
            cpu,
            frames,
            startup,
            config,
            window: TemporaryWindow::new(startup.kernel_image_end()),
            kernel_directory: loader_directory,
            spaces: BTreeMap::new(),
            current: ProcessId::KERNEL,
            tracker: RegionTracker::new(),
            tracking_enabled: false,
            bootstrap_suppressed: false,
        };

        let directory = mm.alloc_page_directory().inspect_err(|e| {
            error!("cannot build the bootstrap page directory: {e}");
        })?;
        mm.cpu.load_page_directory(directory);
        mm.kernel_directory = directory;
        mm.spaces.insert(ProcessId::KERNEL, directory);

        mm.enable_descriptor_tracking()?;

        info!(
            "virtual memory ready: directory at {directory}, {} KiB physical, {} frames in use",
            mm.frames.memory_size() / 1024,
            mm.frames.used_pages()
        );
        Ok(mm)
    }

    /// Start recording region descriptors; maps the first slab.
    ///
    /// # Errors
    /// Fails if the first slab cannot be mapped.
    pub fn enable_descriptor_tracking(&mut self) -> Result<(), MemoryError> {
        self.tracking_enabled = true;
        self.ensure_free_descriptor()
    }

    #[must_use]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    #[must_use]
    pub const fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    #[must_use]
    pub const fn frames(&self) -> &A {
        &self.frames
    }

    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub const fn startup(&self) -> &KernelStartup {
        &self.startup
    }

    /// Physical address of the canonical kernel directory.
    #[must_use]
    pub const fn kernel_directory(&self) -> PhysicalAddress {
        self.kernel_directory
    }

    /// Linear address of temporary slot `slot`.
    pub fn temporary_slot(&mut self, slot: TemporarySlot) -> LinearAddress {
        self.window.slot_address(slot)
    }

    /// The process whose address space is loaded.
    #[must_use]
    pub const fn current_process(&self) -> ProcessId {
        self.current
    }

    #[must_use]
    pub fn address_space(&self, process: ProcessId) -> Option<PhysicalAddress> {
        self.spaces.get(&process).copied()
    }

    /// Build a user directory for `process` from the active one and register it.
    ///
    /// # Errors
    /// Fails if `process` already has an address space or frames run out.
    pub fn create_address_space(&mut self, process: ProcessId) -> Result<PhysicalAddress, MemoryError> {
        if self.spaces.contains_key(&process) {
            return Err(MemoryError::AddressSpaceExists(process));
        }
        let directory = self.alloc_user_page_directory()?;
        self.spaces.insert(process, directory);
        debug!("address space of {process} at {directory}");
        Ok(directory)
    }

    /// Load the directory of `process`.
    ///
    /// # Errors
    /// Fails if `process` has no address space.
    pub fn switch_address_space(&mut self, process: ProcessId) -> Result<(), MemoryError> {
        let directory = self
            .address_space(process)
            .ok_or(MemoryError::UnknownAddressSpace(process))?;
        self.cpu.load_page_directory(directory);
        self.current = process;
        Ok(())
    }

    /// Descriptors of `process` in base order, read from their slabs.
    pub fn descriptors(&mut self, process: ProcessId) -> impl Iterator<Item = RegionDescriptor> {
        self.reach_descriptor_slabs();
        self.tracker.iter(&mut self.cpu, process)
    }

    pub fn find_descriptor_for_base(&mut self, process: ProcessId, base: LinearAddress) -> Option<RegionDescriptor> {
        self.reach_descriptor_slabs();
        self.tracker.find_for_base(&mut self.cpu, process, base)
    }

    pub fn find_descriptor_covering_address(
        &mut self,
        process: ProcessId,
        addr: LinearAddress,
    ) -> Option<RegionDescriptor> {
        self.reach_descriptor_slabs();
        self.tracker.find_covering(&mut self.cpu, process, addr)
    }

    /// Linear address of the slab slot holding the descriptor of `process` at `base`.
    #[must_use]
    pub fn descriptor_slot(&self, process: ProcessId, base: LinearAddress) -> Option<LinearAddress> {
        self.tracker.slot_address(process, base)
    }

    #[must_use]
    pub fn descriptor_pool(&self) -> PoolStats {
        self.tracker.stats()
    }

    #[must_use]
    pub fn descriptor_slabs(&self) -> &[DescriptorSlab] {
        self.tracker.slabs()
    }

    /// Printable listing of the regions of `process`.
    pub fn memory_map(&mut self, process: ProcessId) -> MemoryMap {
        MemoryMap::new(process, self.descriptors(process).collect())
    }

    /// Owner of a region at `base`: kernel-space regions belong to the kernel
    /// whichever directory is active.
    pub(crate) const fn owner_for(&self, base: LinearAddress) -> ProcessId {
        if is_kernel_address(base) {
            ProcessId::KERNEL
        } else {
            self.current
        }
    }

    const fn tracking_active(&self) -> bool {
        self.tracking_enabled && !self.bootstrap_suppressed
    }

    pub(crate) fn track_alloc(
        &mut self,
        base: LinearAddress,
        physical: PhysicalAddress,
        pages: u32,
        flags: AllocFlags,
        tag: &str,
    ) -> Result<(), MemoryError> {
        if !self.tracking_active() {
            return Ok(());
        }
        self.ensure_free_descriptor()?;
        self.reach_descriptor_slabs();
        let descriptor = RegionDescriptor::new(self.owner_for(base), base, physical, pages, flags, tag);
        self.tracker
            .register(&mut self.cpu, &descriptor)
            .map(|_| ())
            .ok_or(MemoryError::DescriptorPoolExhausted)
    }

    pub(crate) fn track_free(&mut self, base: LinearAddress, pages: u32) {
        if !self.tracking_active() || pages == 0 {
            return;
        }
        let owner = self.owner_for(base);
        self.reach_descriptor_slabs();
        if self.tracker.free_count() == 0
            && self.tracker.needs_split(&mut self.cpu, owner, base, pages)
            && let Err(e) = self.grow_descriptor_pool()
        {
            error!("cannot grow the descriptor pool before a split: {e}");
        }
        self.tracker.update_for_free(&mut self.cpu, owner, base, pages);
    }

    /// Account for `extra` pages appended at `append` to the region at `base`.
    pub(crate) fn track_growth(
        &mut self,
        append: LinearAddress,
        physical: PhysicalAddress,
        extra: u32,
        flags: AllocFlags,
    ) -> Result<(), MemoryError> {
        if !self.tracking_active() {
            return Ok(());
        }
        let owner = self.owner_for(append);
        self.reach_descriptor_slabs();
        if self.tracker.extend_ending_at(&mut self.cpu, owner, append, extra) {
            return Ok(());
        }
        self.track_alloc(append, physical, extra, flags, "")
    }

    /// Mirror the slab pages into the active directory so their slots can be
    /// accessed; a process directory may predate the page table of a slab.
    fn reach_descriptor_slabs(&mut self) {
        if self.cpu.page_directory() == self.kernel_directory {
            return;
        }
        for slab in self.tracker.slabs().to_vec() {
            self.resolve_kernel_page_fault(slab.linear);
        }
    }

    fn ensure_free_descriptor(&mut self) -> Result<(), MemoryError> {
        if self.tracker.free_count() == 0 {
            self.grow_descriptor_pool()?;
        }
        Ok(())
    }

    /// Map one more slab page into kernel space and hand its slots to the pool.
    fn grow_descriptor_pool(&mut self) -> Result<(), MemoryError> {
        let physical = self.frames.alloc_page().ok_or(MemoryError::OutOfPhysicalMemory)?;

        let suppressed = mem::replace(&mut self.bootstrap_suppressed, true);
        let mapped = self.alloc_kernel_region(
            physical,
            PAGE_SIZE,
            AllocFlags::COMMIT | AllocFlags::READ_WRITE | AllocFlags::AT_OR_OVER,
            "RegionDescriptorSlab",
        );
        self.bootstrap_suppressed = suppressed;

        let linear = match mapped {
            Ok(linear) => linear,
            Err(e) => {
                if self.frames.is_page_marked(physical.frame()) {
                    self.frames.free_page(physical);
                }
                error!("cannot map a descriptor slab: {e}");
                return Err(e);
            }
        };

        self.cpu.zero_page(linear);
        self.tracker.add_slab(linear, physical);
        Ok(())
    }
}
