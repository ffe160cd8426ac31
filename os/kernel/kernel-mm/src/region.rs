//! # Region allocation
//!
//! Regions are page-granular spans of the active address space. A region is
//! populated one page at a time:
//!
//! ```text
//!   alloc_region(base, target, size, flags, tag)
//!     │ ceiling, target and base checks          → Err, nothing touched
//!     │ first fit at or over base (or exact span)
//!     │ for every page:
//!     │   page table missing?  allocate + zero via temporary slot 2
//!     │   PTE ← frame (target, fresh frame) or reservation
//!     │   kernel page in a process directory? mirror into the kernel directory
//!     │ register a descriptor                    → on failure unmap everything
//!     └ flush TLB
//! ```
//!
//! Kernel-space pages are physically duplicated per directory. Every change
//! made while a process directory is loaded is written through to the
//! canonical kernel directory; other process directories pick the change up
//! lazily through [`MemoryManager::resolve_kernel_page_fault`].

use crate::manager::MemoryManager;
use crate::{AllocFlags, MemoryError};
use kernel_alloc::PhysicalPageAllocator;
use kernel_info::memory::{
    ENTRIES_PER_TABLE, PT_BASE_VA, RESERVED_LOW_MEMORY, SELF_MAP_SLOT, TASK_RUNNER_DIRECTORY_SLOT,
    USER_DIRECTORY_SLOT, VMA_KERNEL, is_kernel_address, is_user_address,
};
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress, Size4K, pages_for};
use kernel_vmem::{ActiveDirectory, Cpu, PageEntryBits, PdEntry, PtEntry, TemporarySlot};
use log::{debug, error, warn};

impl<C: Cpu, A: PhysicalPageAllocator> MemoryManager<C, A> {
    /// Allocate a region of `size` bytes in the active address space.
    ///
    /// With a null `base` or [`AllocFlags::AT_OR_OVER`] the first free span at
    /// or above `base` (never below 4 MiB) is used; otherwise exactly the span
    /// at `base`, which must be free. A non-null `target` maps that physical
    /// range instead of fresh frames.
    ///
    /// # Errors
    /// Fails without side effects if the request is malformed, exceeds the
    /// allocation ceiling, finds no free span, or runs out of frames or
    /// descriptors.
    pub fn alloc_region(
        &mut self,
        base: LinearAddress,
        target: PhysicalAddress,
        size: u32,
        flags: AllocFlags,
        tag: &str,
    ) -> Result<LinearAddress, MemoryError> {
        if base.is_null() && size == 0 {
            return Err(MemoryError::InvalidArgument("null base with zero size"));
        }
        self.check_ceiling(size)?;
        let pages = pages_for(size).max(1);
        check_target(target, pages, flags)?;

        let base = if base.is_null() || flags.contains(AllocFlags::AT_OR_OVER) {
            self.find_free_region(base, pages)?
        } else {
            check_span(base, pages)?;
            if !self.is_region_free(base, pages) {
                debug!("alloc_region: span of {pages} pages at {base} is in use");
                return Err(MemoryError::SpanInUse(base));
            }
            base
        };

        self.populate_region_pages(base, target, pages, flags)?;

        if let Err(e) = self.track_alloc(base, target, pages, flags, tag) {
            error!("alloc_region: cannot track {pages} pages at {base}: {e}");
            self.unmap_pages(base, pages);
            self.free_empty_page_tables();
            self.cpu.flush_tlb();
            return Err(e);
        }

        self.cpu.flush_tlb();
        debug!("allocated {pages} pages at {base} ({tag})");
        Ok(base)
    }

    /// Grow or shrink the region at `base` from `size` to `new_size` bytes.
    ///
    /// Growth appends pages right after the current end; shrinking frees the
    /// trailing pages.
    ///
    /// # Errors
    /// Fails without side effects if `base` is null or misaligned, the new
    /// size exceeds the ceiling, or the appended span is not free or cannot be
    /// populated.
    pub fn resize_region(
        &mut self,
        base: LinearAddress,
        target: PhysicalAddress,
        size: u32,
        new_size: u32,
        flags: AllocFlags,
    ) -> Result<(), MemoryError> {
        if base.is_null() {
            return Err(MemoryError::NullBase);
        }
        if !base.is_aligned::<Size4K>() {
            return Err(MemoryError::MisalignedBase(base));
        }
        self.check_ceiling(new_size)?;

        let pages = pages_for(size).max(1);
        let new_pages = pages_for(new_size).max(1);
        check_target(target, new_pages, flags)?;

        if new_pages > pages {
            let extra = new_pages - pages;
            check_span(base, new_pages)?;
            let append = base.page_offset(pages);
            if !self.is_region_free(append, extra) {
                debug!("resize_region: {extra} pages after {base} are in use");
                return Err(MemoryError::SpanInUse(append));
            }
            let append_target = if target.is_null() {
                target
            } else {
                target + pages * PAGE_SIZE
            };

            self.populate_region_pages(append, append_target, extra, flags)?;
            if let Err(e) = self.track_growth(append, append_target, extra, flags) {
                error!("resize_region: cannot track growth of {base}: {e}");
                self.unmap_pages(append, extra);
                self.free_empty_page_tables();
                self.cpu.flush_tlb();
                return Err(e);
            }
            self.cpu.flush_tlb();
            debug!("grew region at {base} from {pages} to {new_pages} pages");
        } else if new_pages < pages {
            self.release_pages(base.page_offset(new_pages), pages - new_pages);
            debug!("shrank region at {base} from {pages} to {new_pages} pages");
        }
        Ok(())
    }

    /// Unmap `size` bytes at `base`, returning owned frames to the allocator.
    ///
    /// # Errors
    /// Fails without side effects if `base` is null or misaligned, or the
    /// span leaves the mappable address space.
    pub fn free_region(&mut self, base: LinearAddress, size: u32) -> Result<(), MemoryError> {
        if base.is_null() {
            return Err(MemoryError::NullBase);
        }
        if !base.is_aligned::<Size4K>() {
            return Err(MemoryError::MisalignedBase(base));
        }
        self.check_ceiling(size)?;
        let pages = pages_for(size).max(1);
        check_span(base, pages)?;

        self.release_pages(base, pages);
        debug!("freed {pages} pages at {base}");
        Ok(())
    }

    /// Allocate in kernel space, at the first free span above `VMA_KERNEL`.
    ///
    /// # Errors
    /// See [`alloc_region`](Self::alloc_region).
    pub fn alloc_kernel_region(
        &mut self,
        target: PhysicalAddress,
        size: u32,
        flags: AllocFlags,
        tag: &str,
    ) -> Result<LinearAddress, MemoryError> {
        self.alloc_region(
            LinearAddress::new(VMA_KERNEL),
            target,
            size,
            flags | AllocFlags::AT_OR_OVER,
            tag,
        )
    }

    /// Resize a kernel region that maps freely chosen frames.
    ///
    /// # Errors
    /// See [`resize_region`](Self::resize_region).
    pub fn resize_kernel_region(
        &mut self,
        base: LinearAddress,
        size: u32,
        new_size: u32,
        flags: AllocFlags,
    ) -> Result<(), MemoryError> {
        self.resize_region(
            base,
            PhysicalAddress::zero(),
            size,
            new_size,
            flags | AllocFlags::AT_OR_OVER,
        )
    }

    /// Map `size` bytes of device memory at `physical` uncached into kernel space.
    ///
    /// Returns the linear address of `physical` itself, which keeps its
    /// offset into the first page.
    ///
    /// # Errors
    /// Fails for a null address or zero size, or if the mapping fails.
    pub fn map_io_memory(&mut self, physical: PhysicalAddress, size: u32) -> Result<LinearAddress, MemoryError> {
        self.map_device_memory(
            physical,
            size,
            AllocFlags::COMMIT
                | AllocFlags::READ_WRITE
                | AllocFlags::UNCACHED
                | AllocFlags::IO
                | AllocFlags::AT_OR_OVER,
            "IOMemory",
        )
    }

    /// Map a framebuffer write-combined, falling back to an uncached mapping.
    ///
    /// # Errors
    /// Fails for a null address or zero size, or if both mappings fail.
    pub fn map_framebuffer_memory(
        &mut self,
        physical: PhysicalAddress,
        size: u32,
    ) -> Result<LinearAddress, MemoryError> {
        let flags = AllocFlags::COMMIT
            | AllocFlags::READ_WRITE
            | AllocFlags::WRITE_COMBINE
            | AllocFlags::IO
            | AllocFlags::AT_OR_OVER;
        match self.map_device_memory(physical, size, flags, "Framebuffer") {
            Err(e @ MemoryError::InvalidArgument(_)) => Err(e),
            Err(e) => {
                warn!("write-combined framebuffer mapping failed ({e}), mapping uncached");
                self.map_io_memory(physical, size)
            }
            ok => ok,
        }
    }

    /// Undo [`map_io_memory`](Self::map_io_memory).
    ///
    /// # Errors
    /// Fails for a null address or zero size.
    pub fn unmap_io_memory(&mut self, linear: LinearAddress, size: u32) -> Result<(), MemoryError> {
        if linear.is_null() || size == 0 {
            return Err(MemoryError::InvalidArgument("null address or zero size"));
        }
        let span = size
            .checked_add(linear.offset::<Size4K>())
            .ok_or(MemoryError::InvalidArgument("device span wraps"))?;
        self.free_region(linear.align_down::<Size4K>(), span)
    }

    /// `true` if `linear` is mapped to a frame in the active directory.
    pub fn is_valid_memory(&mut self, linear: LinearAddress) -> bool {
        ActiveDirectory::new(&mut self.cpu).is_valid(linear)
    }

    /// Translate `linear` through the active directory.
    pub fn map_linear_to_physical(&mut self, linear: LinearAddress) -> Option<PhysicalAddress> {
        ActiveDirectory::new(&mut self.cpu).resolve(linear)
    }

    /// Bring the kernel-space mapping of `linear` in the active directory up
    /// to date with the kernel directory.
    ///
    /// Returns `true` if an entry was copied, i.e. the faulting access can be
    /// retried.
    pub fn resolve_kernel_page_fault(&mut self, linear: LinearAddress) -> bool {
        if !is_kernel_address(linear) || self.kernel_directory_active() {
            return false;
        }
        let dir = linear.directory_index();
        if dir == SELF_MAP_SLOT {
            return false;
        }

        let kernel_pde = self
            .window
            .read_directory_entry(&mut self.cpu, self.kernel_directory, dir);
        if !kernel_pde.is_present() {
            return false;
        }

        let mut mirrored = false;
        let active_pde = ActiveDirectory::new(&mut self.cpu).read_pde(dir);
        if !active_pde.is_present() || active_pde.table_address() != kernel_pde.table_address() {
            ActiveDirectory::new(&mut self.cpu).write_pde(dir, kernel_pde);
            self.cpu.flush_tlb();
            mirrored = true;
        }

        let kernel_pte = PtEntry::from_raw(self.window.read_entry(
            &mut self.cpu,
            TemporarySlot::Second,
            kernel_pde.table_address(),
            linear.table_index(),
        ));
        let mut active = ActiveDirectory::new(&mut self.cpu);
        if comparable(active.read_pte(linear)) != comparable(kernel_pte) {
            active.write_pte(linear, kernel_pte);
            mirrored = true;
        }

        if mirrored {
            debug!("mirrored kernel mapping of {linear}");
        }
        mirrored
    }

    fn map_device_memory(
        &mut self,
        physical: PhysicalAddress,
        size: u32,
        flags: AllocFlags,
        tag: &str,
    ) -> Result<LinearAddress, MemoryError> {
        if physical.is_null() || size == 0 {
            return Err(MemoryError::InvalidArgument("null physical address or zero size"));
        }
        let offset = physical.offset::<Size4K>();
        let span = size
            .checked_add(offset)
            .ok_or(MemoryError::InvalidArgument("device span wraps"))?;
        let base = self.alloc_region(
            LinearAddress::new(VMA_KERNEL),
            physical.align_down::<Size4K>(),
            span,
            flags,
            tag,
        )?;
        Ok(base + offset)
    }

    fn check_ceiling(&self, size: u32) -> Result<(), MemoryError> {
        let ceiling = self.config.allocation_ceiling(self.frames.memory_size());
        if size > ceiling {
            error!("request of {size:#x} bytes exceeds the ceiling of {ceiling:#x} bytes");
            return Err(MemoryError::SizeAboveCeiling { size, ceiling });
        }
        Ok(())
    }

    fn kernel_directory_active(&self) -> bool {
        self.cpu.page_directory() == self.kernel_directory
    }

    /// First free span of `pages` pages at or above `start`.
    fn find_free_region(&mut self, start: LinearAddress, pages: u32) -> Result<LinearAddress, MemoryError> {
        let lowest = start.as_u32().max(RESERVED_LOW_MEMORY);
        let span = u64::from(pages) * u64::from(PAGE_SIZE);
        let mut candidate = LinearAddress::new(lowest)
            .align_up::<Size4K>()
            .map_or(u64::from(PT_BASE_VA), |a| u64::from(a.as_u32()));

        while candidate + span <= u64::from(PT_BASE_VA) {
            let base = LinearAddress::new(candidate as u32);
            match self.first_used_page(base, pages) {
                None => return Ok(base),
                Some(used) => candidate = u64::from(used.as_u32()) + u64::from(PAGE_SIZE),
            }
        }

        error!("no free span of {pages} pages at or above {start}");
        Err(MemoryError::NoFreeSpan { start, pages })
    }

    fn first_used_page(&mut self, base: LinearAddress, pages: u32) -> Option<LinearAddress> {
        (0..pages)
            .map(|i| base.page_offset(i))
            .find(|&page| self.page_in_use(page))
    }

    fn is_region_free(&mut self, base: LinearAddress, pages: u32) -> bool {
        self.first_used_page(base, pages).is_none()
    }

    /// A page is in use when its PTE is mapped or reserved, in the active
    /// directory or, for kernel pages, in the kernel directory.
    fn page_in_use(&mut self, page: LinearAddress) -> bool {
        let used = ActiveDirectory::new(&mut self.cpu)
            .try_read_pte(page)
            .is_some_and(PtEntry::is_used);
        used || (is_kernel_address(page) && !self.kernel_directory_active() && self.kernel_page_in_use(page))
    }

    fn kernel_page_in_use(&mut self, page: LinearAddress) -> bool {
        let pde = self
            .window
            .read_directory_entry(&mut self.cpu, self.kernel_directory, page.directory_index());
        pde.is_present()
            && PtEntry::from_raw(self.window.read_entry(
                &mut self.cpu,
                TemporarySlot::Second,
                pde.table_address(),
                page.table_index(),
            ))
            .is_used()
    }

    /// Write the entries of `pages` pages at `base`; on failure every page
    /// written so far is unmapped again.
    fn populate_region_pages(
        &mut self,
        base: LinearAddress,
        target: PhysicalAddress,
        pages: u32,
        flags: AllocFlags,
    ) -> Result<(), MemoryError> {
        let template = flags.entry_template(base);
        for index in 0..pages {
            let physical = if target.is_null() {
                target
            } else {
                target + index * PAGE_SIZE
            };
            if let Err(e) = self.populate_page(base.page_offset(index), physical, flags, template) {
                error!("populating {pages} pages at {base} failed after {index}: {e}");
                self.unmap_pages(base, index);
                self.free_empty_page_tables();
                self.cpu.flush_tlb();
                return Err(e);
            }
        }
        Ok(())
    }

    fn populate_page(
        &mut self,
        page: LinearAddress,
        target: PhysicalAddress,
        flags: AllocFlags,
        template: PageEntryBits,
    ) -> Result<(), MemoryError> {
        if is_kernel_address(page) {
            self.resolve_kernel_page_fault(page);
        }
        if !ActiveDirectory::new(&mut self.cpu)
            .read_pde(page.directory_index())
            .is_present()
        {
            self.alloc_page_table(page)?;
        }

        let entry = if !flags.contains(AllocFlags::COMMIT) {
            PtEntry::reserved(template)
        } else if target.is_null() {
            let frame = self.frames.alloc_page().ok_or(MemoryError::OutOfPhysicalMemory)?;
            PtEntry::make_4k(frame, template)
        } else if flags.contains(AllocFlags::IO) {
            PtEntry::make_4k(target, template.with_fixed(true))
        } else {
            self.frames.set_page_mark(target.frame(), true);
            PtEntry::make_4k(target, template)
        };

        ActiveDirectory::new(&mut self.cpu).write_pte(page, entry);
        self.sync_kernel_mapping(page);
        Ok(())
    }

    /// Give the directory slot of `linear` a fresh, zeroed page table.
    fn alloc_page_table(&mut self, linear: LinearAddress) -> Result<(), MemoryError> {
        let table = self.frames.alloc_page().ok_or(MemoryError::OutOfPhysicalMemory)?;
        self.window.zero_frame(&mut self.cpu, TemporarySlot::Second, table);

        let dir = linear.directory_index();
        ActiveDirectory::new(&mut self.cpu).write_pde(dir, PdEntry::table(table, is_user_address(linear)));
        self.cpu.flush_tlb();
        debug!("page table for slot {dir} at {table}");
        Ok(())
    }

    /// Write the mapping of kernel page `page` through to the kernel directory.
    fn sync_kernel_mapping(&mut self, page: LinearAddress) {
        if !is_kernel_address(page) || self.kernel_directory_active() {
            return;
        }
        let dir = page.directory_index();
        let active_pde = ActiveDirectory::new(&mut self.cpu).read_pde(dir);
        if !active_pde.is_present() {
            return;
        }

        let kernel_pde = self
            .window
            .read_directory_entry(&mut self.cpu, self.kernel_directory, dir);
        if !kernel_pde.is_present() {
            // the new table becomes the kernel's; it already holds the entry
            self.window.write_entry(
                &mut self.cpu,
                TemporarySlot::First,
                self.kernel_directory,
                dir,
                active_pde.raw(),
            );
            return;
        }

        let entry = ActiveDirectory::new(&mut self.cpu).read_pte(page);
        self.window.write_entry(
            &mut self.cpu,
            TemporarySlot::Second,
            kernel_pde.table_address(),
            page.table_index(),
            entry.raw(),
        );
    }

    /// Unmap, untrack and reclaim; the common tail of free and shrink.
    fn release_pages(&mut self, base: LinearAddress, pages: u32) {
        self.unmap_pages(base, pages);
        self.track_free(base, pages);
        self.free_empty_page_tables();
        self.cpu.flush_tlb();
    }

    fn unmap_pages(&mut self, base: LinearAddress, pages: u32) {
        for index in 0..pages {
            let page = base.page_offset(index);
            if is_kernel_address(page) {
                self.resolve_kernel_page_fault(page);
            }
            let Some(entry) = ActiveDirectory::new(&mut self.cpu).try_read_pte(page) else {
                continue;
            };
            if !entry.is_used() {
                continue;
            }
            if !entry.is_fixed()
                && let Some(frame) = entry.page_4k()
            {
                self.frames.free_page(frame);
            }
            ActiveDirectory::new(&mut self.cpu).write_pte(page, PtEntry::zero());
            self.sync_kernel_mapping(page);
        }
    }

    /// Drop page tables of the private user range that no longer map anything.
    fn free_empty_page_tables(&mut self) {
        for dir in USER_DIRECTORY_SLOT..TASK_RUNNER_DIRECTORY_SLOT {
            let mut active = ActiveDirectory::new(&mut self.cpu);
            let pde = active.read_pde(dir);
            if !pde.is_present() {
                continue;
            }
            if (0..ENTRIES_PER_TABLE).any(|i| active.read_table_entry(dir, i).is_used()) {
                continue;
            }
            active.write_pde(dir, PdEntry::zero());
            self.frames.free_page(pde.table_address());
            debug!("reclaimed empty page table of slot {dir}");
        }
    }
}

/// A physical target must fit below 4 GiB. Unless it maps device memory it
/// must also be page aligned and committed.
fn check_target(target: PhysicalAddress, pages: u32, flags: AllocFlags) -> Result<(), MemoryError> {
    if target.is_null() {
        return Ok(());
    }
    if !flags.contains(AllocFlags::IO) {
        if !target.is_aligned::<Size4K>() {
            error!("physical target {target} is not page aligned");
            return Err(MemoryError::MisalignedTarget(target));
        }
        if !flags.contains(AllocFlags::COMMIT) {
            error!("physical target {target} requested without COMMIT");
            return Err(MemoryError::TargetWithoutCommit);
        }
    }
    let end = u64::from(target.align_down::<Size4K>().as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
    if end > 1 << 32 {
        error!("{pages} pages at physical target {target} run past 4 GiB");
        return Err(MemoryError::InvalidArgument("physical target range wraps"));
    }
    Ok(())
}

/// An explicit span must be page aligned, above low memory and below the self map.
fn check_span(base: LinearAddress, pages: u32) -> Result<(), MemoryError> {
    if !base.is_aligned::<Size4K>() {
        return Err(MemoryError::MisalignedBase(base));
    }
    let end = u64::from(base.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
    if base.as_u32() < RESERVED_LOW_MEMORY || end > u64::from(PT_BASE_VA) {
        return Err(MemoryError::OutOfRange(base));
    }
    Ok(())
}

/// Entry bits without the ones the MMU updates on access.
const fn comparable(entry: PtEntry) -> u32 {
    entry.flags().with_accessed(false).with_dirty(false).into_bits()
}
