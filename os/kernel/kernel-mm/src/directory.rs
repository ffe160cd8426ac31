//! # Page directory construction
//!
//! Two builders produce complete directories in freshly allocated frames,
//! editing them exclusively through the temporary window:
//!
//! | Slot | Bootstrap directory | User directory |
//! |------|---------------------|----------------|
//! | 0 | identity table (low 4 MiB) | own identity table |
//! | 1..639 | empty | empty (process private) |
//! | 639 | task runner table (user) | copied |
//! | 640..768 | empty | copied if present |
//! | 768 | kernel image table | copied |
//! | 769..1023 | empty | copied if present |
//! | 1023 | self map | self map |

use crate::MemoryError;
use crate::manager::MemoryManager;
use kernel_alloc::PhysicalPageAllocator;
use kernel_info::memory::{
    BIOS_ZONE_END, BIOS_ZONE_START, ENTRIES_PER_TABLE, KERNEL_DIRECTORY_SLOT, SELF_MAP_SLOT,
    TASK_RUNNER_DIRECTORY_SLOT, USER_DIRECTORY_SLOT, VMA_TASK_RUNNER,
};
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress};
use kernel_vmem::{ActiveDirectory, Cpu, PageEntryBits, PdEntry, PtEntry, TemporarySlot};
use log::{debug, error};

impl<C: Cpu, A: PhysicalPageAllocator> MemoryManager<C, A> {
    /// Build the bootstrap (kernel) directory and return its frame.
    ///
    /// Maps the low 4 MiB identically, the kernel image at `VMA_KERNEL`, the
    /// task runner page at `VMA_TASK_RUNNER` for user mode, and the self map.
    ///
    /// # Errors
    /// Fails if the four frames cannot be allocated; none stays allocated.
    pub fn alloc_page_directory(&mut self) -> Result<PhysicalAddress, MemoryError> {
        let [directory, low_table, kernel_table, runner_table] = self.alloc_frames::<4>()?;

        let dir_page = self.window.map(&mut self.cpu, TemporarySlot::First, directory);
        self.cpu.zero_page(dir_page);
        self.write_slot(dir_page, 0, PdEntry::table(low_table, false).raw());
        self.write_slot(dir_page, KERNEL_DIRECTORY_SLOT, PdEntry::table(kernel_table, false).raw());
        self.write_slot(dir_page, TASK_RUNNER_DIRECTORY_SLOT, PdEntry::table(runner_table, true).raw());
        self.write_slot(dir_page, SELF_MAP_SLOT, PdEntry::table(directory, false).raw());

        self.fill_low_table(low_table);

        let kernel_base = self.startup.kernel_physical_base();
        let table = self.window.map(&mut self.cpu, TemporarySlot::Second, kernel_table);
        for index in 0..ENTRIES_PER_TABLE {
            let frame = kernel_base + (index as u32) * PAGE_SIZE;
            let entry = PtEntry::make_4k(frame, PageEntryBits::new_fixed_rw(frame));
            self.write_slot(table, index, entry.raw());
        }

        let runner = self.startup.task_runner_physical();
        let table = self.window.map(&mut self.cpu, TemporarySlot::Second, runner_table);
        self.cpu.zero_page(table);
        let entry = PtEntry::make_4k(runner, PageEntryBits::new_fixed_rw(runner).with_user_access(true));
        let index = LinearAddress::new(VMA_TASK_RUNNER).table_index();
        self.write_slot(table, index, entry.raw());

        self.cpu.flush_tlb();
        debug!("bootstrap page directory at {directory}");
        Ok(directory)
    }

    /// Build a directory for a new process.
    ///
    /// Shares every present slot of the active directory except the private
    /// user range, gets its own low identity table and self map.
    ///
    /// # Errors
    /// Fails if the two frames cannot be allocated; none stays allocated.
    ///
    /// # Panics
    /// Panics if no kernel page table can be found to share.
    pub fn alloc_user_page_directory(&mut self) -> Result<PhysicalAddress, MemoryError> {
        let [directory, low_table] = self.alloc_frames::<2>()?;

        let dir_page = self.window.map(&mut self.cpu, TemporarySlot::First, directory);
        self.cpu.zero_page(dir_page);
        self.write_slot(dir_page, 0, PdEntry::table(low_table, false).raw());

        for slot in 1..SELF_MAP_SLOT {
            if (USER_DIRECTORY_SLOT..TASK_RUNNER_DIRECTORY_SLOT).contains(&slot) {
                continue;
            }
            let pde = ActiveDirectory::new(&mut self.cpu).read_pde(slot);
            if pde.is_present() {
                self.write_slot(dir_page, slot, pde.raw());
            }
        }

        let kernel_slot = dir_page + (KERNEL_DIRECTORY_SLOT as u32) * 4;
        if !PdEntry::from_raw(self.cpu.read_u32(kernel_slot)).is_present() {
            // the active directory lost its kernel half; take it from the canonical one
            let canonical = PdEntry::from_raw(self.window.read_entry(
                &mut self.cpu,
                TemporarySlot::Third,
                self.kernel_directory,
                KERNEL_DIRECTORY_SLOT,
            ));
            if !canonical.is_present() {
                error!("no kernel page table to share with directory {directory}");
                panic!("kernel page directory entry missing while building a user directory");
            }
            self.cpu.write_u32(kernel_slot, canonical.raw());
        }

        self.write_slot(dir_page, SELF_MAP_SLOT, PdEntry::table(directory, false).raw());

        self.fill_low_table(low_table);

        self.cpu.flush_tlb();
        debug!("user page directory at {directory}");
        Ok(directory)
    }

    /// Identity map the low 4 MiB into `table`, leaving the BIOS zone out if configured.
    fn fill_low_table(&mut self, table: PhysicalAddress) {
        let protect = self.config.protect_bios;
        let page = self.window.map(&mut self.cpu, TemporarySlot::Second, table);
        for index in 0..ENTRIES_PER_TABLE {
            let frame = PhysicalAddress::new((index as u32) * PAGE_SIZE);
            let protected = protect
                && (frame.is_null()
                    || (frame.as_u32() > BIOS_ZONE_START && frame.as_u32() <= BIOS_ZONE_END));
            let entry = if protected {
                PtEntry::zero()
            } else {
                PtEntry::make_4k(frame, PageEntryBits::new_fixed_rw(frame))
            };
            self.write_slot(page, index, entry.raw());
        }
    }

    /// Store entry `index` of the table mapped at `page`.
    fn write_slot(&mut self, page: LinearAddress, index: usize, raw: u32) {
        self.cpu.write_u32(page + (index as u32) * 4, raw);
    }

    /// Allocate `N` frames at once, or none.
    fn alloc_frames<const N: usize>(&mut self) -> Result<[PhysicalAddress; N], MemoryError> {
        let mut frames = [PhysicalAddress::zero(); N];
        for i in 0..N {
            if let Some(frame) = self.frames.alloc_page() {
                frames[i] = frame;
            } else {
                for &frame in &frames[..i] {
                    self.frames.free_page(frame);
                }
                error!("out of physical memory while building a page directory");
                return Err(MemoryError::OutOfPhysicalMemory);
            }
        }
        Ok(frames)
    }
}
