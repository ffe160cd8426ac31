//! Software MMU with a translation cache.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{LinearAddress, PAGE_MASK, PageSize, PhysicalAddress, Size4K};
use kernel_vmem::{Cpu, PdEntry, PtEntry};

type Frame = Box<[u32; ENTRIES_PER_TABLE]>;

/// Counters of TLB maintenance performed by the code under test.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TlbStats {
    pub flushes: u32,
    pub invalidations: u32,
    pub directory_loads: u32,
}

/// A single i386 processor with sparse physical memory.
///
/// Physical frames are materialized on first write and read as zero before.
/// Linear accesses walk the directory in CR3 and cache the result per page,
/// like the hardware TLB: a stale entry keeps translating to the old frame
/// until [`Cpu::invalidate_page`] or [`Cpu::flush_tlb`] drops it.
pub struct SimulatedMachine {
    memory_size: u32,
    frames: BTreeMap<u32, Frame>,
    cr3: PhysicalAddress,
    tlb: BTreeMap<u32, u32>,
    stats: TlbStats,
}

impl SimulatedMachine {
    /// A machine with `memory_size` bytes of RAM and paging disabled.
    #[must_use]
    pub const fn new(memory_size: u32) -> Self {
        Self {
            memory_size,
            frames: BTreeMap::new(),
            cr3: PhysicalAddress::zero(),
            tlb: BTreeMap::new(),
            stats: TlbStats {
                flushes: 0,
                invalidations: 0,
                directory_loads: 0,
            },
        }
    }

    #[must_use]
    pub const fn memory_size(&self) -> u32 {
        self.memory_size
    }

    #[must_use]
    pub const fn stats(&self) -> TlbStats {
        self.stats
    }

    /// Number of cached translations.
    #[must_use]
    pub fn cached_translations(&self) -> usize {
        self.tlb.len()
    }

    /// Read a word of physical memory, bypassing paging.
    ///
    /// # Panics
    /// Panics if `physical` lies outside RAM or is not word aligned.
    #[must_use]
    pub fn read_physical(&self, physical: PhysicalAddress) -> u32 {
        let (frame, word) = self.locate(physical);
        self.frames.get(&frame).map_or(0, |f| f[word])
    }

    /// Write a word of physical memory, bypassing paging.
    ///
    /// # Panics
    /// Panics if `physical` lies outside RAM or is not word aligned.
    pub fn write_physical(&mut self, physical: PhysicalAddress, value: u32) {
        let (frame, word) = self.locate(physical);
        if value == 0 && !self.frames.contains_key(&frame) {
            return;
        }
        self.frames
            .entry(frame)
            .or_insert_with(|| Box::new([0; ENTRIES_PER_TABLE]))[word] = value;
    }

    /// `true` if every word of the frame at `physical` is zero.
    #[must_use]
    pub fn frame_is_zero(&self, physical: PhysicalAddress) -> bool {
        self.frames
            .get(&physical.frame())
            .is_none_or(|f| f.iter().all(|&w| w == 0))
    }

    /// Entry `index` of the directory or table stored in frame `table`.
    #[must_use]
    pub fn read_entry(&self, table: PhysicalAddress, index: usize) -> u32 {
        self.read_physical(table.align_down::<Size4K>() + (index as u32) * 4)
    }

    /// Walk `directory` for `linear` without consulting or filling the TLB.
    #[must_use]
    pub fn walk(&self, directory: PhysicalAddress, linear: LinearAddress) -> Option<PhysicalAddress> {
        let pde = PdEntry::from_raw(self.read_entry(directory, linear.directory_index()));
        if !pde.is_present() {
            return None;
        }
        let pte = PtEntry::from_raw(self.read_entry(pde.table_address(), linear.table_index()));
        pte.page_4k().map(|page| page + linear.offset::<Size4K>())
    }

    /// Translate through the TLB, filling it on a miss.
    pub fn translate(&mut self, linear: LinearAddress) -> Option<PhysicalAddress> {
        assert!(!self.cr3.is_null(), "paging is not enabled");
        let page = linear.as_u32() >> Size4K::SHIFT;
        if let Some(&frame) = self.tlb.get(&page) {
            return Some(PhysicalAddress::from_frame(frame) + linear.offset::<Size4K>());
        }
        let physical = self.walk(self.cr3, linear)?;
        self.tlb.insert(page, physical.frame());
        Some(physical)
    }

    fn locate(&self, physical: PhysicalAddress) -> (u32, usize) {
        assert!(
            physical.as_u32() < self.memory_size,
            "physical access beyond RAM at {physical}"
        );
        assert_eq!(physical.as_u32() % 4, 0, "unaligned access at {physical}");
        (physical.frame(), (physical.offset::<Size4K>() / 4) as usize)
    }

    fn translate_or_fault(&mut self, linear: LinearAddress) -> PhysicalAddress {
        match self.translate(linear) {
            Some(physical) => physical,
            None => panic!("page fault at {linear} (cr3 = {})", self.cr3),
        }
    }
}

impl Cpu for SimulatedMachine {
    fn page_directory(&self) -> PhysicalAddress {
        self.cr3
    }

    fn load_page_directory(&mut self, directory: PhysicalAddress) {
        self.cr3 = PhysicalAddress::new(directory.as_u32() & PAGE_MASK);
        self.tlb.clear();
        self.stats.directory_loads += 1;
    }

    fn flush_tlb(&mut self) {
        self.tlb.clear();
        self.stats.flushes += 1;
    }

    fn invalidate_page(&mut self, linear: LinearAddress) {
        self.tlb.remove(&(linear.as_u32() >> Size4K::SHIFT));
        self.stats.invalidations += 1;
    }

    fn read_u32(&mut self, linear: LinearAddress) -> u32 {
        let physical = self.translate_or_fault(linear);
        self.read_physical(physical)
    }

    fn write_u32(&mut self, linear: LinearAddress, value: u32) {
        let physical = self.translate_or_fault(linear);
        self.write_physical(physical, value);
    }
}
