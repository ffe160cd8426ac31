//! Unpaged memory for unit tests of code that only reads and writes words.

use alloc::collections::BTreeMap;
use kernel_memory_addresses::{LinearAddress, PhysicalAddress};
use kernel_vmem::Cpu;

/// Sparse linear memory that reads as zero until written.
#[derive(Default)]
pub struct FlatMemory {
    words: BTreeMap<u32, u32>,
}

impl FlatMemory {
    /// Words of the 4 KiB page at `page` that are not zero.
    pub fn nonzero_words(&self, page: LinearAddress) -> usize {
        let start = page.as_u32();
        self.words.range(start..start + 0x1000).filter(|&(_, &w)| w != 0).count()
    }
}

impl Cpu for FlatMemory {
    fn page_directory(&self) -> PhysicalAddress {
        PhysicalAddress::zero()
    }

    fn load_page_directory(&mut self, _directory: PhysicalAddress) {}

    fn flush_tlb(&mut self) {}

    fn invalidate_page(&mut self, _linear: LinearAddress) {}

    fn read_u32(&mut self, linear: LinearAddress) -> u32 {
        self.words.get(&linear.as_u32()).copied().unwrap_or(0)
    }

    fn write_u32(&mut self, linear: LinearAddress, value: u32) {
        self.words.insert(linear.as_u32(), value);
    }
}
