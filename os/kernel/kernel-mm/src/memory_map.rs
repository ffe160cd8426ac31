//! Human-readable listing of the regions of one process.

use crate::descriptor::RegionDescriptor;
use crate::ProcessId;
use alloc::vec::Vec;
use core::fmt;

/// Formats as a header line followed by one line per region:
///
/// ```text
/// Kernel regions: 2
/// 0: tag=Heap base=0xC0401000 size=12 KiB phys=???
/// 1: tag=IOMemory base=0xC0404000 size=8 KiB phys=0x00F00000
/// ```
pub struct MemoryMap {
    owner: ProcessId,
    regions: Vec<RegionDescriptor>,
}

impl MemoryMap {
    /// A listing of `regions`, which must be in base order.
    #[must_use]
    pub const fn new(owner: ProcessId, regions: Vec<RegionDescriptor>) -> Self {
        Self { owner, regions }
    }
}

impl fmt::Display for MemoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.regions.len();
        if self.owner.is_kernel() {
            writeln!(f, "Kernel regions: {count}")?;
        } else {
            writeln!(f, "{} regions: {count}", self.owner)?;
        }

        for (i, region) in self.regions.iter().enumerate() {
            let tag = if region.tag.is_empty() { "???" } else { region.tag.as_str() };
            write!(f, "{i}: tag={tag} base={} size={}", region.base, ByteSize(region.size))?;
            if region.is_exact() {
                writeln!(f, " phys={}", region.physical_base)?;
            } else {
                writeln!(f, " phys=???")?;
            }
        }
        Ok(())
    }
}

struct ByteSize(u32);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: u32 = 1024;
        const MIB: u32 = 1024 * KIB;
        match self.0 {
            n if n >= MIB && n % MIB == 0 => write!(f, "{} MiB", n / MIB),
            n if n >= KIB && n % KIB == 0 => write!(f, "{} KiB", n / KIB),
            n => write!(f, "{n} B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AllocFlags;
    use kernel_memory_addresses::{LinearAddress, PhysicalAddress};

    #[test]
    fn lists_regions_in_base_order() {
        let process = ProcessId::new(3);
        let regions = [
            (0x0040_0000, 0x00F0_0000, 2, "IOMemory"),
            (0x0080_0000, 0, 1024, ""),
        ]
        .into_iter()
        .map(|(base, phys, pages, tag)| {
            RegionDescriptor::new(
                process,
                LinearAddress::new(base),
                PhysicalAddress::new(phys),
                pages,
                AllocFlags::COMMIT,
                tag,
            )
        })
        .collect();

        let text = MemoryMap::new(process, regions).to_string();
        assert_eq!(
            text,
            "process 3 regions: 2\n\
             0: tag=IOMemory base=0x00400000 size=8 KiB phys=0x00F00000\n\
             1: tag=??? base=0x00800000 size=4 MiB phys=???\n"
        );
        assert_eq!(MemoryMap::new(ProcessId::KERNEL, Vec::new()).to_string(), "Kernel regions: 0\n");
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(ByteSize(4096).to_string(), "4 KiB");
        assert_eq!(ByteSize(100).to_string(), "100 B");
        assert_eq!(ByteSize(0x0200_0000).to_string(), "32 MiB");
    }
}
