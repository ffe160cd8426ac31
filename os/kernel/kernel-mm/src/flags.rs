use kernel_info::memory::is_user_address;
use kernel_memory_addresses::LinearAddress;
use kernel_vmem::PageEntryBits;

bitflags::bitflags! {
    /// Options of a region allocation.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Back every page with a frame now. Without it, pages are only reserved.
        const COMMIT = 0x01;

        /// Map the pages writable.
        const READ_WRITE = 0x02;

        /// Disable caching (`PCD`). Wins over [`WRITE_COMBINE`](Self::WRITE_COMBINE).
        const UNCACHED = 0x04;

        /// Write-combining approximated by write-through (`PWT`).
        const WRITE_COMBINE = 0x08;

        /// The target is device memory: frames are not owned by the
        /// physical allocator and are never returned to it.
        const IO = 0x10;

        /// Treat the base as a lower bound and search for the first free span.
        const AT_OR_OVER = 0x20;
    }
}

impl AllocFlags {
    /// Permission and cache bits of the page entries of a region at `base`.
    #[must_use]
    pub(crate) fn entry_template(self, base: LinearAddress) -> PageEntryBits {
        let uncached = self.contains(Self::UNCACHED);
        PageEntryBits::new()
            .with_writable(self.contains(Self::READ_WRITE))
            .with_user_access(is_user_address(base))
            .with_cache_disabled(uncached)
            .with_write_through(self.contains(Self::WRITE_COMBINE) && !uncached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::{VMA_KERNEL, VMA_USER};

    #[test]
    fn uncached_wins_over_write_combine() {
        let flags = AllocFlags::UNCACHED | AllocFlags::WRITE_COMBINE;
        let bits = flags.entry_template(LinearAddress::new(VMA_KERNEL));
        assert!(bits.cache_disabled());
        assert!(!bits.write_through());
        assert!(!bits.user_access());
    }

    #[test]
    fn user_pages_get_the_user_bit() {
        let bits = (AllocFlags::COMMIT | AllocFlags::READ_WRITE).entry_template(LinearAddress::new(VMA_USER));
        assert!(bits.user_access());
        assert!(bits.writable());
        assert!(!bits.present());
    }
}
