use crate::ProcessId;
use kernel_memory_addresses::{LinearAddress, PhysicalAddress};

/// Recoverable failures of memory manager operations.
///
/// Every operation returning one of these has undone its partial work:
/// no page stays mapped, no frame stays marked and no descriptor stays
/// registered on behalf of the failed call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("out of physical memory")]
    OutOfPhysicalMemory,
    #[error("request of {size:#x} bytes exceeds the allocation ceiling of {ceiling:#x} bytes")]
    SizeAboveCeiling { size: u32, ceiling: u32 },
    #[error("physical target {0} is not page aligned")]
    MisalignedTarget(PhysicalAddress),
    #[error("an exact physical target requires COMMIT")]
    TargetWithoutCommit,
    #[error("linear base {0} is not page aligned")]
    MisalignedBase(LinearAddress),
    #[error("linear span at {0} is already in use")]
    SpanInUse(LinearAddress),
    #[error("no free linear span of {pages} pages at or above {start}")]
    NoFreeSpan { start: LinearAddress, pages: u32 },
    #[error("linear span at {0} leaves the mappable address space")]
    OutOfRange(LinearAddress),
    #[error("null base address")]
    NullBase,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("region descriptor pool exhausted")]
    DescriptorPoolExhausted,
    #[error("an address space for {0} already exists")]
    AddressSpaceExists(ProcessId),
    #[error("no address space for {0}")]
    UnknownAddressSpace(ProcessId),
}
