mod common;

use common::{COMMIT_RW, MEMORY, PAGE, la, manager, manager_with};
use kernel_info::memory::{
    KERNEL_DIRECTORY_SLOT, PD_VA, SELF_MAP_SLOT, TASK_RUNNER_DIRECTORY_SLOT, USER_DIRECTORY_SLOT, VMA_TASK_RUNNER,
    VMA_USER,
};
use kernel_memory_addresses::PhysicalAddress;
use kernel_mm::{AllocFlags, MemoryConfig, MemoryError, ProcessId};
use kernel_vmem::{Cpu, PdEntry, PtEntry};

#[test]
fn bootstrap_directory_is_loaded_and_self_mapped() {
    let mm = manager();
    let dir = mm.kernel_directory();
    assert_eq!(mm.cpu().page_directory(), dir);
    assert_eq!(mm.address_space(ProcessId::KERNEL), Some(dir));
    assert_eq!(mm.current_process(), ProcessId::KERNEL);

    assert_eq!(mm.cpu().walk(dir, la(PD_VA)), Some(dir));
    let self_pde = PdEntry::from_raw(mm.cpu().read_entry(dir, SELF_MAP_SLOT));
    assert_eq!(self_pde.table_address(), dir);
}

#[test]
fn bootstrap_directory_maps_low_memory_and_the_kernel() {
    let mm = manager();
    let dir = mm.kernel_directory();
    let cpu = mm.cpu();

    assert_eq!(cpu.walk(dir, la(0x0000_5123)), Some(PhysicalAddress::new(0x0000_5123)));
    assert_eq!(cpu.walk(dir, la(0x003F_F000)), Some(PhysicalAddress::new(0x003F_F000)));
    assert_eq!(cpu.walk(dir, la(0xC000_1000)), Some(PhysicalAddress::new(0x0010_1000)));
    assert_eq!(cpu.walk(dir, la(0xC03F_F000)), Some(PhysicalAddress::new(0x004F_F000)));

    let kernel_pde = PdEntry::from_raw(cpu.read_entry(dir, KERNEL_DIRECTORY_SLOT));
    assert!(!kernel_pde.flags().user_access());
}

#[test]
fn task_runner_page_is_user_visible() {
    let mm = manager();
    let dir = mm.kernel_directory();
    let runner = mm.startup().task_runner_physical();
    assert_eq!(mm.cpu().walk(dir, la(VMA_TASK_RUNNER)), Some(runner));

    let pde = PdEntry::from_raw(mm.cpu().read_entry(dir, TASK_RUNNER_DIRECTORY_SLOT));
    assert!(pde.flags().user_access());
    let pte = PtEntry::from_raw(
        mm.cpu()
            .read_entry(pde.table_address(), la(VMA_TASK_RUNNER).table_index()),
    );
    assert!(pte.flags().user_access());
    assert!(pte.is_fixed());

    // only the trampoline is mapped in that table
    assert_eq!(mm.cpu().walk(dir, la(VMA_TASK_RUNNER - PAGE)), None);
}

#[test]
fn bios_zone_can_be_left_unmapped() {
    let mm = manager_with(MEMORY, MemoryConfig::new().with_protect_bios(true));
    let dir = mm.kernel_directory();
    let cpu = mm.cpu();

    assert_eq!(cpu.walk(dir, la(0)), None);
    assert!(cpu.walk(dir, la(0x0000_1000)).is_some());
    assert!(cpu.walk(dir, la(0x000C_0000)).is_some());
    assert_eq!(cpu.walk(dir, la(0x000C_1000)), None);
    assert_eq!(cpu.walk(dir, la(0x000F_F000)), None);
    assert!(cpu.walk(dir, la(0x0010_0000)).is_some());

    let unprotected = manager();
    assert!(unprotected.cpu().walk(unprotected.kernel_directory(), la(0x000C_1000)).is_some());
}

#[test]
fn user_directory_shares_the_kernel_half_only() {
    let mut mm = manager();
    let kernel = mm.kernel_directory();
    mm.alloc_region(la(VMA_USER), PhysicalAddress::zero(), PAGE, COMMIT_RW, "KernelOwnedUser")
        .expect("user range allocation in the kernel directory");
    assert!(PdEntry::from_raw(mm.cpu().read_entry(kernel, USER_DIRECTORY_SLOT)).is_present());

    let process = ProcessId::new(1);
    let dir = mm.create_address_space(process).expect("user directory");
    assert_ne!(dir, kernel);

    let cpu = mm.cpu();
    assert_eq!(
        cpu.read_entry(dir, KERNEL_DIRECTORY_SLOT),
        cpu.read_entry(kernel, KERNEL_DIRECTORY_SLOT)
    );
    assert_eq!(
        cpu.read_entry(dir, TASK_RUNNER_DIRECTORY_SLOT),
        cpu.read_entry(kernel, TASK_RUNNER_DIRECTORY_SLOT)
    );
    assert_eq!(cpu.read_entry(dir, USER_DIRECTORY_SLOT), 0);
    assert_eq!(PdEntry::from_raw(cpu.read_entry(dir, SELF_MAP_SLOT)).table_address(), dir);

    // a private identity table, mapping the same frames
    assert_ne!(cpu.read_entry(dir, 0), cpu.read_entry(kernel, 0));
    assert_eq!(cpu.walk(dir, la(0x0002_0000)), Some(PhysicalAddress::new(0x0002_0000)));
    assert_eq!(cpu.walk(dir, la(0xC000_1000)), Some(PhysicalAddress::new(0x0010_1000)));
}

#[test]
fn address_spaces_are_registered_and_switched() {
    let mut mm = manager();
    let process = ProcessId::new(7);
    let dir = mm.create_address_space(process).expect("user directory");

    assert_eq!(
        mm.create_address_space(process),
        Err(MemoryError::AddressSpaceExists(process))
    );
    assert_eq!(
        mm.switch_address_space(ProcessId::new(8)),
        Err(MemoryError::UnknownAddressSpace(ProcessId::new(8)))
    );

    mm.switch_address_space(process).expect("switch");
    assert_eq!(mm.cpu().page_directory(), dir);
    assert_eq!(mm.current_process(), process);

    let base = mm
        .alloc_region(
            la(VMA_USER),
            PhysicalAddress::zero(),
            2 * PAGE,
            COMMIT_RW | AllocFlags::AT_OR_OVER,
            "Stack",
        )
        .expect("user allocation");
    assert_eq!(base, la(VMA_USER));
    assert_eq!(mm.descriptors(process).count(), 1);
    assert_eq!(mm.descriptors(ProcessId::KERNEL).count(), 0);

    mm.switch_address_space(ProcessId::KERNEL).expect("switch back");
    assert!(!mm.is_valid_memory(base));
}

#[test]
fn initialization_reserves_the_kernel_image() {
    use kernel_alloc::PhysicalPageAllocator;

    let mm = manager();
    let startup = *mm.startup();
    let first = startup.kernel_physical_base().frame();
    let last = first + startup.kernel_reserved_bytes / PAGE - 1;
    assert!(mm.frames().is_page_marked(first));
    assert!(mm.frames().is_page_marked(last));

    let pool = mm.descriptor_pool();
    assert_eq!(pool.slabs, 1);
    assert_eq!(pool.free, pool.total);
}
