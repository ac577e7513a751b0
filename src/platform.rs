//! Board/layout constants.
//!
//! Grounded on the teacher's `platform.rs`, which collects base addresses
//! and bounds as `const` items rather than a runtime config struct. The
//! capacities below realize the specification's numeric bounds (guest
//! table, memslot table, table arena, measurement table).

/// Upper bound on concurrently registered guests.
pub const MAX_GUESTS: usize = 16;

/// Upper bound on memory slots tracked per guest (mirrors KVM's
/// `KVM_MEM_SLOTS_NUM` naming, used directly by the teacher's `vm.rs`
/// sibling modules for the equivalent host-side bound).
pub const KVM_MEM_SLOTS_NUM: usize = 32;

/// Upper bound on paging-structure blocks (non-leaf tables) a single
/// guest's stage-2 walk may allocate before `Enospc`.
pub const MAX_PAGING_BLOCKS: usize = 512;

/// Number of 4 KiB page-table frames held in the static arena. Sized for
/// the worst case of every guest mapping its full IPA space at 4 KiB
/// granularity; dominates `.bss` at roughly 32 MiB.
pub const TABLE_ARENA_CAPACITY: usize = 8192;

/// Upper bound on tracked page-content measurements across all guests.
pub const MAX_MEASUREMENTS: usize = 4096;

/// VMID reserved for the host/hypervisor itself; never assigned to a
/// guest by `GuestRegistry::init_guest`.
pub const HOST_VMID: u16 = 0;

/// 4 KiB granule page size, the only granule this core supports.
pub const PAGE_SIZE_4KB: u64 = 4096;
pub const PAGE_MASK_4KB: u64 = PAGE_SIZE_4KB - 1;

/// 2 MiB block size at translation level 2.
pub const BLOCK_SIZE_2MB: u64 = 2 * 1024 * 1024;
pub const BLOCK_MASK_2MB: u64 = BLOCK_SIZE_2MB - 1;

/// 1 GiB block size at translation level 1.
pub const BLOCK_SIZE_1GB: u64 = 1024 * 1024 * 1024;
pub const BLOCK_MASK_1GB: u64 = BLOCK_SIZE_1GB - 1;

/// Base address and size of the bootstrap heap the free-list allocator
/// refills from, mirroring the teacher's `mm/heap.rs` constants.
pub const HEAP_START: u64 = 0x4100_0000;
pub const HEAP_SIZE: u64 = 0x0100_0000;
