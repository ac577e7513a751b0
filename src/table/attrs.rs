//! Stage-2 protection and memory-type bit compositions.
//!
//! The teacher hand-rolls descriptor bit patterns as raw shifts
//! (`arch/aarch64/mm/mmu.rs`'s `MemoryAttributes::NORMAL`/`DEVICE`/
//! `READONLY` consts). The specification calls these out as named bit
//! compositions rather than opaque integers, which is exactly what
//! `bitflags` (imported here as an enrichment, following
//! `metta-systems-vesper`'s use of the same crate for its own stage-1
//! attribute words) is for: a typed, checkably-exhaustive set of flags
//! that still compiles down to the same `u64` the hardware wants.

use bitflags::bitflags;

bitflags! {
    /// Stage-2 access-permission and dirty-bit-management flags, stored
    /// in the low bits of a leaf descriptor alongside the memory type.
    #[derive(Default)]
    pub struct Prot: u64 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Hardware dirty-bit management (DBM): asks the MMU to report
        /// first-touch instead of trapping, mirrored on the original
        /// `guest_map_range`'s `bit_set(prot, DBM_BIT)` before mapping.
        const DBM     = 1 << 3;
    }
}

impl Prot {
    pub const RW: Prot = Prot::from_bits_truncate(Prot::READ.bits() | Prot::WRITE.bits());
    pub const RWX: Prot =
        Prot::from_bits_truncate(Prot::READ.bits() | Prot::WRITE.bits() | Prot::EXECUTE.bits());
    pub const RO: Prot = Prot::READ;
}

/// Stage-2 memory type, encoded into the descriptor's `MemAttr` field.
/// Matches the three variants the teacher's `MemoryAttribute` enum
/// distinguishes (`arch/aarch64/mm/mmu.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    Normal,
    Device,
    NormalReadOnly,
}

impl MemType {
    pub const fn mem_attr_index(self) -> u64 {
        match self {
            MemType::Normal | MemType::NormalReadOnly => 0b1111,
            MemType::Device => 0b0000,
        }
    }
}
