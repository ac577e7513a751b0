//! Guest memory-slot table and range-containment checks.
//!
//! Grounded on `guest.c`'s `update_memslot` (bounds-checks
//! `slot->npages`, dedupes by address range, appends under `guest->sn`)
//! and the `is_range_valid`/`is_range_valid_uaddr` checks `guest_map_range`
//! and `guest_user_copy` call before touching a range. `helpers.h` is not
//! read in full here; the slot shape below is inferred from its call
//! sites (`base_gfn`/`npages` -> IPA range) rather than copied verbatim,
//! since the kernel `kvm_memslot`/`kvm_userspace_memory_region` structs
//! themselves are host-kernel types outside this core's scope.

use crate::error::{HvError, HvResult};
use crate::platform::{KVM_MEM_SLOTS_NUM, PAGE_SIZE_4KB};

const MAX_SLOT_PAGES: u64 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSlot {
    pub ipa_base: u64,
    pub size: u64,
}

impl MemSlot {
    pub fn contains_range(&self, addr: u64, len: u64) -> bool {
        len > 0 && addr >= self.ipa_base && addr.saturating_add(len) <= self.ipa_base + self.size
    }
}

/// Bounded list of memory slots for one guest, mirroring
/// `guest->slots[KVM_MEM_SLOTS_NUM]` / `guest->sn`.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotTable {
    slots: [Option<MemSlot>; KVM_MEM_SLOTS_NUM],
    count: usize,
}

impl SlotTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; KVM_MEM_SLOTS_NUM],
            count: 0,
        }
    }

    /// Registers a slot `[ipa_base, ipa_base+size)`. A slot whose range
    /// is already covered by an existing one is treated as a duplicate
    /// notification and silently accepted, matching `update_memslot`'s
    /// `is_range_valid` dedupe check.
    pub fn add(&mut self, ipa_base: u64, npages: u64) -> HvResult<()> {
        if npages == 0 || npages > MAX_SLOT_PAGES {
            return Err(HvError::Einval);
        }
        let size = npages * PAGE_SIZE_4KB;
        if self.is_range_valid(ipa_base, size) {
            return Ok(());
        }
        if self.count == KVM_MEM_SLOTS_NUM {
            return Err(HvError::Einval);
        }
        self.slots[self.count] = Some(MemSlot { ipa_base, size });
        self.count += 1;
        Ok(())
    }

    /// True if `[addr, addr+len)` falls entirely within a single
    /// registered slot. Mirrors `is_range_valid`.
    pub fn is_range_valid(&self, addr: u64, len: u64) -> bool {
        self.slots[..self.count]
            .iter()
            .filter_map(|s| s.as_ref())
            .any(|s| s.contains_range(addr, len))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.slots = [None; KVM_MEM_SLOTS_NUM];
        self.count = 0;
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}
