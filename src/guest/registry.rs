//! Guest lifecycle state machine and lookup table.
//!
//! Grounded on `guest.c`'s `static kvm_guest_t guests[MAX_GUESTS]` array
//! plus `get_free_guest`/`get_guest`/`init_guest`/`get_guest_by_kvm`/
//! `get_guest_by_s1pgd`/`get_guest_by_s2pgd`/`free_guest`. The opaque
//! `void *kvm` handle becomes a plain `u64` handle here (the core has no
//! notion of the host kernel's `struct kvm`); everything else — lookup by
//! several independent keys, lazy-allocate-on-first-lookup, teardown that
//! frees owned tables/measurements — carries over.

use crate::error::{HvError, HvResult};
use crate::guest::measure::MeasurementTable;
use crate::guest::slots::SlotTable;
use crate::log;
use crate::platform::{HOST_VMID, MAX_GUESTS};
use crate::table::arena::TableArena;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Invalid,
    Stopped,
    Running,
}

#[derive(Debug, PartialEq, Eq)]
pub struct GuestDescriptor {
    pub handle: u64,
    pub vmid: u16,
    pub state: VmState,
    pub s2_root_pa: u64,
    pub s1_root_pa: Option<u64>,
    pub slots: SlotTable,
    pub measurements: MeasurementTable<128>,
}

impl GuestDescriptor {
    const fn empty() -> Self {
        Self {
            handle: 0,
            vmid: 0,
            state: VmState::Invalid,
            s2_root_pa: 0,
            s1_root_pa: None,
            slots: SlotTable::new(),
            measurements: MeasurementTable::new(),
        }
    }

    fn in_use(&self) -> bool {
        self.state != VmState::Invalid
    }
}

/// Fixed table of up to `MAX_GUESTS` guests, indexed by an opaque host
/// handle, VMID, or stage-1/stage-2 root table address, mirroring the C
/// original's four lookup helpers over one backing array.
pub struct GuestRegistry {
    guests: [GuestDescriptor; MAX_GUESTS],
}

impl GuestRegistry {
    pub const fn new() -> Self {
        const EMPTY: GuestDescriptor = GuestDescriptor::empty();
        Self {
            guests: [EMPTY; MAX_GUESTS],
        }
    }

    fn free_slot(&mut self) -> Option<&mut GuestDescriptor> {
        self.guests.iter_mut().find(|g| !g.in_use())
    }

    /// Registers a new guest under `handle`, allocating its stage-2 root
    /// table from `arena`. Returns the existing descriptor if `handle`
    /// was already registered (mirrors `init_guest`'s idempotent retry
    /// loop via `get_guest_by_kvm`).
    pub fn init_guest<const N: usize>(
        &mut self,
        arena: &mut TableArena<N>,
        base_pa: u64,
        handle: u64,
        vmid: u16,
    ) -> HvResult<&mut GuestDescriptor> {
        if handle == 0 || vmid == HOST_VMID {
            return Err(HvError::Einval);
        }
        if self.guests.iter().any(|g| g.in_use() && g.handle == handle) {
            return self.by_handle_mut(handle).ok_or(HvError::Fatal);
        }
        let root = arena.alloc_table(vmid, base_pa)?;
        let slot = match self.free_slot() {
            Some(s) => s,
            None => {
                log::trace("guest registry full, admission refused\n");
                return Err(HvError::Enospc);
            }
        };
        log::trace_hex("guest admitted, handle=", handle);
        slot.handle = handle;
        slot.vmid = vmid;
        slot.state = VmState::Stopped;
        slot.s2_root_pa = root;
        slot.s1_root_pa = None;
        slot.slots = SlotTable::new();
        slot.measurements = MeasurementTable::new();
        self.by_handle_mut(handle).ok_or(HvError::Fatal)
    }

    pub fn by_handle(&self, handle: u64) -> Option<&GuestDescriptor> {
        self.guests.iter().find(|g| g.in_use() && g.handle == handle)
    }

    pub fn by_handle_mut(&mut self, handle: u64) -> Option<&mut GuestDescriptor> {
        self.guests
            .iter_mut()
            .find(|g| g.in_use() && g.handle == handle)
    }

    pub fn by_vmid(&self, vmid: u16) -> Option<&GuestDescriptor> {
        self.guests.iter().find(|g| g.in_use() && g.vmid == vmid)
    }

    pub fn by_vmid_mut(&mut self, vmid: u16) -> Option<&mut GuestDescriptor> {
        self.guests
            .iter_mut()
            .find(|g| g.in_use() && g.vmid == vmid)
    }

    /// Looks a guest up by VMID, mirroring `get_guest`'s two cases: an
    /// ordinary VMID is a plain scan (no match is `Enoent`), but
    /// `HOST_VMID` is a distinguished pseudo-guest that gets a free slot
    /// and a freshly allocated stage-2 root on its first lookup, since
    /// the host itself is never admitted through `init_guest`.
    pub fn get_guest<const N: usize>(
        &mut self,
        arena: &mut TableArena<N>,
        base_pa: u64,
        vmid: u16,
    ) -> HvResult<&mut GuestDescriptor> {
        if let Some(idx) = self.guests.iter().position(|g| g.in_use() && g.vmid == vmid) {
            return Ok(&mut self.guests[idx]);
        }
        if vmid != HOST_VMID {
            return Err(HvError::Enoent);
        }

        let root = arena.alloc_table(HOST_VMID, base_pa)?;
        let slot = self.free_slot().ok_or(HvError::Enospc)?;
        slot.handle = 0;
        slot.vmid = HOST_VMID;
        slot.state = VmState::Stopped;
        slot.s2_root_pa = root;
        slot.s1_root_pa = None;
        slot.slots = SlotTable::new();
        slot.measurements = MeasurementTable::new();
        log::trace("host pseudo-guest slot allocated\n");
        Ok(slot)
    }

    pub fn by_s2_root(&self, root_pa: u64) -> Option<&GuestDescriptor> {
        self.guests
            .iter()
            .find(|g| g.in_use() && g.s2_root_pa == root_pa)
    }

    pub fn by_s1_root(&self, root_pa: u64) -> Option<&GuestDescriptor> {
        self.guests
            .iter()
            .find(|g| g.in_use() && g.s1_root_pa == Some(root_pa))
    }

    pub fn set_running(&mut self, handle: u64) -> HvResult<()> {
        let g = self.by_handle_mut(handle).ok_or(HvError::Enoent)?;
        g.state = VmState::Running;
        Ok(())
    }

    pub fn set_stopped(&mut self, handle: u64) -> HvResult<()> {
        let g = self.by_handle_mut(handle).ok_or(HvError::Enoent)?;
        g.state = VmState::Stopped;
        Ok(())
    }

    /// Tears a guest down: releases every table it owns from `arena` and
    /// clears its descriptor slot. Mirrors `free_guest`'s
    /// `free_guest_tables` + `free_table(guest->s2_pgd)` + `memset`
    /// sequence. A no-op for an unknown handle, matching the original's
    /// `return 0` when no matching guest is found.
    pub fn free_guest<const N: usize>(
        &mut self,
        arena: &mut TableArena<N>,
        base_pa: u64,
        handle: u64,
    ) -> HvResult<()> {
        let vmid = match self.by_handle(handle) {
            Some(g) => g.vmid,
            None => return Ok(()),
        };
        debug_assert!(vmid != HOST_VMID, "free_guest: vmid must not be HOST_VMID");
        arena.free_guest_tables(vmid, base_pa);
        let g = self.by_handle_mut(handle).ok_or(HvError::Fatal)?;
        *g = GuestDescriptor::empty();
        log::trace_hex("guest torn down, handle=", handle);
        Ok(())
    }

    pub fn count_in_use(&self) -> usize {
        self.guests.iter().filter(|g| g.in_use()).count()
    }
}

impl Default for GuestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0xC000_0000;

    #[test]
    fn init_guest_allocates_root_and_marks_stopped() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        let g = registry.init_guest(&mut arena, BASE, 42, 3).unwrap();
        assert_eq!(g.state, VmState::Stopped);
        assert_eq!(g.vmid, 3);
        assert_eq!(registry.count_in_use(), 1);
    }

    #[test]
    fn init_guest_is_idempotent_for_same_handle() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        registry.init_guest(&mut arena, BASE, 42, 3).unwrap();
        let root_before = registry.by_handle(42).unwrap().s2_root_pa;
        registry.init_guest(&mut arena, BASE, 42, 3).unwrap();
        assert_eq!(registry.by_handle(42).unwrap().s2_root_pa, root_before);
        assert_eq!(registry.count_in_use(), 1);
    }

    #[test]
    fn lookup_by_vmid_and_s2_root_agree() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        registry.init_guest(&mut arena, BASE, 7, 9).unwrap();
        let root = registry.by_vmid(9).unwrap().s2_root_pa;
        assert_eq!(registry.by_s2_root(root).unwrap().handle, 7);
    }

    #[test]
    fn free_guest_releases_tables_and_clears_slot() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        registry.init_guest(&mut arena, BASE, 7, 9).unwrap();
        assert_eq!(arena.used(), 1);
        registry.free_guest(&mut arena, BASE, 7).unwrap();
        assert_eq!(arena.used(), 0);
        assert!(registry.by_handle(7).is_none());
    }

    #[test]
    fn free_guest_on_unknown_handle_is_a_noop() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        assert!(registry.free_guest(&mut arena, BASE, 999).is_ok());
    }

    #[test]
    fn get_guest_allocates_host_pseudo_guest_once() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        let root = registry.get_guest(&mut arena, BASE, HOST_VMID).unwrap().s2_root_pa;
        assert_eq!(registry.count_in_use(), 1);
        // Second lookup returns the same slot, not a freshly allocated one.
        assert_eq!(
            registry.get_guest(&mut arena, BASE, HOST_VMID).unwrap().s2_root_pa,
            root
        );
        assert_eq!(registry.count_in_use(), 1);
    }

    #[test]
    fn get_guest_on_unknown_ordinary_vmid_is_enoent() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        assert_eq!(registry.get_guest(&mut arena, BASE, 3).unwrap_err(), HvError::Enoent);
    }

    #[test]
    fn registry_exhaustion_returns_enospc() {
        let mut arena: TableArena<32> = TableArena::new();
        let mut registry = GuestRegistry::new();
        for i in 0..MAX_GUESTS as u64 {
            registry
                .init_guest(&mut arena, BASE, i + 1, (i + 1) as u16)
                .unwrap();
        }
        assert_eq!(
            registry.init_guest(&mut arena, BASE, 9999, 9999),
            Err(HvError::Enospc)
        );
    }

    #[test]
    fn host_vmid_cannot_be_assigned_to_a_guest() {
        let mut arena: TableArena<8> = TableArena::new();
        let mut registry = GuestRegistry::new();
        assert_eq!(
            registry.init_guest(&mut arena, BASE, 1, HOST_VMID),
            Err(HvError::Einval)
        );
    }
}
