//! Hardware abstraction seam for barriers, TLB invalidation, and the
//! stage-2 system registers.
//!
//! Grounded on `arch/traits.rs`, which defines the teacher's
//! `InterruptController`/`GuestTimer`/`Stage2Mapper` trait family at the
//! same layer, and on `arch/mod.rs`'s `cfg(target_arch)` dispatch between
//! a real backend and a host-testable one. The table walker and remapper
//! only ever touch hardware through this trait, so their break-before-make
//! sequencing can be exercised on a development host.

/// Barrier, TLB-invalidation, and register-install primitives the table
/// engine needs to maintain the break-before-make invariant (I3).
pub trait Barriers: Sync {
    /// `dsb ishst` — orders prior normal-memory writes (the descriptor
    /// stores) before the TLBI that follows.
    fn dsb_ishst(&self);
    /// `dsb ish` — completes a TLBI before anything after it is allowed
    /// to observe the new mapping.
    fn dsb_ish(&self);
    /// `isb` — flushes the instruction pipeline.
    fn isb(&self);
    /// Broadcast invalidation of all stage-2 (and combined stage-1+2)
    /// entries for the given VMID, inner-shareable.
    fn tlbi_vmalls12e1is(&self, vmid: u16);
    /// Broadcast invalidation of a single IPA's stage-2 entry.
    fn tlbi_ipas2e1is(&self, vmid: u16, ipa: u64);
    /// Installs `vttbr_el2`/`vtcr_el2` for the given VMID and table root.
    fn install_stage2(&self, vmid: u16, table_root_pa: u64, vtcr: u64);
}

/// Full break-before-make invalidation sequence shared by every backend:
/// `dsb ishst; TLBI; dsb ish; isb`. Kept here so both backends and any
/// future one share the exact ordering instead of re-deriving it.
pub fn invalidate_all(b: &dyn Barriers, vmid: u16) {
    b.dsb_ishst();
    b.tlbi_vmalls12e1is(vmid);
    b.dsb_ish();
    b.isb();
}

pub fn invalidate_ipa(b: &dyn Barriers, vmid: u16, ipa: u64) {
    b.dsb_ishst();
    b.tlbi_ipas2e1is(vmid, ipa);
    b.dsb_ish();
    b.isb();
}

#[cfg(all(target_arch = "aarch64", feature = "aarch64-hw"))]
pub mod aarch64 {
    //! Real backend. Grounded on `ffa/stage2_walker.rs`'s `tlbi_all`/
    //! `tlbi_ipa` inline-asm sequences and `arch/aarch64/mm/mmu.rs`'s
    //! `Stage2Config::install`.
    use super::Barriers;
    use core::arch::asm;

    pub struct Aarch64Barriers;

    impl Barriers for Aarch64Barriers {
        fn dsb_ishst(&self) {
            unsafe { asm!("dsb ishst") };
        }

        fn dsb_ish(&self) {
            unsafe { asm!("dsb ish") };
        }

        fn isb(&self) {
            unsafe { asm!("isb") };
        }

        fn tlbi_vmalls12e1is(&self, vmid: u16) {
            unsafe {
                let saved_vttbr: u64;
                asm!("mrs {0}, vttbr_el2", out(reg) saved_vttbr);
                let vmid_vttbr = (vmid as u64) << 48;
                asm!("msr vttbr_el2, {0}", in(reg) vmid_vttbr);
                asm!("isb");
                asm!("tlbi vmalls12e1is");
                asm!("msr vttbr_el2, {0}", in(reg) saved_vttbr);
                asm!("isb");
            }
        }

        fn tlbi_ipas2e1is(&self, vmid: u16, ipa: u64) {
            unsafe {
                let saved_vttbr: u64;
                asm!("mrs {0}, vttbr_el2", out(reg) saved_vttbr);
                let vmid_vttbr = (vmid as u64) << 48;
                asm!("msr vttbr_el2, {0}", in(reg) vmid_vttbr);
                asm!("isb");
                let arg = ipa >> 12;
                asm!("tlbi ipas2e1is, {0}", in(reg) arg);
                asm!("msr vttbr_el2, {0}", in(reg) saved_vttbr);
                asm!("isb");
            }
        }

        fn install_stage2(&self, vmid: u16, table_root_pa: u64, vtcr: u64) {
            unsafe {
                let vttbr = table_root_pa | ((vmid as u64) << 48);
                asm!("msr vtcr_el2, {0}", in(reg) vtcr);
                asm!("msr vttbr_el2, {0}", in(reg) vttbr);
                asm!("isb");
            }
        }
    }

    pub static BACKEND: Aarch64Barriers = Aarch64Barriers;
}

pub mod mock {
    //! Host-testable backend. Records every call instead of touching
    //! real system registers, so unit tests can assert that the walker
    //! and remapper invalidate before and after every structural edit.
    use super::Barriers;
    use crate::sync::SpinLock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        DsbIshst,
        DsbIsh,
        Isb,
        TlbiAll(u16),
        TlbiIpa(u16, u64),
        InstallStage2(u16, u64, u64),
    }

    pub struct MockBarriers {
        log: SpinLock<heapless_log::Log>,
    }

    mod heapless_log {
        use super::Event;

        pub struct Log {
            pub events: [Option<Event>; 256],
            pub len: usize,
        }

        impl Log {
            pub const fn new() -> Self {
                Self {
                    events: [None; 256],
                    len: 0,
                }
            }

            pub fn push(&mut self, e: Event) {
                if self.len < self.events.len() {
                    self.events[self.len] = Some(e);
                    self.len += 1;
                }
            }
        }
    }

    /// Fixed-capacity snapshot of recorded events, returned by value so
    /// callers can inspect ordering without holding the lock.
    pub struct EventLog {
        events: [Option<Event>; 256],
        len: usize,
    }

    impl EventLog {
        pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
            self.events[..self.len].iter().filter_map(|e| *e)
        }
    }

    impl MockBarriers {
        pub const fn new() -> Self {
            Self {
                log: SpinLock::new(heapless_log::Log::new()),
            }
        }

        pub fn events(&self) -> EventLog {
            let log = self.log.lock();
            EventLog {
                events: log.events,
                len: log.len,
            }
        }

        pub fn clear(&self) {
            let mut log = self.log.lock();
            log.len = 0;
        }
    }

    impl Barriers for MockBarriers {
        fn dsb_ishst(&self) {
            self.log.lock().push(Event::DsbIshst);
        }
        fn dsb_ish(&self) {
            self.log.lock().push(Event::DsbIsh);
        }
        fn isb(&self) {
            self.log.lock().push(Event::Isb);
        }
        fn tlbi_vmalls12e1is(&self, vmid: u16) {
            self.log.lock().push(Event::TlbiAll(vmid));
        }
        fn tlbi_ipas2e1is(&self, vmid: u16, ipa: u64) {
            self.log.lock().push(Event::TlbiIpa(vmid, ipa));
        }
        fn install_stage2(&self, vmid: u16, table_root_pa: u64, vtcr: u64) {
            self.log
                .lock()
                .push(Event::InstallStage2(vmid, table_root_pa, vtcr));
        }
    }
}
