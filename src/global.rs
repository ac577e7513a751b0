//! Process-wide core state: table arena, guest registry, and the
//! installed hardware backend, behind a single lock.
//!
//! Grounded on `global.rs`'s `GlobalDeviceManager`: a `static` holding
//! the shared mutable state, guarded here uniformly by `SpinLock`
//! (the teacher additionally special-cases a single-pCPU `UnsafeCell` +
//! `AtomicBool` fast path when only one core can ever contend; this core
//! always assumes a possible second pCPU, matching the specification's
//! concurrency model, so only the `SpinLock`-guarded variant is carried
//! forward).

use crate::guest::registry::GuestRegistry;
use crate::hw::Barriers;
use crate::platform::TABLE_ARENA_CAPACITY;
use crate::sync::SpinLock;
use crate::table::arena::TableArena;

pub struct HvCore {
    pub arena: TableArena<TABLE_ARENA_CAPACITY>,
    pub registry: GuestRegistry,
}

impl HvCore {
    pub const fn new() -> Self {
        Self {
            arena: TableArena::new(),
            registry: GuestRegistry::new(),
        }
    }
}

impl Default for HvCore {
    fn default() -> Self {
        Self::new()
    }
}

pub static CORE: SpinLock<HvCore> = SpinLock::new(HvCore::new());

#[cfg(all(target_arch = "aarch64", feature = "aarch64-hw"))]
pub fn barriers() -> &'static dyn Barriers {
    &crate::hw::aarch64::BACKEND
}

#[cfg(not(all(target_arch = "aarch64", feature = "aarch64-hw")))]
pub fn barriers() -> &'static dyn Barriers {
    static MOCK: crate::hw::mock::MockBarriers = crate::hw::mock::MockBarriers::new();
    &MOCK
}
