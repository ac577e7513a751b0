//! Stage-1/stage-2 translation-table engine and guest-memory governor
//! for a type-1 AArch64 hypervisor.
//!
//! Ported from a production hypervisor's `armtrans.c`/`guest.c`/
//! `heap.c` core (and the Rust-side `mm`/`ffa` modules of its successor
//! rewrite) into a standalone, testable library: a static arena of
//! page-table frames, a break-before-make-correct walker/mapper/remapper,
//! and a guest registry that tracks per-guest memory slots and
//! page-content measurements across unmap/remap cycles.
//!
//! Built `no_std` for the production target; `cfg(test)` pulls in `std`
//! so the unit test suites below can run on a development host against
//! the mock hardware backend in [`hw::mock`].

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod error;
pub mod global;
pub mod governor;
pub mod guest;
pub mod hw;
pub mod log;
pub mod platform;
pub mod sync;
pub mod table;

pub use error::{HvError, HvResult, UnmapOutcome};
pub use governor::{guest_map_range, guest_unmap_range, update_memslot, GovernorPolicy, PageAccess};
pub use guest::{GuestRegistry, VmState};
pub use table::{Descriptor, GranuleConfig, MemType, PageTable, Prot, RemapContext, TableArena};
