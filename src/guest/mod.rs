//! Guest registry, memory slots, and page-content measurement.
//!
//! Grounded on `guest.c` in its entirety; see each submodule for the
//! specific functions it ports.

pub mod measure;
pub mod registry;
pub mod slots;

pub use measure::{Hasher, MeasurementTable, Sha256Hasher};
pub use registry::{GuestDescriptor, GuestRegistry, VmState};
pub use slots::{MemSlot, SlotTable};
