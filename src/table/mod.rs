//! Translation-table engine: arena, descriptor codec, walker, single-call
//! mapper, and the break-before-make range/remap driver.
//!
//! Grounded on `armtrans.c` and its Rust-side counterpart
//! `arch/aarch64/mm/mmu.rs` / `ffa/stage2_walker.rs` in the teacher repo;
//! see each submodule's header comment for the specific function it
//! ports.

pub mod arena;
pub mod attrs;
pub mod config;
pub mod descriptor;
pub mod mapper;
pub mod remap;
pub mod walker;

pub use arena::{PageTable, TableArena};
pub use attrs::{MemType, Prot};
pub use config::GranuleConfig;
pub use descriptor::Descriptor;
pub use remap::RemapContext;
