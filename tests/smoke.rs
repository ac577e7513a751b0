//! End-to-end smoke test, in the teacher's hand-rolled PASS/ERROR style.
//!
//! The teacher's own `tests/test_heap.rs`/`tests/test_dynamic_pagetable.rs`
//! are `pub fn run_xxx_test()` functions that narrate PASS/ERROR lines over
//! `uart_puts`, meant to be called from a bare-metal `rust_main` under QEMU
//! where the standard test harness can't run. This crate has no boot binary
//! of its own, so the same narrative runs here as one ordinary `#[test]`
//! instead, with a capturing `log::Sink` standing in for the UART.

use hvmem_core::error::HvResult;
use hvmem_core::governor::{guest_map_range, guest_unmap_range, GovernorPolicy, PageAccess};
use hvmem_core::guest::measure::Sha256Hasher;
use hvmem_core::guest::registry::GuestRegistry;
use hvmem_core::hw::mock::MockBarriers;
use hvmem_core::log::{self, Sink};
use hvmem_core::platform::PAGE_SIZE_4KB;
use hvmem_core::table::arena::TableArena;
use hvmem_core::table::walker::translate;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

struct CapturingSink {
    lines: Mutex<String>,
}

impl Sink for CapturingSink {
    fn write_str(&self, s: &str) {
        self.lines.lock().unwrap().push_str(s);
    }
}

static SINK: CapturingSink = CapturingSink {
    lines: Mutex::new(String::new()),
};

struct FakeHostMemory {
    pages: RefCell<HashMap<u64, [u8; PAGE_SIZE_4KB as usize]>>,
}

impl FakeHostMemory {
    fn new() -> Self {
        Self {
            pages: RefCell::new(HashMap::new()),
        }
    }

    fn set(&self, addr: u64, byte: u8) {
        self.pages
            .borrow_mut()
            .insert(addr, [byte; PAGE_SIZE_4KB as usize]);
    }
}

impl PageAccess for FakeHostMemory {
    fn read_page(&self, host_addr: u64) -> [u8; PAGE_SIZE_4KB as usize] {
        *self
            .pages
            .borrow()
            .get(&host_addr)
            .unwrap_or(&[0u8; PAGE_SIZE_4KB as usize])
    }

    fn zero_page(&mut self, host_addr: u64) {
        self.pages
            .borrow_mut()
            .insert(host_addr, [0u8; PAGE_SIZE_4KB as usize]);
    }

    fn detach_host_page(&mut self, _host_addr: u64) {}

    fn restore_host_page(&mut self, _host_addr: u64) {}
}

/// Runs the full guest lifecycle once: admit a guest, register a memslot,
/// map a page, unmap it, and tear the guest down. Returns `Err` with the
/// failing step's name instead of panicking, matching the teacher's
/// `run_xxx_test`'s "print ERROR and return" idiom rather than `assert!`.
fn run_lifecycle_smoke_test() -> Result<(), &'static str> {
    log::trace("\n========================================\n");
    log::trace("  Guest Memory Core Smoke Test\n");
    log::trace("========================================\n\n");

    const BASE: u64 = 0xE000_0000;
    let mut arena: TableArena<64> = TableArena::new();
    let mut registry = GuestRegistry::new();
    let barriers = MockBarriers::new();
    let hasher = Sha256Hasher;
    let mut mem = FakeHostMemory::new();
    mem.set(0x9000_0000, 0x42);

    log::trace("[SMOKE] Test 1: admit guest...\n");
    registry
        .init_guest(&mut arena, BASE, 1, 5)
        .map_err(|_| "guest admission failed")?;
    log::trace("[SMOKE] Test 1 PASSED\n\n");

    log::trace("[SMOKE] Test 2: register memslot...\n");
    registry
        .by_handle_mut(1)
        .unwrap()
        .slots
        .add(0x4000_0000, 16)
        .map_err(|_| "memslot registration failed")?;
    log::trace("[SMOKE] Test 2 PASSED\n\n");

    log::trace("[SMOKE] Test 3: map a page...\n");
    let map_result: HvResult<()> = guest_map_range(
        &mut registry,
        &mut arena,
        BASE,
        &barriers,
        &hasher,
        &mut mem,
        GovernorPolicy::default(),
        1,
        0x4000_0000,
        0x9000_0000,
        PAGE_SIZE_4KB,
        hvmem_core::Prot::RW,
    );
    map_result.map_err(|_| "map failed")?;
    if translate(&arena, BASE, registry.by_handle(1).unwrap().s2_root_pa, 0x4000_0000)
        != Some(0x9000_0000)
    {
        return Err("mapped translation did not match the requested physical page");
    }
    log::trace("[SMOKE] Test 3 PASSED\n\n");

    log::trace("[SMOKE] Test 4: unmap the page...\n");
    let outcome = guest_unmap_range(
        &mut registry,
        &mut arena,
        BASE,
        &barriers,
        &hasher,
        &mut mem,
        1,
        0x4000_0000,
        PAGE_SIZE_4KB,
        true,
    );
    if outcome.result.is_err() || outcome.pages_unmapped != 1 {
        return Err("unmap did not report exactly one page unmapped");
    }
    log::trace("[SMOKE] Test 4 PASSED\n\n");

    log::trace("[SMOKE] Test 5: tear down guest and reclaim tables...\n");
    registry
        .free_guest(&mut arena, BASE, 1)
        .map_err(|_| "guest teardown failed")?;
    if registry.by_handle(1).is_some() {
        return Err("guest still present in registry after teardown");
    }
    log::trace("[SMOKE] Test 5 PASSED\n\n");

    log::trace("========================================\n");
    log::trace("  Guest Memory Core Smoke Test PASSED (5 assertions)\n");
    log::trace("========================================\n\n");
    Ok(())
}

#[test]
fn guest_lifecycle_smoke_test_passes() {
    log::set_sink(&SINK);
    let result = run_lifecycle_smoke_test();
    let narrative = SINK.lines.lock().unwrap().clone();
    assert!(result.is_ok(), "{}: {}", result.unwrap_err(), narrative);
    assert!(narrative.contains("Test 5 PASSED"));
}
