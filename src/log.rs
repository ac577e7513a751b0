//! Minimal trace sink.
//!
//! Ported from the teacher's `uart_puts`/`uart_put_hex`/`uart_put_u64`
//! helpers in `lib.rs`. The core has no UART of its own to drive, so
//! output goes through a `Sink` trait the embedding hypervisor implements
//! (its existing UART driver, in the teacher's case); a `Noop` sink is
//! the default so the library stays silent and dependency-free until a
//! caller opts in.

pub trait Sink: Sync {
    fn write_str(&self, s: &str);
}

pub struct Noop;

impl Sink for Noop {
    fn write_str(&self, _s: &str) {}
}

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

struct SinkSlot {
    sink: UnsafeCell<&'static dyn Sink>,
    installed: AtomicBool,
}

// SAFETY: `sink` is only mutated once, by `set_sink`, before any other
// core can have observed `installed == true` (see its Release store).
unsafe impl Sync for SinkSlot {}

static SLOT: SinkSlot = SinkSlot {
    sink: UnsafeCell::new(&Noop),
    installed: AtomicBool::new(false),
};

/// Installs the trace sink. Intended to be called once during core
/// initialization, before any other entry point runs on a second core.
pub fn set_sink(sink: &'static dyn Sink) {
    // SAFETY: single-writer precondition documented on `SinkSlot`.
    unsafe {
        *SLOT.sink.get() = sink;
    }
    SLOT.installed.store(true, Ordering::Release);
}

pub fn trace(s: &str) {
    if !SLOT.installed.load(Ordering::Acquire) {
        return;
    }
    // SAFETY: `installed` only flips after the write in `set_sink`
    // completes, so the reference below is fully initialized.
    let sink = unsafe { *SLOT.sink.get() };
    sink.write_str(s);
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Formats `v` as a fixed-width `0x`-prefixed hex string and traces it,
/// avoiding the allocator and `core::fmt` machinery on the hot unmap path.
pub fn trace_hex(prefix: &str, v: u64) {
    trace(prefix);
    trace("0x");
    let mut buf = [0u8; 16];
    for i in 0..16 {
        let shift = (15 - i) * 4;
        buf[i] = HEX_DIGITS[((v >> shift) & 0xF) as usize];
    }
    // SAFETY: buf is composed solely of ASCII hex digits.
    let s = unsafe { core::str::from_utf8_unchecked(&buf) };
    trace(s);
    trace("\n");
}
