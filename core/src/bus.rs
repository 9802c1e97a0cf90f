//! The unified 64 KiB address space.
//!
//! A [`Bus`] multiplexes a flat 65536-byte backing store with registered
//! [`Peripheral`]s. Peripherals are consulted in registration order; the
//! first one claiming an address wins. Everything else falls through to
//! the flat store.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use log::{error, warn};
use msp430_arch::Shared;
use thiserror::Error;

use crate::peripheral::{Peripheral, WidthPolicy};

/// Builds a `Shared<dyn Peripheral>` from a concrete peripheral.
///
/// `Shared<T>` is a newtype over `Arc<Mutex<T>>`, and unsizing coercion
/// (`Arc<Mutex<Concrete>>` to `Arc<Mutex<dyn Trait>>`) only fires through
/// `Arc` itself, not through an arbitrary wrapper around it. This performs
/// that coercion at the `Arc` level, where it's supported, then re-wraps
/// the result.
fn shared_dyn<P: Peripheral + 'static>(value: P) -> Shared<dyn Peripheral> {
    let arc: Arc<Mutex<dyn Peripheral>> = Arc::new(Mutex::new(value));
    Shared::from_arc(arc)
}

/// The width of a bus access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Width {
    Byte,
    Word,
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by the bus or a peripheral it routes to.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The address is not backed by anything (should not happen against
    /// the flat store, but a peripheral may still reject an address within
    /// its nominal range, e.g. `ExtendedPorts`' gaps).
    #[error("address {0:#06x} is unmapped")]
    Unmapped(u16),
    /// A word access targeted a byte-only peripheral, or vice versa.
    #[error("width mismatch accessing {0:#06x}")]
    WidthMismatch(u16),
}

/// Callback invoked when a watched address is read: `(addr, width, old, new)`.
pub type ReadWatch = Box<dyn Fn(u16, Width, u16, u16) + Send>;
/// Callback invoked when a watched address is written: `(addr, width, old, new)`.
pub type WriteWatch = Box<dyn Fn(u16, Width, u16, u16) + Send>;
/// General-access predicate: `(width, is_write, addr)`.
pub type Predicate = Box<dyn Fn(Width, bool, u16) + Send>;

struct Entry {
    range: RangeInclusive<u16>,
    device: Shared<dyn Peripheral>,
}

/// The simulator's unified address space.
pub struct Bus {
    flat: Box<[u8; 0x1_0000]>,
    peripherals: Vec<Entry>,
    read_watch: HashMap<u16, ReadWatch>,
    write_watch: HashMap<u16, WriteWatch>,
    predicates: Vec<Predicate>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("peripherals", &self.peripherals.len())
            .finish_non_exhaustive()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            flat: Box::new([0; 0x1_0000]),
            peripherals: Vec::new(),
            read_watch: HashMap::new(),
            write_watch: HashMap::new(),
            predicates: Vec::new(),
        }
    }
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peripheral across the given address range.
    ///
    /// A peripheral spanning non-contiguous ranges (e.g. `ExtendedPorts`,
    /// the Flash control registers) is registered once per range, sharing
    /// the same underlying [`Shared`] handle.
    pub fn register(&mut self, range: RangeInclusive<u16>, device: Shared<dyn Peripheral>) {
        self.peripherals.push(Entry { range, device });
    }

    /// Convenience used by tests and the CLI: attaches a default-sized RAM
    /// at its conventional address.
    pub fn attach_default_ram(&mut self) {
        use crate::peripheral::Ram;
        self.register(
            crate::peripheral::ram::DEFAULT_BASE..=crate::peripheral::ram::DEFAULT_BASE + 0xFF,
            shared_dyn(Ram::default()),
        );
    }

    /// Attaches a default-sized Flash at its conventional window, plus its
    /// (separately addressed) flash-control register range.
    pub fn attach_default_flash(&mut self) {
        use crate::peripheral::Flash;
        let flash = Flash::default();
        let handle = shared_dyn(flash);
        self.register(0xF000..=0xFFFF, Shared::clone(&handle));
        self.register(0x0128..=0x012D, handle);
    }

    /// Attaches the hardware multiplier at its conventional window.
    pub fn attach_default_multiplier(&mut self) {
        use crate::peripheral::Multiplier;
        self.register(0x0130..=0x013F, shared_dyn(Multiplier::default()));
    }

    /// Attaches the extended I/O port registers at their two conventional,
    /// non-contiguous ranges.
    pub fn attach_default_ports(&mut self) {
        use crate::peripheral::ExtendedPorts;
        let handle = shared_dyn(ExtendedPorts::default());
        for range in crate::peripheral::ExtendedPorts::RANGES {
            self.register(range, Shared::clone(&handle));
        }
    }

    /// Attaches the optional test-harness peripheral at its conventional
    /// window. Only available with the `harness` feature.
    #[cfg(feature = "harness")]
    pub fn attach_default_harness(&mut self) {
        use crate::peripheral::TestHarness;
        self.register(
            crate::peripheral::harness::BASE..=crate::peripheral::harness::BASE + 2,
            shared_dyn(TestHarness::default()),
        );
    }

    /// Attaches the full default memory map this simulator presents to
    /// guest firmware: RAM, Flash, the hardware multiplier, and the
    /// extended I/O ports (plus the test harness, if the `harness` feature
    /// is enabled).
    pub fn attach_defaults(&mut self) {
        self.attach_default_ram();
        self.attach_default_flash();
        self.attach_default_multiplier();
        self.attach_default_ports();
        #[cfg(feature = "harness")]
        self.attach_default_harness();
    }

    /// Resets the flat store and every registered peripheral.
    pub fn reset(&mut self) {
        self.flat.fill(0);
        for entry in &self.peripherals {
            entry.device.lock().expect("lock poisoned").reset();
        }
    }

    fn find(&self, addr: u16) -> Option<&Entry> {
        self.peripherals
            .iter()
            .find(|entry| entry.range.contains(&addr))
    }

    fn notify_read(&self, addr: u16, width: Width, value: u16) {
        if let Some(watch) = self.read_watch.get(&addr) {
            invoke(|| watch(addr, width, value, value));
        }
        for predicate in &self.predicates {
            invoke(|| predicate(width, false, addr));
        }
    }

    fn notify_write(&self, addr: u16, width: Width, old: u16, new: u16) {
        if let Some(watch) = self.write_watch.get(&addr) {
            invoke(|| watch(addr, width, old, new));
        }
        for predicate in &self.predicates {
            invoke(|| predicate(width, true, addr));
        }
    }

    /// Reads a byte, notifying watches first.
    ///
    /// # Errors
    ///
    /// Never returns an error: out-of-range accesses fall through to the
    /// flat store, masked but logged rather than rejected.
    pub fn read_byte(&mut self, addr: u16) -> Result<u8> {
        let value = self.peek_byte(addr);
        self.notify_read(addr, Width::Byte, u16::from(value));
        Ok(value)
    }

    /// Reads a byte without notifying watches or logging anomalies; used
    /// by image loaders and internal bookkeeping.
    #[must_use]
    pub fn peek_byte(&self, addr: u16) -> u8 {
        if let Some(entry) = self.find(addr) {
            let guard = entry.device.lock().expect("lock poisoned");
            match guard.read(addr) {
                Ok(value) => return value,
                Err(_) => return 0,
            }
        }
        self.flat[usize::from(addr)]
    }

    /// Writes a byte, notifying watches before the store is mutated.
    pub fn write_byte(&mut self, addr: u16, data: u8) -> Result<()> {
        let old = self.peek_byte(addr);
        self.notify_write(addr, Width::Byte, u16::from(old), u16::from(data));
        self.write_byte_quiet(addr, data);
        Ok(())
    }

    /// Writes a byte without notifying watches or logging; used by image
    /// loaders.
    pub fn write_byte_quiet(&mut self, addr: u16, data: u8) {
        if let Some(entry) = self.find(addr) {
            let mut guard = entry.device.lock().expect("lock poisoned");
            if guard.write(addr, data).is_ok() {
                return;
            }
        }
        self.flat[usize::from(addr)] = data;
    }

    fn width_policy_at(&self, addr: u16) -> WidthPolicy {
        self.find(addr)
            .map(|entry| entry.device.lock().expect("lock poisoned").width_policy())
            .unwrap_or(WidthPolicy::Any)
    }

    /// Reads a little-endian word, notifying watches.
    pub fn read_word(&mut self, addr: u16) -> Result<u16> {
        match self.width_policy_at(addr) {
            WidthPolicy::ByteOnly => {
                warn!("word read of byte-only port at {addr:#06x}");
                let lo = self.read_byte(addr)?;
                let hi = self.read_byte(addr.wrapping_add(1))?;
                Ok(u16::from(lo) | (u16::from(hi) << 8))
            }
            WidthPolicy::WordOnly => {
                let Some(entry) = self.find(addr) else {
                    return Err(Error::Unmapped(addr));
                };
                let value = entry
                    .device
                    .lock()
                    .expect("lock poisoned")
                    .read_word_native(addr)
                    .map_err(|_| Error::WidthMismatch(addr))?;
                self.notify_read(addr, Width::Word, value);
                Ok(value)
            }
            WidthPolicy::Any => {
                let lo = self.read_byte(addr)?;
                let hi = self.read_byte(addr.wrapping_add(1))?;
                Ok(u16::from(lo) | (u16::from(hi) << 8))
            }
        }
    }

    /// Reads a word without notifying watches or logging anomalies; the
    /// read-side counterpart to `write_word_quiet`, for callers that need
    /// to inspect memory without it counting as an observable access.
    pub fn read_word_quiet(&mut self, addr: u16) -> Result<u16> {
        match self.width_policy_at(addr) {
            WidthPolicy::WordOnly => {
                let Some(entry) = self.find(addr) else {
                    return Err(Error::Unmapped(addr));
                };
                entry
                    .device
                    .lock()
                    .expect("lock poisoned")
                    .read_word_native(addr)
                    .map_err(|_| Error::WidthMismatch(addr))
            }
            _ => {
                let lo = self.peek_byte(addr);
                let hi = self.peek_byte(addr.wrapping_add(1));
                Ok(u16::from(lo) | (u16::from(hi) << 8))
            }
        }
    }

    /// Writes a little-endian word, notifying watches. Splits into two
    /// byte stores for ordinary peripherals.
    pub fn write_word(&mut self, addr: u16, value: u16) -> Result<()> {
        match self.width_policy_at(addr) {
            WidthPolicy::ByteOnly => {
                warn!("word write of byte-only port at {addr:#06x}");
                self.write_byte(addr, (value & 0xFF) as u8)?;
                self.write_byte(addr.wrapping_add(1), (value >> 8) as u8)?;
                Ok(())
            }
            WidthPolicy::WordOnly => {
                let old = self.peek_word(addr);
                let Some(entry) = self.find(addr) else {
                    return Err(Error::Unmapped(addr));
                };
                self.notify_write(addr, Width::Word, old, value);
                entry
                    .device
                    .lock()
                    .expect("lock poisoned")
                    .write_word_native(addr, value)
                    .map_err(|_| Error::WidthMismatch(addr))?;
                Ok(())
            }
            WidthPolicy::Any => {
                self.write_byte(addr, (value & 0xFF) as u8)?;
                self.write_byte(addr.wrapping_add(1), (value >> 8) as u8)?;
                Ok(())
            }
        }
    }

    fn peek_word(&self, addr: u16) -> u16 {
        if let WidthPolicy::WordOnly = self.width_policy_at(addr) {
            if let Some(entry) = self.find(addr) {
                return entry
                    .device
                    .lock()
                    .expect("lock poisoned")
                    .read_word_native(addr)
                    .unwrap_or(0);
            }
        }
        let lo = self.peek_byte(addr);
        let hi = self.peek_byte(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Writes a word without notifying watches; used by image loaders.
    pub fn write_word_quiet(&mut self, addr: u16, value: u16) {
        self.write_byte_quiet(addr, (value & 0xFF) as u8);
        self.write_byte_quiet(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Registers a callback invoked whenever `addr` is read.
    pub fn watch_read(&mut self, addr: u16, callback: ReadWatch) {
        self.read_watch.insert(addr, callback);
    }

    /// Registers a callback invoked whenever `addr` is written.
    pub fn watch_write(&mut self, addr: u16, callback: WriteWatch) {
        self.write_watch.insert(addr, callback);
    }

    /// Registers a general-access predicate, invoked on every access.
    pub fn watch_access(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// Removes every registered watch.
    pub fn clear_watches(&mut self) {
        self.read_watch.clear();
        self.write_watch.clear();
        self.predicates.clear();
    }

    /// Loads an image produced by [`crate::image`], bypassing watches.
    pub fn load_image(&mut self, image: impl IntoIterator<Item = (u16, u8)>) {
        for (addr, byte) in image {
            self.write_byte_quiet(addr, byte);
        }
    }
}

/// Invokes a watch/predicate callback, isolating the bus from a panic
/// inside it: a misbehaving watchpoint callback must not take down the
/// simulator.
fn invoke(f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("watchpoint callback panicked; ignoring");
    }
}
