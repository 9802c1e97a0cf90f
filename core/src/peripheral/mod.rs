//! Peripherals that claim ranges of the 64 KiB address space.

use std::fmt::Debug;

use msp430_arch::mem::Memory;

pub mod flash;
mod multiplier;
mod ports;
pub mod ram;

#[cfg(feature = "harness")]
pub(crate) mod harness;

pub use self::flash::Flash;
pub use self::multiplier::Multiplier;
pub use self::ports::ExtendedPorts;
pub use self::ram::Ram;

#[cfg(feature = "harness")]
pub use self::harness::TestHarness;

/// Declares which access widths a peripheral natively supports.
///
/// The Bus consults this to decide whether a word- or byte-mode access is a
/// logged anomaly rather than a silent pass-through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WidthPolicy {
    /// Both byte and word access are native.
    Any,
    /// Only byte access is native; word access is tolerated but logged.
    ByteOnly,
    /// Only word access is native; byte access is an error.
    WordOnly,
}

/// A device claiming a (possibly non-contiguous) range of addresses.
pub trait Peripheral: Memory + Debug + Send {
    /// Restores the peripheral to its power-up state.
    fn reset(&mut self);

    /// This peripheral's native access width.
    fn width_policy(&self) -> WidthPolicy {
        WidthPolicy::Any
    }

    /// Reads a little-endian word directly, without decomposing into two
    /// byte accesses.
    ///
    /// Word-only peripherals (the [`Multiplier`]) override this to bypass
    /// [`Memory::read`] entirely, since that trait has no notion of width
    /// and a byte-at-a-time read would be a type error for such hardware.
    fn read_word_native(&self, addr: u16) -> msp430_arch::mem::Result<u16> {
        let lo = self.read(addr)?;
        let hi = self.read(addr.wrapping_add(1))?;
        Ok(u16::from(lo) | (u16::from(hi) << 8))
    }

    /// Writes a little-endian word directly. See [`read_word_native`](Self::read_word_native).
    fn write_word_native(&mut self, addr: u16, value: u16) -> msp430_arch::mem::Result<()> {
        self.write(addr, (value & 0xFF) as u8)?;
        self.write(addr.wrapping_add(1), (value >> 8) as u8)
    }
}
