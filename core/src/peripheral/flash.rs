use msp430_arch::mem::{Error, Memory, Result};

use super::{Peripheral, WidthPolicy};

/// Default flash window: `0xF000..=0xFFFF`.
pub const DEFAULT_BASE: u16 = 0xF000;
const DEFAULT_SIZE: usize = 0x1000;

/// Flash-control register range; writes here are silent no-ops, reads
/// return 0. Flash erase/program semantics are out of scope.
const CONTROL_BASE: u16 = 0x0128;
const CONTROL_END: u16 = 0x012D;

/// Program flash.
///
/// Power-up state is all-ones, matching real flash's erased state.
#[derive(Clone, Debug)]
pub struct Flash {
    base: u16,
    data: Vec<u8>,
}

impl Flash {
    /// Constructs a flash window of `size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: u16, size: usize) -> Self {
        Self {
            base,
            data: vec![0xFF; size],
        }
    }

    fn in_control_range(addr: u16) -> bool {
        (CONTROL_BASE..=CONTROL_END).contains(&addr)
    }

    fn offset(&self, addr: u16) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        let offset = usize::from(offset);
        (offset < self.data.len()).then_some(offset)
    }
}

impl Default for Flash {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_SIZE)
    }
}

impl Memory for Flash {
    fn read(&self, addr: u16) -> Result<u8> {
        if Self::in_control_range(addr) {
            return Ok(0);
        }
        self.offset(addr)
            .map(|idx| self.data[idx])
            .ok_or(Error::Range)
    }

    fn write(&mut self, addr: u16, data: u8) -> Result<()> {
        if Self::in_control_range(addr) {
            return Ok(());
        }
        self.offset(addr)
            .map(|idx| self.data[idx] = data)
            .ok_or(Error::Range)
    }
}

impl Peripheral for Flash {
    fn reset(&mut self) {
        self.data.fill(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_writes_are_silent_noops() {
        let mut flash = Flash::new(DEFAULT_BASE, DEFAULT_SIZE);
        flash.write(0x0128, 0x42).unwrap();
        assert_eq!(flash.read(0x0128).unwrap(), 0);
    }

    #[test]
    fn reset_fills_with_0xff() {
        let mut flash = Flash::new(DEFAULT_BASE, 4);
        flash.write(DEFAULT_BASE, 0x00).unwrap();
        flash.reset();
        assert_eq!(flash.read(DEFAULT_BASE).unwrap(), 0xFF);
    }

    #[test]
    fn round_trips_outside_control_window() {
        let mut flash = Flash::new(DEFAULT_BASE, DEFAULT_SIZE);
        flash.write(DEFAULT_BASE, 0xAB).unwrap();
        assert_eq!(flash.read(DEFAULT_BASE).unwrap(), 0xAB);
    }
}
