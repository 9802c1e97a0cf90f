use std::collections::BTreeMap;

use log::error;
use msp430_arch::mem::{Error, Memory, Result};

use super::{Peripheral, WidthPolicy};

/// Sparse byte-wide registers at `{0x20..=0x26, 0x28..=0x2E}`.
///
/// Word access is logged as an error but not rejected: the
/// write still lands, since the Bus decomposes a word access into two byte
/// accesses that each reach this peripheral independently. The logging
/// therefore happens one layer up, in the Bus, which is the only place that
/// knows whether a given access was originally word-sized.
#[derive(Clone, Debug, Default)]
pub struct ExtendedPorts {
    regs: BTreeMap<u16, u8>,
}

impl ExtendedPorts {
    /// Addresses claimed by this peripheral.
    pub const RANGES: [std::ops::RangeInclusive<u16>; 2] = [0x20..=0x26, 0x28..=0x2E];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn claims(addr: u16) -> bool {
        Self::RANGES.iter().any(|r| r.contains(&addr))
    }
}

impl Memory for ExtendedPorts {
    fn read(&self, addr: u16) -> Result<u8> {
        if !Self::claims(addr) {
            return Err(Error::Range);
        }
        Ok(self.regs.get(&addr).copied().unwrap_or(0))
    }

    fn write(&mut self, addr: u16, data: u8) -> Result<()> {
        if !Self::claims(addr) {
            error!("extended port write to unclaimed address {addr:#06x}");
            return Err(Error::Range);
        }
        self.regs.insert(addr, data);
        Ok(())
    }
}

impl Peripheral for ExtendedPorts {
    fn reset(&mut self) {
        self.regs.clear();
    }

    fn width_policy(&self) -> WidthPolicy {
        WidthPolicy::ByteOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_register_reads_zero() {
        let ports = ExtendedPorts::new();
        assert_eq!(ports.read(0x20).unwrap(), 0);
    }

    #[test]
    fn round_trips_claimed_register() {
        let mut ports = ExtendedPorts::new();
        ports.write(0x22, 0x7F).unwrap();
        assert_eq!(ports.read(0x22).unwrap(), 0x7F);
    }

    #[test]
    fn gap_address_is_unclaimed() {
        let ports = ExtendedPorts::new();
        assert!(ports.read(0x27).is_err());
    }
}
