use log::info;
use msp430_arch::mem::{Error, Memory, Result};

use super::{Peripheral, WidthPolicy};

/// Base address of the optional test harness: `0x01B0..=0x01B2`.
pub const BASE: u16 = 0x01B0;
const CMD: u16 = BASE;
const TEXT: u16 = BASE + 1;
const RESERVED: u16 = BASE + 2;

const TEST_START: u8 = 0x10;
const TEST_END: u8 = 0x11;
const SUBTEST_START: u8 = 0x20;
const SUBTEST_SUCCESS: u8 = 0x21;
const SUBTEST_FAIL: u8 = 0x22;
const SUBTEST_EXECUTE: u8 = 0x2E;
const SUBTEST_EXECUTE_DONE: u8 = 0x2F;

/// A small peripheral letting guest firmware drive automated test output,
/// used by the optional test suites that target this simulator rather than
/// real hardware.
#[derive(Clone, Debug, Default)]
pub struct TestHarness {
    last_cmd: u8,
    reserved: u8,
    testcount: u32,
    failures: u32,
    line: String,
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn flush_line(&mut self) {
        if !self.line.is_empty() {
            info!("test harness: {}", self.line);
            self.line.clear();
        }
    }

    fn handle_command(&mut self, cmd: u8) {
        self.flush_line();
        match cmd {
            TEST_START => info!("test harness: test run starting"),
            TEST_END => info!("test harness: test run finished ({} failures)", self.failures),
            SUBTEST_START => {
                self.testcount += 1;
                info!("test harness: subtest {} starting", self.testcount);
            }
            SUBTEST_SUCCESS => info!("test harness: subtest {} SUCCESS", self.testcount),
            SUBTEST_FAIL => {
                self.failures += 1;
                info!("test harness: subtest {} FAIL", self.testcount);
            }
            SUBTEST_EXECUTE | SUBTEST_EXECUTE_DONE => {}
            other => info!("test harness: unrecognised command {other:#04x}"),
        }
        self.last_cmd = cmd;
    }
}

impl Memory for TestHarness {
    fn read(&self, addr: u16) -> Result<u8> {
        match addr {
            CMD => Ok(self.last_cmd),
            TEXT => Ok(0),
            RESERVED => Ok(self.reserved),
            _ => Err(Error::Range),
        }
    }

    fn write(&mut self, addr: u16, data: u8) -> Result<()> {
        match addr {
            CMD => self.handle_command(data),
            TEXT => self.line.push(data as char),
            RESERVED => self.reserved = data,
            _ => return Err(Error::Range),
        }
        Ok(())
    }
}

impl Peripheral for TestHarness {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn width_policy(&self) -> WidthPolicy {
        WidthPolicy::ByteOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_flushes_on_command_transition() {
        let mut harness = TestHarness::new();
        harness.write(TEXT, b'h' as u8).unwrap();
        harness.write(TEXT, b'i' as u8).unwrap();
        assert_eq!(harness.line, "hi");
        harness.write(CMD, SUBTEST_START).unwrap();
        assert!(harness.line.is_empty());
    }

    #[test]
    fn failure_counter_increments() {
        let mut harness = TestHarness::new();
        harness.write(CMD, SUBTEST_START).unwrap();
        harness.write(CMD, SUBTEST_FAIL).unwrap();
        assert_eq!(harness.failures(), 1);
    }
}
