//! The MSP430 simulator core: CPU state, instruction decode/execute, the
//! memory-mapped bus, and the breakpoint-driven run loop.
//!
//! The hard part of the system: faithful decode/execute of the instruction
//! stream, a uniform peripheral bus, and the concurrency-ready run loop a
//! remote debugger drives. It does not itself listen on a socket; that's
//! `msp430-gdb`, which is built on top of the [`Core`] and [`RunLoop`]
//! types this crate exports.

#![warn(clippy::pedantic)]

pub mod bus;
pub mod decode;
pub mod error;
pub mod event;
pub mod exec;
pub mod image;
pub mod operand;
pub mod peripheral;
pub mod reg;
pub mod runloop;

use std::fmt;

pub use crate::error::{Error, Result};
use crate::reg::RegisterFile;

/// Monotonically increasing cycle counter, reset to zero on [`Core::reset`].
///
/// A newtype rather than a bare `u64` so it can't be accidentally mixed up
/// with an address or register value in arithmetic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct Cycles(pub u64);

impl fmt::Display for Cycles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The simulated CPU: sixteen registers, the unified address space, and
/// the running cycle count.
///
/// `Core` is the single owner of both the register file and the bus;
/// [`crate::operand::Operand`]s carry no state of their own and borrow
/// `Core`'s pieces only for the lifetime of one decoded instruction.
#[derive(Debug)]
pub struct Core {
    pub regs: RegisterFile,
    pub bus: bus::Bus,
    pub cycles: Cycles,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            regs: RegisterFile::new(),
            bus: bus::Bus::new(),
            cycles: Cycles::default(),
        }
    }
}

impl Core {
    /// Constructs a core with a zeroed register file and an empty bus (no
    /// peripherals registered).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the register file, the bus (and every registered
    /// peripheral), and the cycle counter to their power-up state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.bus.reset();
        self.cycles = Cycles::default();
    }

    /// Loads an image (as produced by [`crate::image::parse`]) onto the
    /// bus, bypassing watches and logging.
    pub fn load_image(&mut self, image: impl IntoIterator<Item = (u16, u8)>) {
        self.bus.load_image(image);
    }

    /// Decodes and executes exactly one instruction at the current PC,
    /// advancing the cycle counter by its reported cost.
    ///
    /// `fatal_on_illegal` selects the illegal-instruction policy: fatal (an
    /// `Err` that the caller should surface as `segv`) under free-run,
    /// non-fatal (a logged no-op) under single-step.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction is illegal and
    /// `fatal_on_illegal` is set, or if executing it raised an execution
    /// or bus error.
    pub fn step(&mut self, fatal_on_illegal: bool) -> Result<&'static str> {
        let insn = decode::decode(&mut self.regs, &mut self.bus);
        self.cycles.0 += insn.cycles;
        match insn.exec {
            Some(exec_fn) => {
                exec_fn(self, &insn)?;
                Ok(insn.mnemonic)
            }
            None if fatal_on_illegal => Err(Error::Decode(decode::Error::Illegal(insn.raw))),
            None => Ok(insn.mnemonic),
        }
    }
}
