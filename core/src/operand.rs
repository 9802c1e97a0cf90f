//! Decoded addressing modes.
//!
//! An [`Operand`] carries everything the executor needs to read (and, for
//! writable modes, store back) the value an instruction's source or
//! destination field denotes, including the constant-generator synthesis
//! that R2 and R3 perform as sources.

use crate::bus::Bus;
use crate::reg::{RegisterFile, CG2, SR};

/// A single decoded operand.
#[derive(Clone, Copy, Debug)]
pub enum Operand {
    /// Register mode, or one of R2/R3's constant-generator encodings.
    Register { reg: usize, byte_mode: bool, as_mode: u8 },
    /// Indexed mode: `offset(Rn)`.
    Indexed { reg: usize, offset: u16, byte_mode: bool },
    /// Indirect register mode: `@Rn`.
    Indirect { reg: usize, byte_mode: bool },
    /// Indirect autoincrement mode: `@Rn+`.
    IndirectAutoInc { reg: usize, byte_mode: bool },
    /// An immediate value fetched from the instruction stream.
    Immediate { value: u16, byte_mode: bool },
    /// Absolute addressing: `&ADDR`.
    Absolute { addr: u16, byte_mode: bool },
    /// A jump's resolved branch target, relative to the post-fetch PC.
    JumpTarget { base_pc: u16, offset: i16 },
}

impl Operand {
    /// Reads the value this operand denotes, applying autoincrement side
    /// effects and constant-generator synthesis along the way.
    pub fn read(&self, regs: &mut RegisterFile, bus: &mut Bus) -> crate::bus::Result<u16> {
        Ok(match *self {
            Operand::Register { reg, byte_mode, as_mode } => {
                if reg == CG2 {
                    cg2_constant(as_mode, byte_mode)
                } else if reg == SR && as_mode >= 2 {
                    sr_constant(as_mode, byte_mode)
                } else {
                    regs.load(reg, byte_mode)
                }
            }
            Operand::Indexed { reg, offset, byte_mode } => {
                let addr = regs.get(reg).wrapping_add(offset);
                read_width(bus, addr, byte_mode)?
            }
            Operand::Indirect { reg, byte_mode } => {
                let addr = regs.get(reg);
                read_width(bus, addr, byte_mode)?
            }
            Operand::IndirectAutoInc { reg, byte_mode } => {
                let addr = regs.get(reg);
                let value = read_width(bus, addr, byte_mode)?;
                let step = if byte_mode { 1 } else { 2 };
                regs.set(reg, addr.wrapping_add(step));
                value
            }
            Operand::Immediate { value, byte_mode } => {
                if byte_mode { value & 0xFF } else { value }
            }
            Operand::Absolute { addr, byte_mode } => read_width(bus, addr, byte_mode)?,
            Operand::JumpTarget { .. } => {
                panic!("jump targets are resolved by jump exec functions, not Operand::read")
            }
        })
    }

    /// Writes `value` to the location this operand denotes.
    ///
    /// # Panics
    ///
    /// Panics on a read-only variant. The decoder never constructs these in
    /// destination position, so this is unreachable in practice.
    pub fn write(
        &self,
        regs: &mut RegisterFile,
        bus: &mut Bus,
        value: u16,
    ) -> crate::bus::Result<()> {
        match *self {
            Operand::Register { reg, byte_mode, .. } => {
                regs.store(reg, value, byte_mode);
                Ok(())
            }
            Operand::Indexed { reg, offset, byte_mode } => {
                let addr = regs.get(reg).wrapping_add(offset);
                write_width(bus, addr, value, byte_mode)
            }
            Operand::Absolute { addr, byte_mode } => write_width(bus, addr, value, byte_mode),
            Operand::Indirect { .. }
            | Operand::IndirectAutoInc { .. }
            | Operand::Immediate { .. }
            | Operand::JumpTarget { .. } => {
                panic!("operand is not a valid write destination")
            }
        }
    }
}

fn cg2_constant(as_mode: u8, byte_mode: bool) -> u16 {
    let value = match as_mode {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 0xFFFF,
        _ => unreachable!("As is a 2-bit field"),
    };
    if byte_mode { value & 0xFF } else { value }
}

fn sr_constant(as_mode: u8, byte_mode: bool) -> u16 {
    let value = match as_mode {
        2 => 4,
        3 => 8,
        _ => unreachable!("SR only synthesises constants for As in {{2,3}}"),
    };
    if byte_mode { value & 0xFF } else { value }
}

fn read_width(bus: &mut Bus, addr: u16, byte_mode: bool) -> crate::bus::Result<u16> {
    if byte_mode {
        bus.read_byte(addr).map(u16::from)
    } else {
        bus.read_word(addr)
    }
}

fn write_width(bus: &mut Bus, addr: u16, value: u16, byte_mode: bool) -> crate::bus::Result<()> {
    if byte_mode {
        bus.write_byte(addr, value as u8)
    } else {
        bus.write_word(addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cg2_synthesises_all_four_constants() {
        let mut regs = RegisterFile::new();
        let mut bus = Bus::new();
        for (as_mode, expect) in [(0, 0), (1, 1), (2, 2), (3, 0xFFFF)] {
            let op = Operand::Register { reg: CG2, byte_mode: false, as_mode };
            assert_eq!(op.read(&mut regs, &mut bus).unwrap(), expect);
        }
    }

    #[test]
    fn sr_synthesises_constants_only_for_as_2_and_3() {
        let mut regs = RegisterFile::new();
        let mut bus = Bus::new();
        let four = Operand::Register { reg: SR, byte_mode: false, as_mode: 2 };
        let eight = Operand::Register { reg: SR, byte_mode: false, as_mode: 3 };
        assert_eq!(four.read(&mut regs, &mut bus).unwrap(), 4);
        assert_eq!(eight.read(&mut regs, &mut bus).unwrap(), 8);
    }

    #[test]
    fn autoincrement_advances_by_width() {
        let mut regs = RegisterFile::new();
        regs.set(5, 0x0200);
        let mut bus = Bus::new();
        bus.attach_default_ram();
        let op = Operand::IndirectAutoInc { reg: 5, byte_mode: false };
        op.read(&mut regs, &mut bus).unwrap();
        assert_eq!(regs.get(5), 0x0202);

        regs.set(5, 0x0200);
        let op = Operand::IndirectAutoInc { reg: 5, byte_mode: true };
        op.read(&mut regs, &mut bus).unwrap();
        assert_eq!(regs.get(5), 0x0201);
    }

    #[test]
    fn indexed_write_round_trips_through_ram() {
        let mut regs = RegisterFile::new();
        regs.set(6, 0x0200);
        let mut bus = Bus::new();
        bus.attach_default_ram();
        let op = Operand::Indexed { reg: 6, offset: 0x0010, byte_mode: false };
        op.write(&mut regs, &mut bus, 0xBEEF).unwrap();
        assert_eq!(op.read(&mut regs, &mut bus).unwrap(), 0xBEEF);
    }
}
