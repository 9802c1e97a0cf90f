//! Instruction decoding.
//!
//! Fetches one instruction word (and, depending on addressing mode, its
//! operand extension words) and turns it into a [`DecodedInstruction`]:
//! a mnemonic, resolved operands, an accumulated cycle cost, and the
//! executor function that carries out its semantics.

use thiserror::Error;

use crate::bus::Bus;
use crate::exec::{self, ExecFn};
use crate::operand::Operand;
use crate::reg::{RegisterFile, CG2, PC, SR};

/// An error raised while decoding an instruction word.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The opcode didn't match any single-operand, double-operand, or jump
    /// encoding.
    #[error("illegal instruction {0:#06x}")]
    Illegal(u16),
}

/// One decoded instruction, ready to execute.
#[derive(Debug)]
pub struct DecodedInstruction {
    /// The instruction word as fetched, before operand extension words.
    pub raw: u16,
    pub mnemonic: &'static str,
    pub byte_mode: bool,
    pub source: Option<Operand>,
    pub dest: Option<Operand>,
    pub cycles: u64,
    pub exec: Option<ExecFn>,
}

impl DecodedInstruction {
    fn illegal(raw: u16) -> Self {
        log::error!("illegal instruction {raw:#06x}");
        Self {
            raw,
            mnemonic: "illegal",
            byte_mode: false,
            source: None,
            dest: None,
            cycles: 1,
            exec: None,
        }
    }
}

/// Decodes the instruction at the current PC, advancing PC past it and any
/// operand extension words it consumes.
#[must_use]
pub fn decode(regs: &mut RegisterFile, bus: &mut Bus) -> DecodedInstruction {
    let raw = fetch_word(regs, bus);
    if raw & 0xE000 == 0x2000 {
        decode_jump(raw, regs)
    } else if raw & 0xF000 == 0x1000 {
        decode_single(raw, regs, bus)
    } else {
        decode_double(raw, regs, bus)
    }
}

fn fetch_word(regs: &mut RegisterFile, bus: &mut Bus) -> u16 {
    match regs.fetch(bus) {
        Ok(word) => word,
        Err(err) => {
            log::error!("instruction fetch failed: {err}");
            0
        }
    }
}

/// Resolves a source operand per the As addressing-mode encoding, and
/// returns it with the extra cycles (beyond the instruction's base cost)
/// it incurs.
fn source_operand(
    as_: u8,
    rsrc: usize,
    byte_mode: bool,
    regs: &mut RegisterFile,
    bus: &mut Bus,
) -> (Operand, u64) {
    if rsrc == CG2 {
        return (Operand::Register { reg: rsrc, byte_mode, as_mode: as_ }, 0);
    }
    if rsrc == SR && matches!(as_, 2 | 3) {
        return (Operand::Register { reg: rsrc, byte_mode, as_mode: as_ }, 0);
    }
    match as_ {
        0 => (Operand::Register { reg: rsrc, byte_mode, as_mode: 0 }, 0),
        1 => {
            let offset = fetch_word(regs, bus);
            let operand = if rsrc == PC {
                Operand::Indexed { reg: PC, offset, byte_mode }
            } else if rsrc == SR {
                Operand::Absolute { addr: offset, byte_mode }
            } else {
                Operand::Indexed { reg: rsrc, offset, byte_mode }
            };
            (operand, 2)
        }
        2 => (Operand::Indirect { reg: rsrc, byte_mode }, 1),
        3 => {
            if rsrc == PC {
                let value = fetch_word(regs, bus);
                (Operand::Immediate { value, byte_mode }, 1)
            } else {
                (Operand::IndirectAutoInc { reg: rsrc, byte_mode }, 1)
            }
        }
        _ => unreachable!("As is a 2-bit field"),
    }
}

/// Resolves a destination operand. Ad is a single bit: 0 selects register
/// mode, 1 selects indexed/absolute mode with an extension word.
fn dest_operand(
    ad: u8,
    rdest: usize,
    byte_mode: bool,
    regs: &mut RegisterFile,
    bus: &mut Bus,
) -> (Operand, u64) {
    if ad == 0 {
        let extra = u64::from(rdest == PC);
        (Operand::Register { reg: rdest, byte_mode, as_mode: 0 }, extra)
    } else {
        let offset = fetch_word(regs, bus);
        let operand = if rdest == PC {
            Operand::Indexed { reg: PC, offset, byte_mode }
        } else if rdest == SR {
            Operand::Absolute { addr: offset, byte_mode }
        } else {
            Operand::Indexed { reg: rdest, offset, byte_mode }
        };
        (operand, 3)
    }
}

fn decode_single(raw: u16, regs: &mut RegisterFile, bus: &mut Bus) -> DecodedInstruction {
    let sub = (raw >> 7) & 0x7;
    let byte_mode = (raw >> 6) & 1 != 0;
    let as_ = ((raw >> 4) & 0x3) as u8;
    let rsrc = (raw & 0xF) as usize;

    let (mnemonic, exec, surcharge): (&str, ExecFn, u64) = match sub {
        0x0 => ("rrc", exec::rrc, 0),
        0x1 => ("swpb", exec::swpb, 0),
        0x2 => ("rra", exec::rra, 0),
        0x3 => ("sxt", exec::sxt, 0),
        0x4 => ("push", exec::push, 2),
        0x5 => ("call", exec::call, 3),
        0x6 => ("reti", exec::reti, 4),
        _ => return DecodedInstruction::illegal(raw),
    };

    let (source, src_cycles) = source_operand(as_, rsrc, byte_mode, regs, bus);

    DecodedInstruction {
        raw,
        mnemonic,
        byte_mode,
        source: Some(source),
        dest: None,
        cycles: 1 + src_cycles + surcharge,
        exec: Some(exec),
    }
}

fn decode_double(raw: u16, regs: &mut RegisterFile, bus: &mut Bus) -> DecodedInstruction {
    let top = (raw >> 12) & 0xF;
    let (mnemonic, exec): (&str, ExecFn) = match top {
        0x4 => ("mov", exec::mov),
        0x5 => ("add", exec::add),
        0x6 => ("addc", exec::addc),
        0x7 => ("subc", exec::subc),
        0x8 => ("sub", exec::sub),
        0x9 => ("cmp", exec::cmp),
        0xA => ("dadd", exec::dadd),
        0xB => ("bit", exec::bit),
        0xC => ("bic", exec::bic),
        0xD => ("bis", exec::bis),
        0xE => ("xor", exec::xor),
        0xF => ("and", exec::and),
        _ => return DecodedInstruction::illegal(raw),
    };

    let rsrc = ((raw >> 8) & 0xF) as usize;
    let ad = ((raw >> 7) & 0x1) as u8;
    let byte_mode = (raw >> 6) & 1 != 0;
    let as_ = ((raw >> 4) & 0x3) as u8;
    let rdest = (raw & 0xF) as usize;

    let (source, src_cycles) = source_operand(as_, rsrc, byte_mode, regs, bus);
    let (dest, dst_cycles) = dest_operand(ad, rdest, byte_mode, regs, bus);

    DecodedInstruction {
        raw,
        mnemonic,
        byte_mode,
        source: Some(source),
        dest: Some(dest),
        cycles: 1 + src_cycles + dst_cycles,
        exec: Some(exec),
    }
}

fn decode_jump(raw: u16, regs: &RegisterFile) -> DecodedInstruction {
    let sub = (raw >> 10) & 0x7;
    let field = raw & 0x3FF;
    let signed10 = if field & 0x200 != 0 {
        field as i16 - 0x400
    } else {
        field as i16
    };
    let offset = signed10 * 2;
    let base_pc = regs.pc();

    let (mnemonic, exec): (&str, ExecFn) = match sub {
        0x0 => ("jnz", exec::jnz),
        0x1 => ("jz", exec::jz),
        0x2 => ("jnc", exec::jnc),
        0x3 => ("jc", exec::jc),
        0x4 => ("jn", exec::jn),
        0x5 => ("jge", exec::jge),
        0x6 => ("jl", exec::jl),
        0x7 => ("jmp", exec::jmp),
        _ => unreachable!("sub is a 3-bit field"),
    };

    DecodedInstruction {
        raw,
        mnemonic,
        byte_mode: false,
        source: Some(Operand::JumpTarget { base_pc, offset }),
        dest: None,
        cycles: 2,
        exec: Some(exec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (RegisterFile, Bus) {
        let mut bus = Bus::new();
        bus.attach_default_ram();
        (RegisterFile::new(), bus)
    }

    #[test]
    fn decodes_mov_immediate_to_register() {
        let (mut regs, mut bus) = setup();
        bus.write_word_quiet(0xF000, 0x4035);
        bus.write_word_quiet(0xF002, 0x1234);
        regs.set_pc(0xF000);
        let insn = decode(&mut regs, &mut bus);
        assert_eq!(insn.mnemonic, "mov");
        assert_eq!(insn.cycles, 2);
        assert_eq!(regs.pc(), 0xF004);
    }

    #[test]
    fn decodes_single_operand_call() {
        let (mut regs, mut bus) = setup();
        bus.write_word_quiet(0xF100, 0x12B0);
        bus.write_word_quiet(0xF102, 0xF200);
        regs.set_pc(0xF100);
        let insn = decode(&mut regs, &mut bus);
        assert_eq!(insn.mnemonic, "call");
        assert_eq!(regs.pc(), 0xF104);
    }

    #[test]
    fn decodes_conditional_jump_offset() {
        let (mut regs, mut bus) = setup();
        bus.write_word_quiet(0xF000, 0x2402);
        regs.set_pc(0xF000);
        let insn = decode(&mut regs, &mut bus);
        assert_eq!(insn.mnemonic, "jz");
        match insn.source {
            Some(Operand::JumpTarget { base_pc, offset }) => {
                assert_eq!(base_pc, 0xF002);
                assert_eq!(offset, 4);
            }
            _ => panic!("expected a jump target operand"),
        }
    }

    #[test]
    fn reserved_single_operand_suboperation_is_illegal() {
        let (mut regs, mut bus) = setup();
        // sub-opcode 0x7 is reserved.
        bus.write_word_quiet(0xF000, 0x1380);
        regs.set_pc(0xF000);
        let insn = decode(&mut regs, &mut bus);
        assert_eq!(insn.mnemonic, "illegal");
        assert!(insn.exec.is_none());
    }
}
