//! Metadata-driven disassembly. Never fails: an instruction word that
//! matches no opcode form comes back as a `dw` line with a `; ??` tail,
//! consuming two bytes, so a scan always makes forward progress.

use common::*;
use packed_struct::PrimitiveEnum;
use sim::Bus;
use ucode::MicrocodeRom;

pub struct Disassembled {
    pub text: String,
    pub len: u16,
}

struct Cursor<'a, B: Bus> {
    bus: &'a mut B,
    segment: u16,
    offset: u16,
}

impl<'a, B: Bus> Cursor<'a, B> {
    fn byte(&mut self) -> u8 {
        let value = self.bus.read_byte(self.segment, self.offset);
        self.offset = self.offset.wrapping_add(1);
        value
    }

    fn word(&mut self) -> u16 {
        let value = self.bus.read_word(self.segment, self.offset);
        self.offset = self.offset.wrapping_add(2);
        value
    }
}

fn register_name(index: u8) -> String {
    match Register::from_primitive(index & REG_INDEX_MASK) {
        Some(r) => r.to_string(),
        None => format!("r{}", index),
    }
}

fn render<B: Bus>(t: OperandType, first: bool, iw: InstructionWord, cursor: &mut Cursor<B>) -> String {
    match t {
        OperandType::Reg => {
            let index = if first { iw.reg_index() } else { cursor.byte() };
            register_name(index)
        }
        OperandType::Imm8 => format!("0x{:x}", cursor.byte()),
        OperandType::Imm16 => format!("0x{:x}", cursor.word()),
        OperandType::ByteMemImm => format!("byte[0x{:x}]", cursor.word()),
        OperandType::WordMemImm => format!("word[0x{:x}]", cursor.word()),
        OperandType::ByteMemReg | OperandType::WordMemReg => {
            let base = if first { iw.reg_index() } else { cursor.byte() };
            let disp = cursor.word() as i16;
            let prefix = if t == OperandType::ByteMemReg {
                "byte"
            } else {
                "word"
            };
            let base = register_name(base);
            match disp {
                0 => format!("{}[{}]", prefix, base),
                d if d < 0 => format!("{}[{}-0x{:x}]", prefix, base, -(d as i32)),
                d => format!("{}[{}+0x{:x}]", prefix, base, d),
            }
        }
    }
}

fn decode<B: Bus>(
    rom: &MicrocodeRom,
    iw: InstructionWord,
    cursor: &mut Cursor<B>,
) -> Option<Disassembled> {
    let opcode = rom.opcode_by_index(iw.opcode_index(), iw.single_operand())?;
    let combo = opcode.combinations.iter().find(|c| {
        c.op1.map_or(0, |t| t as u8) == iw.op1_type_code()
            && c.op2.map_or(0, |t| t as u8) == iw.op2_type_code()
    })?;

    let mnemonic = opcode.name.to_ascii_lowercase();
    let first = combo.op1.map(|t| render(t, true, iw, cursor));
    let second = combo.op2.map(|t| render(t, false, iw, cursor));
    // swapped forms print their operands back in source order
    let (first, second) = if combo.swapped {
        (second, first)
    } else {
        (first, second)
    };

    let text = match (first, second) {
        (Some(a), Some(b)) => format!("{} {}, {}", mnemonic, a, b),
        (Some(a), None) => format!("{} {}", mnemonic, a),
        (None, Some(b)) => format!("{} {}", mnemonic, b),
        (None, None) => mnemonic,
    };
    Some(Disassembled {
        text,
        len: combo.instruction_bytes(),
    })
}

/// Disassemble the instruction at `segment:offset`.
pub fn disassemble_one<B: Bus>(
    rom: &MicrocodeRom,
    bus: &mut B,
    segment: u16,
    offset: u16,
) -> Disassembled {
    let mut cursor = Cursor {
        bus,
        segment,
        offset,
    };
    let word = cursor.word();
    let iw = InstructionWord(word);
    match decode(rom, iw, &mut cursor) {
        Some(d) => d,
        None => Disassembled {
            text: format!("dw 0x{:04x} ; ??", word),
            len: 2,
        },
    }
}
