#[macro_use]
extern crate lazy_static;

mod compile;
mod format;

pub use compile::{compile, CompileError, ErrorKind};
pub use format::{load_rom, save_rom, RomFormatError, ROM_FORMAT_VERSION, ROM_MAGIC};

use std::collections::BTreeMap;

use common::*;

/// A compiled microcode image: one control word per ROM address plus
/// the opcode metadata the assembler and disassembler bind against.
#[derive(Clone, PartialEq)]
pub struct MicrocodeRom {
    pub revision: u16,
    /// Build time, seconds since the Unix epoch.
    pub timestamp: u32,
    pub control_words: Vec<ControlWord>,
    pub opcodes: BTreeMap<String, Opcode>,
}

impl MicrocodeRom {
    pub fn fetch(&self, addr: u16) -> ControlWord {
        self.control_words[addr as usize]
    }

    pub fn opcode(&self, name: &str) -> Option<&Opcode> {
        self.opcodes.get(&name.to_ascii_uppercase())
    }

    pub fn opcode_by_index(&self, index: u8, single_operand: bool) -> Option<&Opcode> {
        self.opcodes
            .values()
            .find(|o| o.index == index && (o.operand_count == 1) == single_operand)
    }
}

impl std::fmt::Debug for MicrocodeRom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MicrocodeRom {{ revision: {}, opcodes: {} }}",
            self.revision,
            self.opcodes.len()
        )
    }
}

pub const COBALT_UCODE: &str = include_str!("cobalt.cmc");

lazy_static! {
    pub static ref ROM: MicrocodeRom =
        compile(COBALT_UCODE).expect("built-in microcode failed to compile");
}
