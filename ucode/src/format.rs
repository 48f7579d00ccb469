//! Binary cache format for a compiled microcode ROM. All multi-byte
//! fields are big-endian.
//!
//! Layout: magic, format version, revision, build timestamp, opcode
//! count, bytes per control word, total slot count, two reserved bytes,
//! then the 0x10000 control words, then one metadata record per opcode
//! (length-prefixed name, index, operand count, combination count and
//! the packed combination bytes).

use std::collections::BTreeMap;
use std::io::{Read, Write};

use common::*;
use packed_struct::prelude::*;
use thiserror::Error;

use crate::MicrocodeRom;

/// "COBT"
pub const ROM_MAGIC: u32 = 0x434F_4254;
pub const ROM_FORMAT_VERSION: u8 = 1;
const BYTES_PER_CONTROL_WORD: u8 = 4;

#[derive(Debug, Error)]
pub enum RomFormatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported format version {0}")]
    BadVersion(u8),
    #[error("corrupt opcode metadata")]
    BadMetadata,
}

pub fn save_rom<W: Write>(rom: &MicrocodeRom, out: &mut W) -> std::io::Result<()> {
    out.write_all(&ROM_MAGIC.to_be_bytes())?;
    out.write_all(&[ROM_FORMAT_VERSION])?;
    out.write_all(&rom.revision.to_be_bytes())?;
    out.write_all(&rom.timestamp.to_be_bytes())?;
    out.write_all(&(rom.opcodes.len() as u16).to_be_bytes())?;
    out.write_all(&[BYTES_PER_CONTROL_WORD])?;
    out.write_all(&(ROM_SLOTS as u32).to_be_bytes())?;
    out.write_all(&[0, 0])?;
    for word in &rom.control_words {
        out.write_all(&word.0.to_be_bytes())?;
    }
    for opcode in rom.opcodes.values() {
        out.write_all(&[opcode.name.len() as u8])?;
        out.write_all(opcode.name.as_bytes())?;
        out.write_all(&[opcode.index, opcode.operand_count])?;
        out.write_all(&[opcode.combinations.len() as u8])?;
        for combination in &opcode.combinations {
            let packed = PackedCombination::from(combination)
                .pack()
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "pack failed"))?;
            out.write_all(&packed)?;
        }
    }
    Ok(())
}

fn read_u8<R: Read>(input: &mut R) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(input: &mut R) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn load_rom<R: Read>(input: &mut R) -> Result<MicrocodeRom, RomFormatError> {
    let magic = read_u32(input)?;
    if magic != ROM_MAGIC {
        return Err(RomFormatError::BadMagic(magic));
    }
    let version = read_u8(input)?;
    if version != ROM_FORMAT_VERSION {
        return Err(RomFormatError::BadVersion(version));
    }
    let revision = read_u16(input)?;
    let timestamp = read_u32(input)?;
    let opcode_count = read_u16(input)?;
    if read_u8(input)? != BYTES_PER_CONTROL_WORD {
        return Err(RomFormatError::BadMetadata);
    }
    if read_u32(input)? as usize != ROM_SLOTS {
        return Err(RomFormatError::BadMetadata);
    }
    let mut reserved = [0u8; 2];
    input.read_exact(&mut reserved)?;

    let mut control_words = Vec::with_capacity(ROM_SLOTS);
    for _ in 0..ROM_SLOTS {
        control_words.push(ControlWord(read_u32(input)?));
    }

    let mut opcodes = BTreeMap::new();
    for _ in 0..opcode_count {
        let name_len = read_u8(input)? as usize;
        let mut name_bytes = vec![0u8; name_len];
        input.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes).map_err(|_| RomFormatError::BadMetadata)?;
        let index = read_u8(input)?;
        if index > OPCODE_INDEX_MAX {
            return Err(RomFormatError::BadMetadata);
        }
        let operand_count = read_u8(input)?;
        if operand_count > 2 {
            return Err(RomFormatError::BadMetadata);
        }
        let combination_count = read_u8(input)?;
        let mut combinations = Vec::with_capacity(combination_count as usize);
        for _ in 0..combination_count {
            let byte = read_u8(input)?;
            let packed =
                PackedCombination::unpack(&[byte]).map_err(|_| RomFormatError::BadMetadata)?;
            combinations.push(packed.combination());
        }
        opcodes.insert(
            name.clone(),
            Opcode {
                name,
                index,
                operand_count,
                combinations,
            },
        );
    }

    Ok(MicrocodeRom {
        revision,
        timestamp,
        control_words,
        opcodes,
    })
}
