extern crate pest;
#[macro_use]
extern crate pest_derive;

mod disasm;

pub use disasm::{disassemble_one, Disassembled};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use common::*;
use log::debug;
use pest::Parser;
use thiserror::Error;
use ucode::MicrocodeRom;

#[derive(Parser)]
#[grammar = "assembly.pest"]
struct AsmParser;

#[derive(Debug, PartialEq)]
pub struct AssembleError {
    /// 1-based source line.
    pub line: usize,
    pub kind: AsmErrorKind,
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl std::error::Error for AssembleError {}

#[derive(Debug, Error, PartialEq)]
pub enum AsmErrorKind {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("'{0}' takes {1} operands, got {2}")]
    OperandCount(String, u8, usize),
    #[error("no operand form of '{0}' matches")]
    NoMatchingForm(String),
    #[error("value {0} is out of range here")]
    ImmediateRange(i64),
    #[error("bad number '{0}'")]
    BadNumber(String),
    #[error("bad escape '^{0}'")]
    BadEscape(char),
    #[error("unknown register '{0}'")]
    BadRegister(String),
    #[error("only the ds segment can be named here")]
    BadSegment,
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),
    #[error("label '{0}' falls outside the 16-bit address space")]
    AddressOverflow(String),
    #[error("unsupported output format '{0}'")]
    BadFormat(String),
}

fn err(line: usize, kind: AsmErrorKind) -> AssembleError {
    AssembleError { line, kind }
}

#[derive(Clone, Debug)]
enum Imm {
    Number(i64),
    Label(String),
}

#[derive(Clone, Debug)]
enum SourceOperand {
    Register(Register),
    Immediate(Imm),
    Memory {
        width: Width,
        base: Option<Register>,
        disp: i64,
    },
}

fn parse_i64(text: &str, line: usize) -> Result<i64, AssembleError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse()
    }
    .map_err(|_| err(line, AsmErrorKind::BadNumber(text.to_owned())))?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// `^` escapes: `^^ ^0 ^n ^r ^t ^"`. Everything else passes through.
fn unescape(raw: &str, line: usize) -> Result<Vec<u8>, AssembleError> {
    let mut out = Vec::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            let escaped = chars
                .next()
                .ok_or_else(|| err(line, AsmErrorKind::BadEscape('^')))?;
            out.push(match escaped {
                '^' => b'^',
                '0' => 0,
                'n' => b'\n',
                'r' => b'\r',
                't' => b'\t',
                '"' => b'"',
                other => return Err(err(line, AsmErrorKind::BadEscape(other))),
            });
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    Ok(out)
}

fn operand_matches(op: &SourceOperand, t: OperandType) -> bool {
    match (op, t) {
        (SourceOperand::Register(_), OperandType::Reg) => true,
        (SourceOperand::Immediate(Imm::Number(v)), OperandType::Imm8) => (-128..=0xFF).contains(v),
        (SourceOperand::Immediate(Imm::Number(v)), OperandType::Imm16) => {
            (-32768..=0xFFFF).contains(v)
        }
        (SourceOperand::Immediate(Imm::Label(_)), OperandType::Imm16) => true,
        (SourceOperand::Memory { width, base, .. }, _) => {
            let expected = match (width, base.is_some()) {
                (Width::Byte, false) => OperandType::ByteMemImm,
                (Width::Byte, true) => OperandType::ByteMemReg,
                (_, false) => OperandType::WordMemImm,
                (_, true) => OperandType::WordMemReg,
            };
            t == expected
        }
        _ => false,
    }
}

fn pair_matches(op: Option<&SourceOperand>, t: Option<OperandType>) -> bool {
    match (op, t) {
        (None, None) => true,
        (Some(op), Some(t)) => operand_matches(op, t),
        _ => false,
    }
}

struct Assembler<'a> {
    rom: &'a MicrocodeRom,
    origin: u16,
    out: Vec<u8>,
    labels: BTreeMap<String, u16>,
    fixups: Vec<(usize, String, usize)>,
}

impl<'a> Assembler<'a> {
    fn new(rom: &'a MicrocodeRom) -> Assembler<'a> {
        Assembler {
            rom,
            origin: 0,
            out: Vec::new(),
            labels: BTreeMap::new(),
            fixups: Vec::new(),
        }
    }

    fn parse_operand(
        &self,
        pair: pest::iterators::Pair<Rule>,
        line: usize,
    ) -> Result<SourceOperand, AssembleError> {
        match pair.as_rule() {
            Rule::number => Ok(SourceOperand::Immediate(Imm::Number(parse_i64(
                pair.as_str(),
                line,
            )?))),
            Rule::char_literal => {
                let raw = pair.into_inner().next().unwrap().as_str();
                let bytes = unescape(raw, line)?;
                if bytes.len() != 1 {
                    return Err(err(
                        line,
                        AsmErrorKind::Syntax("character literal must be one byte".to_owned()),
                    ));
                }
                Ok(SourceOperand::Immediate(Imm::Number(bytes[0] as i64)))
            }
            Rule::ident => match Register::from_str(pair.as_str()) {
                Ok(r) => Ok(SourceOperand::Register(r)),
                Err(_) => Ok(SourceOperand::Immediate(Imm::Label(
                    pair.as_str().to_owned(),
                ))),
            },
            Rule::mem_operand => {
                let mut width = Width::Word;
                let mut base = None;
                let mut disp = 0i64;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::size_prefix => {
                            width = if inner.as_str().eq_ignore_ascii_case("byte") {
                                Width::Byte
                            } else {
                                Width::Word
                            };
                        }
                        Rule::seg_prefix => {
                            let segment = inner.into_inner().next().unwrap().as_str();
                            // ds is the only segment data references can reach
                            if !segment.eq_ignore_ascii_case("ds") {
                                return Err(err(line, AsmErrorKind::BadSegment));
                            }
                        }
                        Rule::number => disp = parse_i64(inner.as_str(), line)?,
                        Rule::reg_disp => {
                            let mut parts = inner.into_inner();
                            let name = parts.next().unwrap().as_str();
                            base = Some(Register::from_str(name).map_err(|_| {
                                err(line, AsmErrorKind::BadRegister(name.to_owned()))
                            })?);
                            if let Some(sign) = parts.next() {
                                let magnitude = parse_i64(parts.next().unwrap().as_str(), line)?;
                                disp = if sign.as_str() == "-" {
                                    -magnitude
                                } else {
                                    magnitude
                                };
                            }
                        }
                        _ => {}
                    }
                }
                Ok(SourceOperand::Memory { width, base, disp })
            }
            other => Err(err(line, AsmErrorKind::Syntax(format!("{:?}", other)))),
        }
    }

    fn emit_operand(
        &mut self,
        source: &SourceOperand,
        t: OperandType,
        first: bool,
        line: usize,
    ) -> Result<(), AssembleError> {
        match (t, source) {
            (OperandType::Reg, SourceOperand::Register(r)) => {
                // operand 1 keeps its register in the instruction word
                if !first {
                    self.out.push(*r as u8);
                }
            }
            (OperandType::Imm8, SourceOperand::Immediate(Imm::Number(v))) => {
                self.out.push(*v as u8);
            }
            (OperandType::Imm16, SourceOperand::Immediate(Imm::Number(v))) => {
                self.out.extend((*v as u16).to_le_bytes());
            }
            (OperandType::Imm16, SourceOperand::Immediate(Imm::Label(label))) => {
                self.fixups.push((self.out.len(), label.clone(), line));
                self.out.extend([0, 0]);
            }
            (
                OperandType::ByteMemImm | OperandType::WordMemImm,
                SourceOperand::Memory { disp, .. },
            ) => {
                if !(0..=0xFFFF).contains(disp) {
                    return Err(err(line, AsmErrorKind::ImmediateRange(*disp)));
                }
                self.out.extend((*disp as u16).to_le_bytes());
            }
            (
                OperandType::ByteMemReg | OperandType::WordMemReg,
                SourceOperand::Memory { base, disp, .. },
            ) => {
                if !first {
                    self.out.push(base.map_or(0, |r| r as u8));
                }
                if !(-32768..=0xFFFF).contains(disp) {
                    return Err(err(line, AsmErrorKind::ImmediateRange(*disp)));
                }
                self.out.extend((*disp as u16).to_le_bytes());
            }
            _ => unreachable!("operand matched its combination"),
        }
        Ok(())
    }

    fn instruction(
        &mut self,
        pair: pest::iterators::Pair<Rule>,
        line: usize,
    ) -> Result<(), AssembleError> {
        let mut inner = pair.into_inner();
        let mnemonic = inner.next().unwrap().as_str().to_ascii_uppercase();
        let mut operands = Vec::new();
        for p in inner {
            operands.push(self.parse_operand(p, line)?);
        }

        let opcode = self
            .rom
            .opcode(&mnemonic)
            .ok_or_else(|| err(line, AsmErrorKind::UnknownOpcode(mnemonic.clone())))?
            .clone();
        if operands.len() != opcode.operand_count as usize {
            return Err(err(
                line,
                AsmErrorKind::OperandCount(mnemonic, opcode.operand_count, operands.len()),
            ));
        }

        let combo = *opcode
            .combinations
            .iter()
            .find(|c| {
                let (s1, s2) = if c.swapped {
                    (operands.get(1), operands.get(0))
                } else {
                    (operands.get(0), operands.get(1))
                };
                pair_matches(s1, c.op1) && pair_matches(s2, c.op2)
            })
            .ok_or_else(|| err(line, AsmErrorKind::NoMatchingForm(mnemonic)))?;

        let (e1, e2) = if combo.swapped {
            (operands.get(1), operands.get(0))
        } else {
            (operands.get(0), operands.get(1))
        };

        let single = opcode.operand_count == 1;
        let t1 = combo.op1.map_or(0, |t| t as u8);
        let t2 = if single {
            0
        } else {
            combo.op2.map_or(0, |t| t as u8)
        };
        let reg = match (e1, combo.op1) {
            (Some(SourceOperand::Register(r)), Some(OperandType::Reg)) => *r as u8,
            (
                Some(SourceOperand::Memory { base: Some(r), .. }),
                Some(OperandType::ByteMemReg | OperandType::WordMemReg),
            ) => *r as u8,
            _ => 0,
        };
        self.out
            .extend(InstructionWord::new(single, opcode.index, t1, t2, reg).0.to_le_bytes());

        if let (Some(source), Some(t)) = (e1, combo.op1) {
            self.emit_operand(source, t, true, line)?;
        }
        if let (Some(source), Some(t)) = (e2, combo.op2) {
            self.emit_operand(source, t, false, line)?;
        }
        Ok(())
    }

    fn statement(
        &mut self,
        pair: pest::iterators::Pair<Rule>,
        line: usize,
    ) -> Result<(), AssembleError> {
        match pair.as_rule() {
            Rule::format_directive => {
                let kind = pair.into_inner().next().unwrap().as_str();
                if !kind.eq_ignore_ascii_case("raw") {
                    return Err(err(line, AsmErrorKind::BadFormat(kind.to_owned())));
                }
            }
            Rule::origin_directive => {
                let value = parse_i64(pair.into_inner().next().unwrap().as_str(), line)?;
                if !(0..=0xFFFF).contains(&value) {
                    return Err(err(line, AsmErrorKind::ImmediateRange(value)));
                }
                self.origin = value as u16;
            }
            Rule::db_directive => {
                for arg in pair.into_inner() {
                    match arg.as_rule() {
                        Rule::string | Rule::char_literal => {
                            let raw = arg.into_inner().next().unwrap().as_str();
                            let bytes = unescape(raw, line)?;
                            self.out.extend(bytes);
                        }
                        Rule::number => {
                            let value = parse_i64(arg.as_str(), line)?;
                            if !(-128..=0xFF).contains(&value) {
                                return Err(err(line, AsmErrorKind::ImmediateRange(value)));
                            }
                            self.out.push(value as u8);
                        }
                        _ => {}
                    }
                }
            }
            Rule::label_def => {
                let name = pair.into_inner().next().unwrap().as_str().to_owned();
                if self.labels.contains_key(&name) {
                    return Err(err(line, AsmErrorKind::DuplicateLabel(name)));
                }
                let position = self.origin as usize + self.out.len();
                if position > 0xFFFF {
                    return Err(err(line, AsmErrorKind::AddressOverflow(name)));
                }
                self.labels.insert(name, position as u16);
            }
            Rule::instruction => self.instruction(pair, line)?,
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, AssembleError> {
        for (position, label, line) in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&label)
                .ok_or_else(|| err(line, AsmErrorKind::UnknownLabel(label.clone())))?;
            self.out[position..position + 2].copy_from_slice(&target.to_le_bytes());
        }
        debug!("assembled {} bytes", self.out.len());
        Ok(self.out)
    }
}

pub fn assemble(source: &str, rom: &MicrocodeRom) -> Result<Vec<u8>, AssembleError> {
    let mut asm = Assembler::new(rom);
    for (i, raw) in source.lines().enumerate() {
        let line = i + 1;
        let parsed = AsmParser::parse(Rule::line, raw)
            .map_err(|e| err(line, AsmErrorKind::Syntax(e.variant.message().into_owned())))?;
        for pair in parsed.into_iter().next().unwrap().into_inner() {
            if pair.as_rule() == Rule::EOI {
                continue;
            }
            asm.statement(pair, line)?;
        }
    }
    asm.finish()
}
