use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use common::*;
use log::debug;
use thiserror::Error;

use crate::MicrocodeRom;

#[derive(Debug, PartialEq)]
pub struct CompileError {
    /// 1-based source line, 0 for whole-file errors.
    pub line: usize,
    pub kind: ErrorKind,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "line {}: {}", self.line, self.kind)
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Error, PartialEq)]
pub enum ErrorKind {
    #[error("malformed declaration: {0}")]
    MalformedDeclaration(String),
    #[error("unknown control token '{0}'")]
    UnknownToken(String),
    #[error("'{0}' conflicts with an earlier selector in the same field")]
    FieldConflict(String),
    #[error("unknown operand type '{0}'")]
    UnknownOperandType(String),
    #[error("bad number '{0}'")]
    BadNumber(String),
    #[error("duplicate macro '{0}'")]
    DuplicateMacro(String),
    #[error("labels and step targets are not allowed inside macros")]
    LabelInMacro,
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),
    #[error("unknown label '@{0}'")]
    UnknownLabel(String),
    #[error("step target '@{0}' points past the last control word")]
    TargetPastEnd(String),
    #[error("procedure exceeds the {} control-word limit", MAX_STEPS)]
    TooManySteps,
    #[error("step target without a condition")]
    TargetWithoutCondition,
    #[error("more than one step target on a line")]
    DuplicateTarget,
    #[error("condition without a step target")]
    ConditionWithoutTarget,
    #[error("size placeholder in a procedure with no generic operand")]
    StrayPlaceholder,
    #[error("opcode address 0x{0:04x} is already occupied")]
    OpcodeCollision(u16),
    #[error("wildcard overlaps an earlier wildcard at 0x{0:04x}")]
    WildcardOverlap(u16),
    #[error("END outside a body")]
    UnexpectedEnd,
    #[error("unterminated body at end of file")]
    UnterminatedBody,
    #[error("duplicate revision directive")]
    DuplicateRevision,
    #[error("the ILLEGAL macro is required and missing")]
    MissingIllegal,
    #[error("mnemonic '{0}' redeclared with a different index or operand count")]
    InconsistentOpcode(String),
}

fn at(line: usize, kind: ErrorKind) -> CompileError {
    CompileError { line, kind }
}

/// Operand type tokens as written in microcode source. `Imm`, `MemImm`
/// and `MemReg` are generic: a procedure using one is duplicated into a
/// byte and a word variant before address assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperandShape {
    Absent,
    Reg,
    Imm,
    Imm8,
    Imm16,
    MemImm,
    ByteMemImm,
    WordMemImm,
    MemReg,
    ByteMemReg,
    WordMemReg,
}

impl OperandShape {
    fn parse(token: &str) -> Option<OperandShape> {
        let shape = match token {
            "REG" => OperandShape::Reg,
            "IMM" => OperandShape::Imm,
            "IMM8" => OperandShape::Imm8,
            "IMM16" => OperandShape::Imm16,
            "MEMI" => OperandShape::MemImm,
            "BMEMI" => OperandShape::ByteMemImm,
            "WMEMI" => OperandShape::WordMemImm,
            "MEMR" => OperandShape::MemReg,
            "BMEMR" => OperandShape::ByteMemReg,
            "WMEMR" => OperandShape::WordMemReg,
            _ => return None,
        };
        Some(shape)
    }

    fn is_generic(self) -> bool {
        matches!(
            self,
            OperandShape::Imm | OperandShape::MemImm | OperandShape::MemReg
        )
    }

    fn sized(self, width: Width) -> OperandShape {
        match (self, width) {
            (OperandShape::Imm, Width::Byte) => OperandShape::Imm8,
            (OperandShape::Imm, Width::Word) => OperandShape::Imm16,
            (OperandShape::MemImm, Width::Byte) => OperandShape::ByteMemImm,
            (OperandShape::MemImm, Width::Word) => OperandShape::WordMemImm,
            (OperandShape::MemReg, Width::Byte) => OperandShape::ByteMemReg,
            (OperandShape::MemReg, Width::Word) => OperandShape::WordMemReg,
            _ => self,
        }
    }

    fn concrete(self) -> Option<OperandType> {
        match self {
            OperandShape::Absent => None,
            OperandShape::Reg => Some(OperandType::Reg),
            OperandShape::Imm8 => Some(OperandType::Imm8),
            OperandShape::Imm16 => Some(OperandType::Imm16),
            OperandShape::ByteMemImm => Some(OperandType::ByteMemImm),
            OperandShape::WordMemImm => Some(OperandType::WordMemImm),
            OperandShape::ByteMemReg => Some(OperandType::ByteMemReg),
            OperandShape::WordMemReg => Some(OperandType::WordMemReg),
            OperandShape::Imm | OperandShape::MemImm | OperandShape::MemReg => {
                unreachable!("generic shape survived specialization")
            }
        }
    }
}

#[derive(Clone)]
struct Fixup {
    word: usize,
    label: String,
    line: usize,
}

#[derive(Clone)]
struct Procedure {
    name: String,
    index: u8,
    operand_count: u8,
    op1: OperandShape,
    op2: OperandShape,
    swapped: bool,
    wildcard: bool,
    flags: Flags,
    words: Vec<ControlWord>,
    labels: BTreeMap<String, u8>,
    fixups: Vec<Fixup>,
    decl_line: usize,
}

impl Procedure {
    fn generic(&self) -> bool {
        self.op1.is_generic() || self.op2.is_generic()
    }

    /// ROM address of step 0 for this variant, via the same instruction
    /// word the assembler would emit for it.
    fn base_address(&self, flags: Flags) -> u16 {
        let single = self.operand_count == 1;
        let t1 = self.op1.concrete().map_or(0, |t| t as u8);
        let t2 = if single {
            0
        } else {
            self.op2.concrete().map_or(0, |t| t as u8)
        };
        InstructionWord::new(single, self.index, t1, t2, 0).rom_address(flags, 0)
    }
}

enum Body {
    Macro { name: String, words: Vec<ControlWord> },
    Proc(Procedure),
}

fn control_token(token: &str) -> Option<(u32, u32)> {
    use ControlWord as CW;
    let (mask, shift, value) = match token {
        "IPC1" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Advance1 as u32),
        "IPC2" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Advance2 as u32),
        "IPC4" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Advance4 as u32),
        "JMP" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Jump as u32),
        "HLT" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Halt as u32),
        "RTN" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::Return as u32),
        "IPCSIZx" => (CW::IPC_MASK, CW::IPC_SHIFT, IpAction::AdvanceSize as u32),
        "LIR" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Ir as u32),
        "LOP" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Op as u32),
        "LRA" => (CW::DST_MASK, CW::DST_SHIFT, Destination::RegA as u32),
        "LRB" => (CW::DST_MASK, CW::DST_SHIFT, Destination::RegB as u32),
        "LSP" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Sp as u32),
        "LTA" => (CW::DST_MASK, CW::DST_SHIFT, Destination::TmpA as u32),
        "LTB" => (CW::DST_MASK, CW::DST_SHIFT, Destination::TmpB as u32),
        "LMEM" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Mem as u32),
        "LIEN" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Ien as u32),
        "LFL" => (CW::DST_MASK, CW::DST_SHIFT, Destination::Flags as u32),
        "ORA" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::RegA as u32),
        "ORB" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::RegB as u32),
        "OTA" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::TmpA as u32),
        "OTB" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::TmpB as u32),
        "OSP" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::Sp as u32),
        "OIEN" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::Ien as u32),
        "OMEM" => (CW::SRCA_MASK, CW::SRCA_SHIFT, BusASource::Mem as u32),
        "BRB" => (CW::SRCB_MASK, CW::SRCB_SHIFT, BusBSource::RegB as u32),
        "BTB" => (CW::SRCB_MASK, CW::SRCB_SHIFT, BusBSource::TmpB as u32),
        "B1" => (CW::SRCB_MASK, CW::SRCB_SHIFT, BusBSource::One as u32),
        "B2" => (CW::SRCB_MASK, CW::SRCB_SHIFT, BusBSource::Two as u32),
        "ADD" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Add as u32),
        "SUB" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Sub as u32),
        "OR" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Or as u32),
        "XOR" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Xor as u32),
        "AND" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::And as u32),
        "SHL" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Shl as u32),
        "SHR" => (CW::ALU_MASK, CW::ALU_SHIFT, AluOp::Shr as u32),
        "BYTE" => (CW::WIDTH_MASK, CW::WIDTH_SHIFT, Width::Byte as u32),
        "WORD" => (CW::WIDTH_MASK, CW::WIDTH_SHIFT, Width::Word as u32),
        "ORBYTE" => (CW::WIDTH_MASK, CW::WIDTH_SHIFT, Width::OrByte as u32),
        "ORWORD" => (CW::WIDTH_MASK, CW::WIDTH_SHIFT, Width::OrWord as u32),
        "SIZx" => (CW::WIDTH_MASK, CW::WIDTH_SHIFT, Width::Size as u32),
        "SEGCS" => (CW::SEG_MASK, CW::SEG_SHIFT, Segment::Code as u32),
        "SEGSS" => (CW::SEG_MASK, CW::SEG_SHIFT, Segment::Stack as u32),
        "SEGINT" => (CW::SEG_MASK, CW::SEG_SHIFT, Segment::Int as u32),
        "ATMP" => (CW::ADDR_MASK, CW::ADDR_SHIFT, 1),
        "JZF" => (CW::COND_MASK, CW::COND_SHIFT, Condition::Zero as u32),
        "JCF" => (CW::COND_MASK, CW::COND_SHIFT, Condition::Carry as u32),
        "JSF" => (CW::COND_MASK, CW::COND_SHIFT, Condition::Sign as u32),
        _ => return None,
    };
    Some((mask, value << shift))
}

fn parse_number(token: &str, line: usize) -> Result<u16, CompileError> {
    let parsed = if let Some(hex) = token.strip_prefix("0x") {
        u16::from_str_radix(hex, 16)
    } else {
        token.parse()
    };
    parsed.map_err(|_| at(line, ErrorKind::BadNumber(token.to_owned())))
}

/// One control-word line: merge every token into the word and pick up an
/// optional `@label` step target.
fn parse_control_word(
    tokens: &[&str],
    line: usize,
) -> Result<(ControlWord, Option<String>), CompileError> {
    let mut word = ControlWord::empty();
    let mut target = None;
    for token in tokens {
        if let Some(label) = token.strip_prefix('@') {
            if target.is_some() {
                return Err(at(line, ErrorKind::DuplicateTarget));
            }
            target = Some(label.to_owned());
            continue;
        }
        let (mask, bits) = control_token(token)
            .ok_or_else(|| at(line, ErrorKind::UnknownToken((*token).to_owned())))?;
        word = word
            .merge(mask, bits)
            .ok_or_else(|| at(line, ErrorKind::FieldConflict((*token).to_owned())))?;
    }
    match (&target, word.condition()) {
        (Some(_), Condition::None) => Err(at(line, ErrorKind::TargetWithoutCondition)),
        (None, c) if c != Condition::None => Err(at(line, ErrorKind::ConditionWithoutTarget)),
        _ => Ok((word, target)),
    }
}

fn push_word(p: &mut Procedure, word: ControlWord, line: usize) -> Result<(), CompileError> {
    if p.words.len() >= MAX_STEPS {
        return Err(at(line, ErrorKind::TooManySteps));
    }
    if word.has_size_placeholder() && !p.generic() {
        return Err(at(line, ErrorKind::StrayPlaceholder));
    }
    p.words.push(word);
    Ok(())
}

fn specialize(p: &Procedure, width: Width) -> Procedure {
    let mut q = p.clone();
    q.op1 = p.op1.sized(width);
    q.op2 = p.op2.sized(width);
    for word in &mut q.words {
        if word.width() == Some(Width::Size) {
            *word = word.with_field(
                ControlWord::WIDTH_MASK,
                (width as u32) << ControlWord::WIDTH_SHIFT,
            );
        }
        if word.ip_action() == IpAction::AdvanceSize {
            let advance = match width {
                Width::Byte => IpAction::Advance1,
                _ => IpAction::Advance2,
            };
            *word = word.with_field(
                ControlWord::IPC_MASK,
                (advance as u32) << ControlWord::IPC_SHIFT,
            );
        }
    }
    q
}

/// Resolve forward step targets, then split a generic procedure into its
/// byte and word variants. Specialization is a pure rewrite: the same
/// body always yields the same two variants.
fn finish_procedure(mut p: Procedure, out: &mut Vec<Procedure>) -> Result<(), CompileError> {
    for fixup in std::mem::take(&mut p.fixups) {
        let step = *p
            .labels
            .get(&fixup.label)
            .ok_or_else(|| at(fixup.line, ErrorKind::UnknownLabel(fixup.label.clone())))?;
        // a label on the closing END would aim one past the sequence
        if step as usize >= p.words.len() {
            return Err(at(fixup.line, ErrorKind::TargetPastEnd(fixup.label)));
        }
        p.words[fixup.word] = p.words[fixup.word].with_cond_target(step);
    }
    if p.generic() {
        out.push(specialize(&p, Width::Byte));
        out.push(specialize(&p, Width::Word));
    } else {
        out.push(p);
    }
    Ok(())
}

fn malformed(line: usize, what: &str) -> CompileError {
    at(line, ErrorKind::MalformedDeclaration(what.to_owned()))
}

fn parse_opcode_header(tokens: &[&str], line: usize) -> Result<Procedure, CompileError> {
    let operand_count = match tokens[0] {
        "0" => 0,
        "1" => 1,
        "2" => 2,
        other => return Err(malformed(line, &format!("operand count '{}'", other))),
    };
    if tokens.len() < 3 {
        return Err(malformed(line, "expected index and name"));
    }
    let index = parse_number(tokens[1], line)?;
    if index > OPCODE_INDEX_MAX as u16 {
        return Err(malformed(line, "opcode index out of range"));
    }
    let mut p = Procedure {
        name: tokens[2].to_ascii_uppercase(),
        index: index as u8,
        operand_count,
        op1: OperandShape::Absent,
        op2: OperandShape::Absent,
        swapped: false,
        wildcard: false,
        flags: Flags::empty(),
        words: Vec::new(),
        labels: BTreeMap::new(),
        fixups: Vec::new(),
        decl_line: line,
    };
    let rest = &tokens[3..];
    match operand_count {
        0 => {
            if !rest.is_empty() {
                return Err(malformed(line, "no operands expected"));
            }
        }
        1 => {
            let first = rest
                .first()
                .ok_or_else(|| malformed(line, "expected an operand type"))?;
            p.op1 = OperandShape::parse(first)
                .ok_or_else(|| at(line, ErrorKind::UnknownOperandType((*first).to_owned())))?;
            for token in &rest[1..] {
                match *token {
                    "+ZF" => p.flags |= Flags::ZERO,
                    "+CF" => p.flags |= Flags::CARRY,
                    "+SF" => p.flags |= Flags::SIGN,
                    "*" => p.wildcard = true,
                    other => return Err(malformed(line, &format!("unexpected token '{}'", other))),
                }
            }
            if p.wildcard && !p.flags.is_empty() {
                return Err(malformed(line, "flag bits and '*' are mutually exclusive"));
            }
        }
        _ => {
            let rest = match rest.first() {
                Some(&"AB") => &rest[1..],
                Some(&"BA") => {
                    p.swapped = true;
                    &rest[1..]
                }
                _ => rest,
            };
            if rest.len() != 2 {
                return Err(malformed(line, "expected two operand types"));
            }
            p.op1 = OperandShape::parse(rest[0])
                .ok_or_else(|| at(line, ErrorKind::UnknownOperandType(rest[0].to_owned())))?;
            p.op2 = OperandShape::parse(rest[1])
                .ok_or_else(|| at(line, ErrorKind::UnknownOperandType(rest[1].to_owned())))?;
        }
    }
    Ok(p)
}

#[derive(Clone, Copy)]
struct Claim {
    procedure: usize,
    wildcard: bool,
}

/// Assign every concrete variant its ROM addresses and serialize the
/// 0x10000-word image plus the merged opcode metadata.
///
/// Claims happen in declaration order: an explicit flag-combination
/// declaration owns exactly one address and collides with anything
/// already there, a wildcard later on; a wildcard claims whatever of
/// its eight combinations is still free, skipping slots an earlier
/// explicit declaration took. Flag variants therefore must precede
/// their wildcard fallthrough.
fn build_rom(
    procedures: Vec<Procedure>,
    macros: &BTreeMap<String, Vec<ControlWord>>,
    revision: u16,
) -> Result<MicrocodeRom, CompileError> {
    let illegal = macros
        .get("ILLEGAL")
        .ok_or_else(|| at(0, ErrorKind::MissingIllegal))?;
    if illegal.len() > MAX_STEPS {
        return Err(at(0, ErrorKind::TooManySteps));
    }

    let mut claims: Vec<Option<Claim>> = vec![None; ROM_SLOTS / MAX_STEPS];
    for (pi, p) in procedures.iter().enumerate() {
        if p.operand_count == 1 && p.wildcard {
            for combo in 0..8u8 {
                let addr = p.base_address(Flags::from_bits_truncate(combo));
                let slot = (addr as usize) / MAX_STEPS;
                match claims[slot] {
                    Some(c) if c.wildcard => {
                        return Err(at(p.decl_line, ErrorKind::WildcardOverlap(addr)));
                    }
                    // an earlier flag-combination declaration took this one
                    Some(_) => {}
                    None => {
                        claims[slot] = Some(Claim {
                            procedure: pi,
                            wildcard: true,
                        });
                    }
                }
            }
        } else {
            let addr = p.base_address(p.flags);
            let slot = (addr as usize) / MAX_STEPS;
            if claims[slot].is_some() {
                return Err(at(p.decl_line, ErrorKind::OpcodeCollision(addr)));
            }
            claims[slot] = Some(Claim {
                procedure: pi,
                wildcard: false,
            });
        }
    }

    let mut control_words = vec![ControlWord::empty(); ROM_SLOTS];
    for (slot, claim) in claims.iter().enumerate() {
        let sequence = match claim {
            Some(c) => &procedures[c.procedure].words,
            None => illegal,
        };
        let base = slot * MAX_STEPS;
        control_words[base..base + sequence.len()].copy_from_slice(sequence);
    }

    let mut opcodes: BTreeMap<String, Opcode> = BTreeMap::new();
    for p in &procedures {
        let entry = opcodes.entry(p.name.clone()).or_insert_with(|| Opcode {
            name: p.name.clone(),
            index: p.index,
            operand_count: p.operand_count,
            combinations: Vec::new(),
        });
        if entry.index != p.index || entry.operand_count != p.operand_count {
            return Err(at(p.decl_line, ErrorKind::InconsistentOpcode(p.name.clone())));
        }
        let combination = OperandCombination {
            op1: p.op1.concrete(),
            op2: p.op2.concrete(),
            swapped: p.swapped,
        };
        if !entry.combinations.contains(&combination) {
            entry.combinations.push(combination);
        }
    }

    debug!(
        "compiled {} variants into {} opcodes, revision {}",
        procedures.len(),
        opcodes.len(),
        revision
    );

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    Ok(MicrocodeRom {
        revision,
        timestamp,
        control_words,
        opcodes,
    })
}

pub fn compile(source: &str) -> Result<MicrocodeRom, CompileError> {
    let mut macros: BTreeMap<String, Vec<ControlWord>> = BTreeMap::new();
    let mut procedures: Vec<Procedure> = Vec::new();
    let mut revision: Option<u16> = None;
    let mut body: Option<Body> = None;
    let mut last_line = 0;

    for (i, raw) in source.lines().enumerate() {
        let line = i + 1;
        last_line = line;
        let text = raw.split(';').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = text.split_whitespace().collect();

        match body.take() {
            None => {
                if tokens[0] == "END" {
                    return Err(at(line, ErrorKind::UnexpectedEnd));
                } else if tokens[0] == "revision" {
                    if tokens.len() != 2 {
                        return Err(malformed(line, "expected a revision number"));
                    }
                    if revision.is_some() {
                        return Err(at(line, ErrorKind::DuplicateRevision));
                    }
                    revision = Some(parse_number(tokens[1], line)?);
                } else if let Some(stripped) = tokens[0].strip_prefix('#') {
                    let name = match (stripped.is_empty(), tokens.len()) {
                        (false, 1) => stripped,
                        (true, 2) => tokens[1],
                        _ => return Err(malformed(line, "expected a macro name")),
                    };
                    if macros.contains_key(name) {
                        return Err(at(line, ErrorKind::DuplicateMacro(name.to_owned())));
                    }
                    body = Some(Body::Macro {
                        name: name.to_owned(),
                        words: Vec::new(),
                    });
                } else {
                    body = Some(Body::Proc(parse_opcode_header(&tokens, line)?));
                }
            }
            Some(Body::Macro { name, mut words }) => {
                if tokens == ["END"] {
                    macros.insert(name, words);
                } else if tokens.len() == 1 && tokens[0].ends_with(':') {
                    return Err(at(line, ErrorKind::LabelInMacro));
                } else if tokens.len() == 1 && macros.contains_key(tokens[0]) {
                    words.extend_from_slice(&macros[tokens[0]]);
                    body = Some(Body::Macro { name, words });
                } else {
                    let (word, target) = parse_control_word(&tokens, line)?;
                    if target.is_some() {
                        return Err(at(line, ErrorKind::LabelInMacro));
                    }
                    words.push(word);
                    body = Some(Body::Macro { name, words });
                }
            }
            Some(Body::Proc(mut p)) => {
                if tokens == ["END"] {
                    finish_procedure(p, &mut procedures)?;
                } else if tokens.len() == 1 && tokens[0].ends_with(':') {
                    let label = tokens[0].trim_end_matches(':');
                    if p.labels.contains_key(label) {
                        return Err(at(line, ErrorKind::DuplicateLabel(label.to_owned())));
                    }
                    p.labels.insert(label.to_owned(), p.words.len() as u8);
                    body = Some(Body::Proc(p));
                } else if tokens.len() == 1 && macros.contains_key(tokens[0]) {
                    for word in macros[tokens[0]].clone() {
                        push_word(&mut p, word, line)?;
                    }
                    body = Some(Body::Proc(p));
                } else {
                    let (word, target) = parse_control_word(&tokens, line)?;
                    let word = match target {
                        Some(label) => match p.labels.get(&label) {
                            Some(&step) => word.with_cond_target(step),
                            None => {
                                p.fixups.push(Fixup {
                                    word: p.words.len(),
                                    label,
                                    line,
                                });
                                word
                            }
                        },
                        None => word,
                    };
                    push_word(&mut p, word, line)?;
                    body = Some(Body::Proc(p));
                }
            }
        }
    }

    if body.is_some() {
        return Err(at(last_line, ErrorKind::UnterminatedBody));
    }

    build_rom(procedures, &macros, revision.unwrap_or(0))
}
