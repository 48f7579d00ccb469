extern crate strum;
#[macro_use]
extern crate strum_macros;

extern crate packed_struct;
extern crate packed_struct_codegen;
use packed_struct::prelude::*;

#[macro_use]
extern crate bitflags;

bitflags! {
    pub struct Flags: u8 {
        const ZERO = 0b001;
        const CARRY = 0b010;
        const SIGN = 0b100;
    }
}

/// Register file slots as addressed by the 4-bit index embedded in
/// instruction and operand words. Index bit 3 is not part of the slot
/// number: together with a byte width it selects the high half of r0-r3.
#[derive(Clone, Copy, Display, Debug, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    Sp = 4,
    Ss = 5,
    Cs = 6,
    Ds = 7,
}

pub const REG_INDEX_MASK: u8 = 0x7;
pub const REG_HIGH_HALF: u8 = 0x8;

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum IpAction {
    None = 0,
    Advance1 = 1,
    Advance2 = 2,
    Advance4 = 3,
    Jump = 4,
    Halt = 5,
    Return = 6,
    // compile-only placeholder, rewritten by operand specialization
    AdvanceSize = 7,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum Destination {
    None = 0,
    Ir = 1,
    Op = 2,
    RegA = 3,
    RegB = 4,
    Sp = 5,
    TmpA = 6,
    TmpB = 7,
    Mem = 8,
    Ien = 9,
    Flags = 10,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum BusASource {
    None = 0,
    RegA = 1,
    RegB = 2,
    TmpA = 3,
    TmpB = 4,
    Sp = 5,
    Ien = 6,
    Mem = 7,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum BusBSource {
    None = 0,
    RegB = 1,
    TmpB = 2,
    One = 3,
    Two = 4,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum AluOp {
    // pass is bus_a | bus_b and never latches flags
    Pass = 0,
    Add = 1,
    Sub = 2,
    Or = 3,
    Xor = 4,
    And = 5,
    Shl = 6,
    Shr = 7,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum Width {
    None = 0,
    Byte = 1,
    Word = 2,
    OrByte = 3,
    OrWord = 4,
    // compile-only placeholder, rewritten by operand specialization
    Size = 5,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum Segment {
    Data = 0,
    Code = 1,
    Stack = 2,
    Int = 3,
}

#[derive(Clone, Copy, Display, Debug, PartialEq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum Condition {
    None = 0,
    Zero = 1,
    Carry = 2,
    Sign = 3,
}

/// One micro-operation: a 32-bit word partitioned into non-overlapping
/// bit-fields. Each field holds at most one selector; 0 is always the
/// inactive default.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlWord(pub u32);

impl ControlWord {
    pub const IPC_MASK: u32 = 0x0000_0007;
    pub const IPC_SHIFT: u32 = 0;
    pub const DST_MASK: u32 = 0x0000_0078;
    pub const DST_SHIFT: u32 = 3;
    pub const SRCA_MASK: u32 = 0x0000_0380;
    pub const SRCA_SHIFT: u32 = 7;
    pub const SRCB_MASK: u32 = 0x0000_1C00;
    pub const SRCB_SHIFT: u32 = 10;
    pub const ALU_MASK: u32 = 0x0000_E000;
    pub const ALU_SHIFT: u32 = 13;
    pub const WIDTH_MASK: u32 = 0x0007_0000;
    pub const WIDTH_SHIFT: u32 = 16;
    pub const SEG_MASK: u32 = 0x0018_0000;
    pub const SEG_SHIFT: u32 = 19;
    pub const ADDR_MASK: u32 = 0x0020_0000;
    pub const ADDR_SHIFT: u32 = 21;
    pub const COND_MASK: u32 = 0x00C0_0000;
    pub const COND_SHIFT: u32 = 22;
    pub const CTGT_MASK: u32 = 0x3F00_0000;
    pub const CTGT_SHIFT: u32 = 24;

    pub const fn empty() -> ControlWord {
        ControlWord(0)
    }

    fn field(self, mask: u32, shift: u32) -> u8 {
        ((self.0 & mask) >> shift) as u8
    }

    /// ORs `bits` into the word; `None` if the covering field already
    /// holds a different value.
    pub fn merge(self, mask: u32, bits: u32) -> Option<ControlWord> {
        debug_assert_eq!(bits & !mask, 0);
        let current = self.0 & mask;
        if current != 0 && current != bits {
            return None;
        }
        Some(ControlWord(self.0 | bits))
    }

    /// Clears the field covered by `mask` and sets it to `bits`.
    pub fn with_field(self, mask: u32, bits: u32) -> ControlWord {
        debug_assert_eq!(bits & !mask, 0);
        ControlWord((self.0 & !mask) | bits)
    }

    pub fn with_cond_target(self, step: u8) -> ControlWord {
        self.with_field(Self::CTGT_MASK, (step as u32) << Self::CTGT_SHIFT)
    }

    pub fn ip_action(self) -> IpAction {
        IpAction::from_primitive(self.field(Self::IPC_MASK, Self::IPC_SHIFT)).unwrap()
    }

    pub fn destination(self) -> Option<Destination> {
        Destination::from_primitive(self.field(Self::DST_MASK, Self::DST_SHIFT))
    }

    pub fn bus_a(self) -> BusASource {
        BusASource::from_primitive(self.field(Self::SRCA_MASK, Self::SRCA_SHIFT)).unwrap()
    }

    pub fn bus_b(self) -> Option<BusBSource> {
        BusBSource::from_primitive(self.field(Self::SRCB_MASK, Self::SRCB_SHIFT))
    }

    pub fn alu_op(self) -> AluOp {
        AluOp::from_primitive(self.field(Self::ALU_MASK, Self::ALU_SHIFT)).unwrap()
    }

    pub fn width(self) -> Option<Width> {
        Width::from_primitive(self.field(Self::WIDTH_MASK, Self::WIDTH_SHIFT))
    }

    pub fn segment(self) -> Segment {
        Segment::from_primitive(self.field(Self::SEG_MASK, Self::SEG_SHIFT)).unwrap()
    }

    pub fn addr_from_temp(self) -> bool {
        self.0 & Self::ADDR_MASK != 0
    }

    pub fn condition(self) -> Condition {
        Condition::from_primitive(self.field(Self::COND_MASK, Self::COND_SHIFT)).unwrap()
    }

    pub fn cond_target(self) -> u8 {
        self.field(Self::CTGT_MASK, Self::CTGT_SHIFT)
    }

    /// True when every field holds a defined selector. Placeholders count
    /// as defined; they are checked separately.
    pub fn decodable(self) -> bool {
        self.destination().is_some() && self.bus_b().is_some() && self.width().is_some()
    }

    /// True when a compile-only size placeholder is still present.
    pub fn has_size_placeholder(self) -> bool {
        self.ip_action() == IpAction::AdvanceSize || self.width() == Some(Width::Size)
    }
}

impl std::fmt::Debug for ControlWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cw:{:08x}", self.0)?;
        write!(f, " ipc:{}", self.ip_action())?;
        match self.destination() {
            Some(d) => write!(f, " dst:{}", d)?,
            None => write!(f, " dst:?")?,
        }
        write!(f, " a:{}", self.bus_a())?;
        match self.bus_b() {
            Some(b) => write!(f, " b:{}", b)?,
            None => write!(f, " b:?")?,
        }
        write!(f, " alu:{}", self.alu_op())?;
        match self.width() {
            Some(w) => write!(f, " w:{}", w)?,
            None => write!(f, " w:?")?,
        }
        write!(f, " seg:{}", self.segment())?;
        if self.addr_from_temp() {
            write!(f, " atmp")?;
        }
        if self.condition() != Condition::None {
            write!(f, " {}@{}", self.condition(), self.cond_target())?;
        }
        Ok(())
    }
}

/// The 3-bit operand-type codes shared by the instruction encoding, the
/// microcode address space and the opcode metadata. Code 7 is reserved;
/// [`NO_OPERAND`] uses it inside metadata combination bytes.
#[derive(Clone, Copy, Display, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum OperandType {
    Reg = 0,
    Imm8 = 1,
    Imm16 = 2,
    ByteMemImm = 3,
    WordMemImm = 4,
    ByteMemReg = 5,
    WordMemReg = 6,
}

pub const NO_OPERAND: u8 = 7;

impl OperandType {
    /// Bytes following the instruction word for this operand. The first
    /// operand keeps its register index (plain or memory base) inside the
    /// instruction word; the second operand spells it out in a byte.
    pub fn trailing_bytes(self, first_operand: bool) -> u16 {
        match self {
            OperandType::Reg => {
                if first_operand {
                    0
                } else {
                    1
                }
            }
            OperandType::Imm8 => 1,
            OperandType::Imm16 => 2,
            OperandType::ByteMemImm | OperandType::WordMemImm => 2,
            OperandType::ByteMemReg | OperandType::WordMemReg => {
                if first_operand {
                    2
                } else {
                    3
                }
            }
        }
    }

    pub fn is_memory(self) -> bool {
        matches!(
            self,
            OperandType::ByteMemImm
                | OperandType::WordMemImm
                | OperandType::ByteMemReg
                | OperandType::WordMemReg
        )
    }

    /// Access width of a memory operand, `None` for the rest.
    pub fn mem_width(self) -> Option<Width> {
        match self {
            OperandType::ByteMemImm | OperandType::ByteMemReg => Some(Width::Byte),
            OperandType::WordMemImm | OperandType::WordMemReg => Some(Width::Word),
            _ => None,
        }
    }
}

/// One legal operand-type pair of an opcode, in encoded order. `swapped`
/// means the assembler takes the pair from source text in reverse order
/// (and the disassembler prints it reversed again).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandCombination {
    pub op1: Option<OperandType>,
    pub op2: Option<OperandType>,
    pub swapped: bool,
}

impl OperandCombination {
    pub fn instruction_bytes(&self) -> u16 {
        let mut sum = 2;
        if let Some(t) = self.op1 {
            sum += t.trailing_bytes(true);
        }
        if let Some(t) = self.op2 {
            sum += t.trailing_bytes(false);
        }
        sum
    }
}

#[derive(Clone, Copy, Debug, PackedStruct)]
#[packed_struct(size_bytes = "1", endian = "lsb", bit_numbering = "lsb0")]
pub struct PackedCombination {
    #[packed_field(bits = "6")]
    pub swapped: bool,
    #[packed_field(bits = "3..=5")]
    pub op1: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "0..=2")]
    pub op2: Integer<u8, packed_bits::Bits<3>>,
}

impl From<&OperandCombination> for PackedCombination {
    fn from(c: &OperandCombination) -> PackedCombination {
        PackedCombination {
            swapped: c.swapped,
            op1: c.op1.map_or(NO_OPERAND, |t| t as u8).into(),
            op2: c.op2.map_or(NO_OPERAND, |t| t as u8).into(),
        }
    }
}

impl PackedCombination {
    pub fn combination(&self) -> OperandCombination {
        OperandCombination {
            op1: OperandType::from_primitive(*self.op1),
            op2: OperandType::from_primitive(*self.op2),
            swapped: self.swapped,
        }
    }
}

/// Assembler-facing metadata for one mnemonic, merged over all of its
/// concrete microcode variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opcode {
    pub name: String,
    pub index: u8,
    pub operand_count: u8,
    pub combinations: Vec<OperandCombination>,
}

pub const OPCODE_INDEX_MAX: u8 = 0x1F;
pub const MAX_STEPS: usize = 16;
pub const ROM_SLOTS: usize = 0x10000;
pub const OPCODE_ADDRESS_MASK: u16 = 0xFFF0;

/// The 16-bit instruction word. Bit 15 flags the one-operand form, bits
/// 10-14 hold the opcode index, bits 7-9 / 4-6 the operand type codes and
/// bits 0-3 the operand-1 register index when one applies. In the
/// one-operand form bits 4-6 are zero on the wire; the engine ORs the
/// current flag bits in when indexing the microcode ROM.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct InstructionWord(pub u16);

impl InstructionWord {
    pub fn new(single_operand: bool, index: u8, t1: u8, t2: u8, reg_index: u8) -> InstructionWord {
        debug_assert!(index <= OPCODE_INDEX_MAX);
        debug_assert!(t1 < 8 && t2 < 8 && reg_index < 16);
        let mut bits = ((index as u16) << 10) | ((t1 as u16) << 7) | ((t2 as u16) << 4);
        bits |= reg_index as u16;
        if single_operand {
            bits |= 0x8000;
        }
        InstructionWord(bits)
    }

    pub fn single_operand(self) -> bool {
        self.0 & 0x8000 != 0
    }

    pub fn opcode_index(self) -> u8 {
        ((self.0 >> 10) & 0x1F) as u8
    }

    pub fn op1_type_code(self) -> u8 {
        ((self.0 >> 7) & 0x7) as u8
    }

    pub fn op2_type_code(self) -> u8 {
        ((self.0 >> 4) & 0x7) as u8
    }

    pub fn reg_index(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Microcode ROM index for this instruction at `step`, with the flag
    /// bits folded into bits 4-6 for the one-operand form.
    pub fn rom_address(self, flags: Flags, step: u8) -> u16 {
        debug_assert!((step as usize) < MAX_STEPS);
        let mut addr = self.0 & OPCODE_ADDRESS_MASK;
        if self.single_operand() {
            addr |= (flags.bits() as u16) << 4;
        }
        addr | step as u16
    }
}

impl std::fmt::Debug for InstructionWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iw:{:04x} idx:{:02x} t1:{} t2:{} r:{:x}",
            self.0,
            self.opcode_index(),
            self.op1_type_code(),
            self.op2_type_code(),
            self.reg_index()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn instruction_word_layout() {
        let iw = InstructionWord::new(false, 0x01, OperandType::Imm16 as u8, OperandType::WordMemImm as u8, 0);
        assert_eq!(0x0540, iw.0);
        assert_eq!(0x01, iw.opcode_index());
        assert_eq!(2, iw.op1_type_code());
        assert_eq!(4, iw.op2_type_code());

        let iw = InstructionWord::new(true, 0x1F, 0, 0, 0xA);
        assert_eq!(0xFC0A, iw.0);
        assert!(iw.single_operand());
        assert_eq!(0xA, iw.reg_index());
    }

    #[test]
    fn rom_address_folds_flags_for_single_operand() {
        let two_op = InstructionWord::new(false, 0x02, 0, 0, 3);
        assert_eq!(0x0805, two_op.rom_address(Flags::all(), 5));

        let one_op = InstructionWord::new(true, 0x0D, OperandType::Imm16 as u8, 0, 0);
        let addr = one_op.rom_address(Flags::CARRY | Flags::ZERO, 2);
        assert_eq!(0x8000 | (0x0D << 10) | (2 << 7) | (0b011 << 4) | 2, addr);
    }

    #[test]
    fn control_word_fields_do_not_overlap() {
        let masks = [
            ControlWord::IPC_MASK,
            ControlWord::DST_MASK,
            ControlWord::SRCA_MASK,
            ControlWord::SRCB_MASK,
            ControlWord::ALU_MASK,
            ControlWord::WIDTH_MASK,
            ControlWord::SEG_MASK,
            ControlWord::ADDR_MASK,
            ControlWord::COND_MASK,
            ControlWord::CTGT_MASK,
        ];
        let mut seen = 0u32;
        for mask in masks {
            assert_eq!(0, seen & mask);
            seen |= mask;
        }
    }

    #[test]
    fn control_word_merge_rejects_field_conflicts() {
        let add = (AluOp::Add as u32) << ControlWord::ALU_SHIFT;
        let sub = (AluOp::Sub as u32) << ControlWord::ALU_SHIFT;
        let w = ControlWord::empty().merge(ControlWord::ALU_MASK, add).unwrap();
        assert_eq!(None, w.merge(ControlWord::ALU_MASK, sub));
        // merging the identical value is not a conflict
        assert_eq!(Some(w), w.merge(ControlWord::ALU_MASK, add));
        assert_eq!(AluOp::Add, w.alu_op());
    }

    #[test]
    fn control_word_round_trips_every_selector() {
        for ipc in IpAction::iter() {
            let w = ControlWord::empty()
                .with_field(ControlWord::IPC_MASK, (ipc as u32) << ControlWord::IPC_SHIFT);
            assert_eq!(ipc, w.ip_action());
        }
        for dst in Destination::iter() {
            let w = ControlWord::empty()
                .with_field(ControlWord::DST_MASK, (dst as u32) << ControlWord::DST_SHIFT);
            assert_eq!(Some(dst), w.destination());
        }
        for cond in Condition::iter() {
            let w = ControlWord::empty()
                .with_field(ControlWord::COND_MASK, (cond as u32) << ControlWord::COND_SHIFT)
                .with_cond_target(13);
            assert_eq!(cond, w.condition());
            assert_eq!(13, w.cond_target());
        }
    }

    #[test]
    fn register_names_parse_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(Ok(Register::Sp), <Register as FromStr>::from_str("SP"));
        assert_eq!(Ok(Register::R2), <Register as FromStr>::from_str("r2"));
        assert_eq!("ds", format!("{}", Register::Ds));
        assert!(<Register as FromStr>::from_str("r9").is_err());
    }

    #[test]
    fn packed_combination_byte() {
        let c = OperandCombination {
            op1: Some(OperandType::Imm16),
            op2: Some(OperandType::WordMemImm),
            swapped: true,
        };
        let packed = PackedCombination::from(&c);
        let byte = packed.pack().unwrap()[0];
        assert_eq!(0b0101_0100, byte);
        let back = PackedCombination::unpack(&[byte]).unwrap();
        assert_eq!(c, back.combination());
    }

    #[test]
    fn no_operand_code_is_not_a_type() {
        assert_eq!(None, OperandType::from_primitive(NO_OPERAND));
        for t in OperandType::iter() {
            assert!((t as u8) < NO_OPERAND);
        }
    }
}
