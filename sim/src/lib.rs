use std::fmt;

use common::*;
use log::trace;
use ucode::MicrocodeRom;

/// Byte-addressed memory as the engine sees it: a segment value and a
/// 16-bit offset. Word access is little-endian and defaults to two byte
/// accesses.
pub trait Bus {
    fn read_byte(&mut self, segment: u16, offset: u16) -> u8;
    fn write_byte(&mut self, segment: u16, offset: u16, value: u8);

    fn read_word(&mut self, segment: u16, offset: u16) -> u16 {
        let lo = self.read_byte(segment, offset) as u16;
        let hi = self.read_byte(segment, offset.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    fn write_word(&mut self, segment: u16, offset: u16, value: u16) {
        self.write_byte(segment, offset, value as u8);
        self.write_byte(segment, offset.wrapping_add(1), (value >> 8) as u8);
    }
}

pub const RAM_BYTES: usize = 1 << 20;

/// Flat RAM with the usual 20-bit segmented decode: (segment << 4) + offset.
pub struct Ram {
    pub bytes: Vec<u8>,
}

impl Ram {
    pub fn new() -> Ram {
        Ram {
            bytes: vec![0u8; RAM_BYTES],
        }
    }

    fn linear(segment: u16, offset: u16) -> usize {
        (((segment as usize) << 4) + offset as usize) & (RAM_BYTES - 1)
    }

    pub fn load(&mut self, segment: u16, offset: u16, image: &[u8]) {
        for (i, byte) in image.iter().enumerate() {
            self.bytes[Self::linear(segment, offset.wrapping_add(i as u16))] = *byte;
        }
    }
}

impl Default for Ram {
    fn default() -> Ram {
        Ram::new()
    }
}

impl Bus for Ram {
    fn read_byte(&mut self, segment: u16, offset: u16) -> u8 {
        self.bytes[Self::linear(segment, offset)]
    }

    fn write_byte(&mut self, segment: u16, offset: u16, value: u8) {
        self.bytes[Self::linear(segment, offset)] = value;
    }
}

fn alu(op: AluOp, a: u16, b: u16) -> (u16, Flags) {
    let (result, carry) = match op {
        AluOp::Pass => (a | b, false),
        AluOp::Add => {
            let wide = a as u32 + b as u32;
            (wide as u16, wide > 0xFFFF)
        }
        AluOp::Sub => (a.wrapping_sub(b), a < b),
        AluOp::Or => (a | b, false),
        AluOp::Xor => (a ^ b, false),
        AluOp::And => (a & b, false),
        AluOp::Shl => {
            let shift = b & 0xF;
            if shift == 0 {
                (a, false)
            } else {
                (a << shift, (a >> (16 - shift)) & 1 != 0)
            }
        }
        AluOp::Shr => {
            let shift = b & 0xF;
            if shift == 0 {
                (a, false)
            } else {
                (a >> shift, (a >> (shift - 1)) & 1 != 0)
            }
        }
    };
    let mut flags = Flags::empty();
    if result == 0 {
        flags |= Flags::ZERO;
    }
    if carry {
        flags |= Flags::CARRY;
    }
    if result & 0x8000 != 0 {
        flags |= Flags::SIGN;
    }
    (result, flags)
}

/// The cycle-stepping engine. All state is public so that harnesses can
/// poke registers directly.
pub struct Cpu<'a> {
    rom: &'a MicrocodeRom,
    pub regs: [u16; 8],
    pub ip: u16,
    pub ir: InstructionWord,
    pub op: u16,
    pub tmp_a: u16,
    pub tmp_b: u16,
    pub ien: bool,
    pub flags: Flags,
    pub step: u8,
    pub halted: bool,
}

impl<'a> Cpu<'a> {
    pub fn new(rom: &'a MicrocodeRom) -> Cpu<'a> {
        Cpu {
            rom,
            regs: [0; 8],
            ip: 0,
            ir: InstructionWord::default(),
            op: 0,
            tmp_a: 0,
            tmp_b: 0,
            ien: false,
            flags: Flags::empty(),
            step: 0,
            halted: false,
        }
    }

    pub fn reset(&mut self) {
        let rom = self.rom;
        *self = Cpu::new(rom);
    }

    pub fn register(&self, r: Register) -> u16 {
        self.regs[r as usize]
    }

    pub fn set_register(&mut self, r: Register, value: u16) {
        self.regs[r as usize] = value;
    }

    fn read_reg(&self, index: u8, width: Width) -> u16 {
        let value = self.regs[(index & REG_INDEX_MASK) as usize];
        match width {
            Width::Byte | Width::OrByte => {
                if index & REG_HIGH_HALF != 0 {
                    value >> 8
                } else {
                    value & 0xFF
                }
            }
            _ => value,
        }
    }

    fn write_reg(&mut self, index: u8, width: Width, data: u16) {
        let slot = (index & REG_INDEX_MASK) as usize;
        let high = index & REG_HIGH_HALF != 0;
        let value = self.regs[slot];
        self.regs[slot] = match width {
            Width::Byte => {
                if high {
                    (value & 0x00FF) | (data << 8)
                } else {
                    (value & 0xFF00) | (data & 0xFF)
                }
            }
            Width::OrByte => {
                if high {
                    value | ((data & 0xFF) << 8)
                } else {
                    value | (data & 0xFF)
                }
            }
            Width::OrWord => value | data,
            _ => data,
        };
    }

    /// Execute one control word. Returns false once halted.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> bool {
        if self.halted {
            return false;
        }
        let addr = self.ir.rom_address(self.flags, self.step);
        let word = self.rom.fetch(addr);
        trace!("0x{:04x} {:?} {:?} {:?}", addr, self.ir, word, self);
        self.step = ((self.step as usize + 1) % MAX_STEPS) as u8;

        // a return spends the whole tick resetting the step counter
        if word.ip_action() == IpAction::Return {
            self.step = 0;
            return true;
        }

        let width = match word.width() {
            Some(Width::None) => Width::Word,
            Some(Width::Size) | None => panic!("bad width at rom address 0x{:04x}", addr),
            Some(w) => w,
        };
        let byte_access = matches!(width, Width::Byte | Width::OrByte);

        let segment = match word.segment() {
            Segment::Data => self.regs[Register::Ds as usize],
            Segment::Code => self.regs[Register::Cs as usize],
            Segment::Stack => self.regs[Register::Ss as usize],
            // interrupt vectors sit at the bottom of physical memory
            Segment::Int => 0,
        };
        let offset = if word.addr_from_temp() {
            self.tmp_a
        } else {
            self.ip
        };

        let reg_b_index = (self.op & 0xF) as u8;
        let bus_a = match word.bus_a() {
            BusASource::None => 0,
            BusASource::RegA => self.read_reg(self.ir.reg_index(), width),
            BusASource::RegB => self.read_reg(reg_b_index, width),
            BusASource::TmpA => self.tmp_a,
            BusASource::TmpB => self.tmp_b,
            BusASource::Sp => self.regs[Register::Sp as usize],
            BusASource::Ien => self.ien as u16,
            BusASource::Mem => {
                if byte_access {
                    bus.read_byte(segment, offset) as u16
                } else {
                    bus.read_word(segment, offset)
                }
            }
        };
        let bus_b = match word.bus_b() {
            Some(BusBSource::None) => 0,
            Some(BusBSource::RegB) => self.read_reg(reg_b_index, width),
            Some(BusBSource::TmpB) => self.tmp_b,
            Some(BusBSource::One) => 1,
            Some(BusBSource::Two) => 2,
            None => panic!("bad bus b at rom address 0x{:04x}", addr),
        };

        let (data, alu_flags) = alu(word.alu_op(), bus_a, bus_b);

        let destination = match word.destination() {
            Some(d) => d,
            None => panic!("bad destination at rom address 0x{:04x}", addr),
        };
        match destination {
            Destination::None => {}
            Destination::Ir => self.ir = InstructionWord(data),
            Destination::Op => self.op = data,
            Destination::RegA => self.write_reg(self.ir.reg_index(), width, data),
            Destination::RegB => self.write_reg(reg_b_index, width, data),
            Destination::Sp => self.regs[Register::Sp as usize] = data,
            Destination::TmpA => self.tmp_a = data,
            Destination::TmpB => self.tmp_b = data,
            Destination::Mem => match width {
                Width::Byte => bus.write_byte(segment, offset, data as u8),
                Width::OrByte => {
                    let current = bus.read_byte(segment, offset);
                    bus.write_byte(segment, offset, current | data as u8);
                }
                Width::OrWord => {
                    let current = bus.read_word(segment, offset);
                    bus.write_word(segment, offset, current | data);
                }
                _ => bus.write_word(segment, offset, data),
            },
            Destination::Ien => self.ien = data & 1 != 0,
            Destination::Flags => self.flags = alu_flags,
        }

        match word.ip_action() {
            IpAction::None | IpAction::Return => {}
            IpAction::Advance1 => self.ip = self.ip.wrapping_add(1),
            IpAction::Advance2 => self.ip = self.ip.wrapping_add(2),
            IpAction::Advance4 => self.ip = self.ip.wrapping_add(4),
            IpAction::Jump => self.ip = data,
            IpAction::Halt => {
                self.halted = true;
                return false;
            }
            IpAction::AdvanceSize => panic!("size placeholder at rom address 0x{:04x}", addr),
        }

        // conditions see the flags as latched this very tick
        let taken = match word.condition() {
            Condition::None => false,
            Condition::Zero => self.flags.contains(Flags::ZERO),
            Condition::Carry => self.flags.contains(Flags::CARRY),
            Condition::Sign => self.flags.contains(Flags::SIGN),
        };
        if taken {
            self.step = word.cond_target();
        }
        true
    }

    /// Ticks until halt or `max_ticks`, whichever comes first. Returns
    /// the number of ticks spent.
    pub fn run<B: Bus>(&mut self, bus: &mut B, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while !self.halted && ticks < max_ticks {
            self.step(bus);
            ticks += 1;
        }
        ticks
    }
}

impl fmt::Debug for Cpu<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ip:{:04x} r0:{:04x} r1:{:04x} r2:{:04x} r3:{:04x} sp:{:04x} ss:{:04x} cs:{:04x} ds:{:04x}",
            self.ip,
            self.regs[0],
            self.regs[1],
            self.regs[2],
            self.regs[3],
            self.regs[4],
            self.regs[5],
            self.regs[6],
            self.regs[7]
        )?;
        write!(
            f,
            " ta:{:04x} tb:{:04x} op:{:04x} fl:{:03b} step:{:x}",
            self.tmp_a,
            self.tmp_b,
            self.op,
            self.flags.bits(),
            self.step
        )?;
        if self.ien {
            write!(f, " ien")?;
        }
        if self.halted {
            write!(f, " halted")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OperandType as T;

    fn iw(single: bool, index: u8, t1: u8, t2: u8, reg: u8) -> Vec<u8> {
        InstructionWord::new(single, index, t1, t2, reg)
            .0
            .to_le_bytes()
            .to_vec()
    }

    fn boot(program: &[u8]) -> (Cpu<'static>, Ram) {
        let mut ram = Ram::new();
        ram.load(0, 0, program);
        (Cpu::new(&ucode::ROM), ram)
    }

    const HLT: u8 = 0x1F;

    fn hlt() -> Vec<u8> {
        iw(false, HLT, 0, 0, 0)
    }

    #[test]
    fn mov_imm_then_reg_to_reg() {
        let mut program = Vec::new();
        // mov r0, 0x1234
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0x34, 0x12]);
        // mov r1, r0
        program.extend(iw(false, 0x01, T::Reg as u8, T::Reg as u8, 1));
        program.push(0x00);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert!(cpu.halted);
        assert_eq!(0x1234, cpu.register(Register::R0));
        assert_eq!(0x1234, cpu.register(Register::R1));
        assert_eq!(Flags::empty(), cpu.flags);
    }

    #[test]
    fn byte_immediate_zero_extends() {
        let mut program = Vec::new();
        // mov r0, 0x56 picks the byte form but replaces the whole register
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x56);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.set_register(Register::R0, 0xABCD);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x0056, cpu.register(Register::R0));
    }

    #[test]
    fn byte_memory_load_writes_one_register_half() {
        let mut program = Vec::new();
        // mov low half of r2 from byte [0x80]
        program.extend(iw(false, 0x01, T::Reg as u8, T::ByteMemImm as u8, 2));
        program.extend([0x80, 0x00]);
        // mov high half of r3 from byte [0x80]
        program.extend(iw(
            false,
            0x01,
            T::Reg as u8,
            T::ByteMemImm as u8,
            3 | REG_HIGH_HALF,
        ));
        program.extend([0x80, 0x00]);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        ram.load(0, 0x80, &[0x5A]);
        cpu.set_register(Register::R2, 0x1234);
        cpu.set_register(Register::R3, 0x1234);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x125A, cpu.register(Register::R2));
        assert_eq!(0x5A34, cpu.register(Register::R3));
    }

    #[test]
    fn word_store_and_load_through_absolute_address() {
        let mut program = Vec::new();
        // mov [0x80], 0x1234 (immediate store encodes the value first)
        program.extend(iw(false, 0x01, T::Imm16 as u8, T::WordMemImm as u8, 0));
        program.extend([0x34, 0x12]);
        program.extend([0x80, 0x00]);
        // mov r1, [0x80]
        program.extend(iw(false, 0x01, T::Reg as u8, T::WordMemImm as u8, 1));
        program.extend([0x80, 0x00]);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.set_register(Register::Ds, 0x100);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x1234, cpu.register(Register::R1));
        // ds:0x80 decodes to linear 0x1080
        assert_eq!(0x34, ram.bytes[0x1080]);
        assert_eq!(0x12, ram.bytes[0x1081]);
    }

    #[test]
    fn register_base_plus_displacement() {
        let mut program = Vec::new();
        // mov r0, 0x80
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x80);
        // mov [r0+2], r3
        program.extend(iw(false, 0x01, T::WordMemReg as u8, T::Reg as u8, 0));
        program.extend([0x02, 0x00, 0x03]);
        // mov r1, [r0+2]
        program.extend(iw(false, 0x01, T::Reg as u8, T::WordMemReg as u8, 1));
        program.extend([0x00, 0x02, 0x00]);
        // mov r2, [r0-2] wraps the displacement
        program.extend(iw(false, 0x01, T::Reg as u8, T::WordMemReg as u8, 2));
        program.extend([0x00, 0xFE, 0xFF]);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        ram.load(0, 0x7E, &[0xEF, 0xBE]);
        cpu.set_register(Register::R3, 0xCAFE);
        cpu.run(&mut ram, 1000);
        assert_eq!(0xCAFE, cpu.register(Register::R1));
        assert_eq!(0xBEEF, cpu.register(Register::R2));
        assert_eq!(0xFE, ram.bytes[0x82]);
        assert_eq!(0xCA, ram.bytes[0x83]);
    }

    #[test]
    fn add_latches_all_three_flags() {
        let mut program = Vec::new();
        // mov r0, 0xFFFF
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0xFF, 0xFF]);
        // add r0, 1
        program.extend(iw(false, 0x02, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x01);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(0, cpu.register(Register::R0));
        assert_eq!(Flags::ZERO | Flags::CARRY, cpu.flags);
    }

    #[test]
    fn sub_borrow_sets_carry_and_sign() {
        let mut program = Vec::new();
        // mov r0, 0
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x00);
        // sub r0, 1
        program.extend(iw(false, 0x03, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x01);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(0xFFFF, cpu.register(Register::R0));
        assert_eq!(Flags::CARRY | Flags::SIGN, cpu.flags);
    }

    #[test]
    fn cmp_leaves_operands_alone() {
        let mut program = Vec::new();
        // mov r0, 5
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x05);
        // cmp r0, 5
        program.extend(iw(false, 0x09, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x05);
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(5, cpu.register(Register::R0));
        assert_eq!(Flags::ZERO, cpu.flags);
    }

    #[test]
    fn jz_takes_and_jnz_falls_through_on_zero() {
        let mut program = Vec::new();
        // cmp r0, r0 sets zf
        program.extend(iw(false, 0x09, T::Reg as u8, T::Reg as u8, 0));
        program.push(0x00);
        // 0x0003: jz 0x000a
        program.extend(iw(true, 0x0B, T::Imm16 as u8, 0, 0));
        program.extend([0x0A, 0x00]);
        // 0x0007: mov r1, 0x11 (skipped)
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 1));
        program.push(0x11);
        // 0x000a: jnz 0x0011 (not taken, zf still set)
        program.extend(iw(true, 0x0C, T::Imm16 as u8, 0, 0));
        program.extend([0x11, 0x00]);
        // 0x000e: mov r2, 0x22
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 2));
        program.push(0x22);
        // 0x0011: hlt
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert!(cpu.halted);
        assert_eq!(0, cpu.register(Register::R1));
        assert_eq!(0x22, cpu.register(Register::R2));
    }

    #[test]
    fn carry_conditional_jumps_use_flag_slots() {
        let mut program = Vec::new();
        // mov r0, 0 / sub r0, 1 sets cf
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x00);
        program.extend(iw(false, 0x03, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x01);
        // 0x0006: jc 0x000d
        program.extend(iw(true, 0x0D, T::Imm16 as u8, 0, 0));
        program.extend([0x0D, 0x00]);
        // 0x000a: mov r1, 0x11 (skipped)
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 1));
        program.push(0x11);
        // 0x000d: jnc 0x0014 (not taken)
        program.extend(iw(true, 0x0E, T::Imm16 as u8, 0, 0));
        program.extend([0x14, 0x00]);
        // 0x0011: mov r2, 0x22
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 2));
        program.push(0x22);
        // 0x0014: hlt
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(0, cpu.register(Register::R1));
        assert_eq!(0x22, cpu.register(Register::R2));
    }

    #[test]
    fn push_pop_round_trip_preserves_flags() {
        let mut program = Vec::new();
        // mov sp, 0x0100
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, Register::Sp as u8));
        program.extend([0x00, 0x01]);
        // mov r0, 0x1234
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0x34, 0x12]);
        // cmp r0, r0 sets zf before the stack traffic
        program.extend(iw(false, 0x09, T::Reg as u8, T::Reg as u8, 0));
        program.push(0x00);
        // push r0
        program.extend(iw(true, 0x10, T::Reg as u8, 0, 0));
        // mov r0, 0
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x00);
        // pop r1
        program.extend(iw(true, 0x11, T::Reg as u8, 0, 1));
        program.extend(hlt());

        let (mut cpu, mut ram) = boot(&program);
        cpu.set_register(Register::Ss, 0x200);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x1234, cpu.register(Register::R1));
        assert_eq!(0x0100, cpu.register(Register::Sp));
        // pushed at ss:0x00fe, linear 0x20fe
        assert_eq!(0x34, ram.bytes[0x20FE]);
        assert_eq!(0x12, ram.bytes[0x20FF]);
        assert_eq!(Flags::ZERO, cpu.flags);
    }

    #[test]
    fn sti_and_cli_toggle_the_interrupt_latch() {
        let mut program = Vec::new();
        program.extend(iw(false, 0x12, 0, 0, 0));
        program.extend(hlt());
        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert!(cpu.ien);

        let mut program = Vec::new();
        program.extend(iw(false, 0x12, 0, 0, 0));
        program.extend(iw(false, 0x13, 0, 0, 0));
        program.extend(hlt());
        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert!(!cpu.ien);
    }

    #[test]
    fn undeclared_opcode_halts() {
        let program = iw(false, 0x15, 0, 0, 0);
        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert!(cpu.halted);
        assert_eq!(2, cpu.ip);
    }

    #[test]
    fn shifts_move_the_carry_out() {
        let mut program = Vec::new();
        // mov r0, 0x8001
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0x01, 0x80]);
        // shl r0, 1
        program.extend(iw(false, 0x07, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x01);
        program.extend(hlt());
        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x0002, cpu.register(Register::R0));
        assert_eq!(Flags::CARRY, cpu.flags);

        let mut program = Vec::new();
        // mov r0, 0x8001
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0x01, 0x80]);
        // shr r0, 1
        program.extend(iw(false, 0x08, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x01);
        program.extend(hlt());
        let (mut cpu, mut ram) = boot(&program);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x4000, cpu.register(Register::R0));
        assert_eq!(Flags::CARRY, cpu.flags);
    }

    #[test]
    fn code_fetch_honors_cs() {
        let mut program = Vec::new();
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x42);
        program.extend(hlt());

        let mut ram = Ram::new();
        // code at cs 0x30, linear 0x300
        ram.load(0x30, 0, &program);
        let mut cpu = Cpu::new(&ucode::ROM);
        cpu.set_register(Register::Cs, 0x30);
        cpu.run(&mut ram, 1000);
        assert_eq!(0x42, cpu.register(Register::R0));
    }

    #[test]
    fn or_widths_merge_into_registers() {
        let source = "# ILLEGAL\n    HLT\nEND\n\
                      0 0x00 ORTEST\n\
                      \x20   OMEM SEGCS LIR WORD IPC2\n\
                      \x20   OTB LRA ORWORD\n\
                      \x20   OTA LRA ORBYTE\n\
                      \x20   HLT\nEND\n";
        let rom = ucode::compile(source).unwrap();
        let mut cpu = Cpu::new(&rom);
        let mut ram = Ram::new();
        cpu.tmp_b = 0x00F0;
        cpu.tmp_a = 0x0C;
        cpu.regs[0] = 0x0F00;
        cpu.run(&mut ram, 100);
        assert!(cpu.halted);
        assert_eq!(0x0FFC, cpu.regs[0]);
    }

    #[test]
    fn execution_is_deterministic() {
        let mut program = Vec::new();
        program.extend(iw(false, 0x01, T::Reg as u8, T::Imm16 as u8, 0));
        program.extend([0x34, 0x12]);
        program.extend(iw(false, 0x02, T::Reg as u8, T::Imm8 as u8, 0));
        program.push(0x10);
        program.extend(hlt());

        let (mut a, mut ram_a) = boot(&program);
        let ticks_a = a.run(&mut ram_a, 1000);
        let (mut b, mut ram_b) = boot(&program);
        let ticks_b = b.run(&mut ram_b, 1000);
        assert_eq!(ticks_a, ticks_b);
        assert_eq!(a.regs, b.regs);
        assert_eq!(a.flags, b.flags);
        assert_eq!(ram_a.bytes, ram_b.bytes);
    }
}
