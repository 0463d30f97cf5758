use crate::guest_memory::{phys_make, PhysPt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
	// Accumulator
	AX,
	// Base address
	BX,
	// Count
	CX,
	// Data
	DX,
	SP,
	BP,
	SI,
	DI,
	CS,
	DS,
	ES,
	SS,
	IP,
	Flags,
}

const REG_COUNT: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegHalf {
	Low,
	High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
	Carry,
	Parity,
	Adjust,
	Zero,
	Sign,
	Trap,
	Interrupt,
	Direction,
	Overflow,
}

impl Flag {
	pub fn mask(&self) -> u16 {
		match self {
			Flag::Carry => 0x0001,
			Flag::Parity => 0x0004,
			Flag::Adjust => 0x0010,
			Flag::Zero => 0x0040,
			Flag::Sign => 0x0080,
			Flag::Trap => 0x0100,
			Flag::Interrupt => 0x0200,
			Flag::Direction => 0x0400,
			Flag::Overflow => 0x0800,
		}
	}
}

/// The arithmetic flags a program can test after a call.
pub const FLAGS_TEST_MASK: u16 = 0x0001 | 0x0004 | 0x0010 | 0x0040 | 0x0080 | 0x0800;

/// Register file of the emulated CPU as seen by the DOS interrupt handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
	regs: [u16; REG_COUNT],
}

impl Registers {
	pub fn new() -> Registers {
		Registers::default()
	}

	pub fn get_reg_u16(&self, reg: Reg) -> u16 {
		self.regs[reg as usize]
	}

	pub fn set_reg_u16(&mut self, reg: Reg, value: u16) {
		self.regs[reg as usize] = value;
	}

	pub fn get_reg_u8(&self, reg: Reg, half: RegHalf) -> u8 {
		let value = self.get_reg_u16(reg);
		match half {
			RegHalf::Low => (value & 0xff) as u8,
			RegHalf::High => (value >> 8) as u8,
		}
	}

	pub fn set_reg_u8(&mut self, reg: Reg, half: RegHalf, value: u8) {
		let old = self.get_reg_u16(reg);
		let new = match half {
			RegHalf::Low => (old & 0xff00) | value as u16,
			RegHalf::High => (old & 0x00ff) | ((value as u16) << 8),
		};
		self.set_reg_u16(reg, new);
	}

	pub fn get_flag(&self, flag: Flag) -> bool {
		self.get_reg_u16(Reg::Flags) & flag.mask() != 0
	}

	pub fn set_flag(&mut self, flag: Flag, on: bool) {
		let flags = self.get_reg_u16(Reg::Flags);
		let flags = if on { flags | flag.mask() } else { flags & !flag.mask() };
		self.set_reg_u16(Reg::Flags, flags);
	}

	/// Physical address of `seg:reg`, eg. DS:DX.
	pub fn get_seg_reg(&self, seg: Reg, reg: Reg) -> PhysPt {
		phys_make(self.get_reg_u16(seg), self.get_reg_u16(reg))
	}
}
