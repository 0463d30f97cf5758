use crate::guest_memory::{phys_make, GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// Swappable data area, http://www.ctyme.com/intr/rb-3023.htm

pub const SDA_CRIT_ERROR_FLAG: Field<u8> = Field::at(0x00);
pub const SDA_IN_DOS_FLAG: Field<u8> = Field::at(0x01);
pub const SDA_DRIVE_CRIT_ERROR: Field<u8> = Field::at(0x02);
pub const SDA_LOCUS_OF_LAST_ERROR: Field<u8> = Field::at(0x03);
pub const SDA_EXTENDED_ERROR_CODE: Field<u16> = Field::at(0x04);
pub const SDA_SUGGESTED_ACTION: Field<u8> = Field::at(0x06);
pub const SDA_ERROR_CLASS: Field<u8> = Field::at(0x07);
pub const SDA_LAST_ERROR_POINTER: Field<u32> = Field::at(0x08);
pub const SDA_CURRENT_DTA: Field<u32> = Field::at(0x0c);
pub const SDA_CURRENT_PSP: Field<u16> = Field::at(0x10);
pub const SDA_SP_INT_23: Field<u16> = Field::at(0x12);
pub const SDA_RETURN_CODE: Field<u16> = Field::at(0x14);
pub const SDA_CURRENT_DRIVE: Field<u8> = Field::at(0x16);
pub const SDA_EXTENDED_BREAK_FLAG: Field<u8> = Field::at(0x17);
pub const SDA_FILL: Field<[u8; 2]> = Field::at(0x18);
pub const SDA_BYTES: u32 = 0x1a;

const _: () = {
	assert!(packed(&SDA_CRIT_ERROR_FLAG, &SDA_IN_DOS_FLAG));
	assert!(packed(&SDA_IN_DOS_FLAG, &SDA_DRIVE_CRIT_ERROR));
	assert!(packed(&SDA_DRIVE_CRIT_ERROR, &SDA_LOCUS_OF_LAST_ERROR));
	assert!(packed(&SDA_LOCUS_OF_LAST_ERROR, &SDA_EXTENDED_ERROR_CODE));
	assert!(packed(&SDA_EXTENDED_ERROR_CODE, &SDA_SUGGESTED_ACTION));
	assert!(packed(&SDA_SUGGESTED_ACTION, &SDA_ERROR_CLASS));
	assert!(packed(&SDA_ERROR_CLASS, &SDA_LAST_ERROR_POINTER));
	assert!(packed(&SDA_LAST_ERROR_POINTER, &SDA_CURRENT_DTA));
	assert!(packed(&SDA_CURRENT_DTA, &SDA_CURRENT_PSP));
	assert!(packed(&SDA_CURRENT_PSP, &SDA_SP_INT_23));
	assert!(packed(&SDA_SP_INT_23, &SDA_RETURN_CODE));
	assert!(packed(&SDA_RETURN_CODE, &SDA_CURRENT_DRIVE));
	assert!(packed(&SDA_CURRENT_DRIVE, &SDA_EXTENDED_BREAK_FLAG));
	assert!(packed(&SDA_EXTENDED_BREAK_FLAG, &SDA_FILL));
	assert!(SDA_FILL.end() == SDA_BYTES);
};

/// The guest visible copy of the kernel's current PSP, DTA, drive and last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sda {
	pt: PhysPt,
}

impl MemStruct for Sda {
	const SIZE: u32 = SDA_BYTES;
	fn pt(&self) -> PhysPt {
		self.pt
	}
}

impl Sda {
	pub fn new(segment: u16, offset: u16) -> Sda {
		Sda { pt: phys_make(segment, offset) }
	}

	pub fn init(&self, mem: &mut dyn GuestMemory) {
		self.clear(mem);
		self.set(mem, SDA_DRIVE_CRIT_ERROR, 0xff);
	}

	pub fn get_drive(&self, mem: &dyn GuestMemory) -> u8 {
		self.get(mem, SDA_CURRENT_DRIVE)
	}

	pub fn set_drive(&self, mem: &mut dyn GuestMemory, drive: u8) {
		self.set(mem, SDA_CURRENT_DRIVE, drive)
	}

	pub fn get_dta(&self, mem: &dyn GuestMemory) -> RealPt {
		self.get(mem, SDA_CURRENT_DTA)
	}

	pub fn set_dta(&self, mem: &mut dyn GuestMemory, dta: RealPt) {
		self.set(mem, SDA_CURRENT_DTA, dta)
	}

	pub fn get_psp(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, SDA_CURRENT_PSP)
	}

	pub fn set_psp(&self, mem: &mut dyn GuestMemory, psp: u16) {
		self.set(mem, SDA_CURRENT_PSP, psp)
	}

	pub fn get_return_code(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, SDA_RETURN_CODE)
	}

	pub fn set_return_code(&self, mem: &mut dyn GuestMemory, code: u16) {
		self.set(mem, SDA_RETURN_CODE, code)
	}

	pub fn get_extended_error(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, SDA_EXTENDED_ERROR_CODE)
	}

	pub fn set_extended_error(&self, mem: &mut dyn GuestMemory, code: u16) {
		self.set(mem, SDA_EXTENDED_ERROR_CODE, code)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::guest_memory::{real_make, FlatMemory};

	#[test] fn test_init() {
		let mut memory = FlatMemory::new(0x2000);
		memory.fill(0xb20, 0x77, 0x20);
		let sda = Sda::new(0xb2, 0);
		sda.init(&mut memory);
		let raw = &memory.as_slice()[0xb20..0xb3a];
		assert_eq!(raw[2], 0xff);
		assert!(raw.iter().enumerate().all(|(i, &b)| i == 2 || b == 0));
		assert_eq!(memory.read_u8(0xb3a), 0x77);
	}

	#[test] fn test_fields() {
		let mut memory = FlatMemory::new(0x2000);
		let sda = Sda::new(0xb2, 0);
		sda.init(&mut memory);
		sda.set_psp(&mut memory, 0x118);
		sda.set_dta(&mut memory, real_make(0x118, 0x80));
		sda.set_drive(&mut memory, 2);
		sda.set_return_code(&mut memory, 0x0301);
		sda.set_extended_error(&mut memory, 5);
		assert_eq!(memory.read_u16(0xb20 + 0x10), 0x118);
		assert_eq!(memory.read_u32(0xb20 + 0x0c), 0x01180080);
		assert_eq!(memory.read_u8(0xb20 + 0x16), 2);
		assert_eq!(sda.get_psp(&memory), 0x118);
		assert_eq!(sda.get_dta(&memory), real_make(0x118, 0x80));
		assert_eq!(sda.get_drive(&memory), 2);
		assert_eq!(sda.get_return_code(&memory), 0x0301);
		assert_eq!(sda.get_extended_error(&memory), 5);
	}
}
