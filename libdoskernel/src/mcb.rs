use crate::guest_memory::{phys_make, GuestMemory, PhysPt};
use crate::mem_struct::{packed, Field, MemStruct};

// http://stanislavs.org/helppc/memory_control_block.html

/// Owner value of a free block.
pub const MCB_FREE: u16 = 0x0000;
/// Owner value of blocks that belong to DOS itself.
pub const MCB_DOS: u16 = 0x0008;
/// Type byte of a block that has a successor ('M').
pub const MCB_NORMAL: u8 = 0x4d;
/// Type byte of the last block of a chain ('Z').
pub const MCB_LAST: u8 = 0x5a;

pub const MCB_TYPE: Field<u8> = Field::at(0x00);
pub const MCB_PSP_SEGMENT: Field<u16> = Field::at(0x01);
pub const MCB_SIZE: Field<u16> = Field::at(0x03);
pub const MCB_UNUSED: Field<[u8; 3]> = Field::at(0x05);
pub const MCB_FILENAME: Field<[u8; 8]> = Field::at(0x08);
pub const MCB_BYTES: u32 = 0x10;

const _: () = {
	assert!(packed(&MCB_TYPE, &MCB_PSP_SEGMENT));
	assert!(packed(&MCB_PSP_SEGMENT, &MCB_SIZE));
	assert!(packed(&MCB_SIZE, &MCB_UNUSED));
	assert!(packed(&MCB_UNUSED, &MCB_FILENAME));
	assert!(MCB_FILENAME.end() == MCB_BYTES);
};

/// Segment of the MCB that follows the block whose header is at `segment` and which spans `size`
/// paragraphs. The chain has no explicit links, this is the whole of it.
pub fn next_mcb(segment: u16, size: u16) -> u16 {
	segment.wrapping_add(size).wrapping_add(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mcb {
	segment: u16,
}

impl MemStruct for Mcb {
	const SIZE: u32 = MCB_BYTES;
	fn pt(&self) -> PhysPt {
		phys_make(self.segment, 0)
	}
}

impl Mcb {
	pub fn new(segment: u16) -> Mcb {
		Mcb { segment }
	}

	/// The header of the block whose data starts at `segment`.
	pub fn for_block(segment: u16) -> Mcb {
		Mcb::new(segment.wrapping_sub(1))
	}

	pub fn segment(&self) -> u16 {
		self.segment
	}

	/// First paragraph of the data described by this header.
	pub fn data_segment(&self) -> u16 {
		self.segment.wrapping_add(1)
	}

	pub fn get_type(&self, mem: &dyn GuestMemory) -> u8 {
		self.get(mem, MCB_TYPE)
	}

	pub fn set_type(&self, mem: &mut dyn GuestMemory, mcb_type: u8) {
		self.set(mem, MCB_TYPE, mcb_type)
	}

	pub fn get_psp_segment(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, MCB_PSP_SEGMENT)
	}

	pub fn set_psp_segment(&self, mem: &mut dyn GuestMemory, psp: u16) {
		self.set(mem, MCB_PSP_SEGMENT, psp)
	}

	pub fn get_size(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, MCB_SIZE)
	}

	pub fn set_size(&self, mem: &mut dyn GuestMemory, size: u16) {
		self.set(mem, MCB_SIZE, size)
	}

	pub fn get_file_name(&self, mem: &dyn GuestMemory) -> [u8; 8] {
		self.get(mem, MCB_FILENAME)
	}

	/// Copies up to 8 bytes of `name`, zero filling the rest.
	pub fn set_file_name(&self, mem: &mut dyn GuestMemory, name: &[u8]) {
		let mut filename = [0u8; 8];
		let len = name.len().min(8);
		filename[..len].copy_from_slice(&name[..len]);
		self.set(mem, MCB_FILENAME, filename)
	}

	/// The filename with trailing NULs and spaces stripped.
	pub fn file_name_string(&self, mem: &dyn GuestMemory) -> String {
		let filename = self.get_file_name(mem);
		let len = filename.iter().position(|&c| c == 0).unwrap_or(8);
		String::from_utf8_lossy(&filename[..len]).trim_end().to_string()
	}

	pub fn is_free(&self, mem: &dyn GuestMemory) -> bool {
		self.get_psp_segment(mem) == MCB_FREE
	}

	pub fn is_last(&self, mem: &dyn GuestMemory) -> bool {
		self.get_type(mem) == MCB_LAST
	}

	pub fn has_valid_type(&self, mem: &dyn GuestMemory) -> bool {
		let mcb_type = self.get_type(mem);
		mcb_type == MCB_NORMAL || mcb_type == MCB_LAST
	}

	pub fn next(&self, mem: &dyn GuestMemory) -> Mcb {
		Mcb::new(next_mcb(self.segment, self.get_size(mem)))
	}

	/// Writes a complete header in one go.
	pub fn write(&self, mem: &mut dyn GuestMemory, mcb_type: u8, psp: u16, size: u16) {
		self.set_type(mem, mcb_type);
		self.set_psp_segment(mem, psp);
		self.set_size(mem, size);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::guest_memory::FlatMemory;

	#[test] fn test_next_mcb() {
		assert_eq!(next_mcb(0x16f, 1), 0x171);
		assert_eq!(next_mcb(0x1000, 0), 0x1001);
		assert_eq!(next_mcb(0xffff, 0), 0x0000);
	}

	#[test] fn test_layout() {
		let mut memory = FlatMemory::new(0x10000);
		let mcb = Mcb::new(0x100);
		mcb.write(&mut memory, MCB_LAST, 0x0123, 0x4567);
		mcb.set_file_name(&mut memory, b"COMMAND");
		let raw = &memory.as_slice()[0x1000..0x1010];
		assert_eq!(raw[0], b'Z');
		assert_eq!(&raw[1..3], &[0x23, 0x01]);
		assert_eq!(&raw[3..5], &[0x67, 0x45]);
		assert_eq!(&raw[8..16], b"COMMAND\0");
		assert_eq!(mcb.file_name_string(&memory), "COMMAND");
		assert!(mcb.is_last(&memory));
		assert!(!mcb.is_free(&memory));
		assert_eq!(mcb.next(&memory).segment(), 0x100 + 0x4567 + 1);
	}

	#[test] fn test_type_validation() {
		let mut memory = FlatMemory::new(0x10000);
		let mcb = Mcb::for_block(0x201);
		assert_eq!(mcb.segment(), 0x200);
		assert_eq!(mcb.data_segment(), 0x201);
		mcb.set_type(&mut memory, MCB_NORMAL);
		assert!(mcb.has_valid_type(&memory));
		mcb.set_type(&mut memory, 0x00);
		assert!(!mcb.has_valid_type(&memory));
	}
}
