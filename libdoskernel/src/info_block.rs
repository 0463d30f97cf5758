use crate::guest_memory::{phys_make, real_make, GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// The DOS info block, or "list of lists" returned by INT 21h AH=52h.
// http://www.ctyme.com/intr/rb-2983.htm
// ES:BX points at DIB_FIRST_DPB, everything before it is at negative offsets.

pub const DIB_UNKNOWN_1: Field<[u8; 4]> = Field::at(0x00);
pub const DIB_MAGIC_WORD: Field<u16> = Field::at(0x04);
pub const DIB_UNKNOWN_2: Field<[u8; 8]> = Field::at(0x06);
pub const DIB_REG_CX_FROM_5E: Field<u16> = Field::at(0x0e);
pub const DIB_COUNT_LRU_CACHE: Field<u16> = Field::at(0x10);
pub const DIB_COUNT_LRU_OPENS: Field<u16> = Field::at(0x12);
pub const DIB_STUFF: Field<[u8; 6]> = Field::at(0x14);
pub const DIB_SHARING_COUNT: Field<u16> = Field::at(0x1a);
pub const DIB_SHARING_DELAY: Field<u16> = Field::at(0x1c);
pub const DIB_DISK_BUF_PTR: Field<u32> = Field::at(0x1e);
pub const DIB_PTR_CON_INPUT: Field<u16> = Field::at(0x22);
pub const DIB_FIRST_MCB: Field<u16> = Field::at(0x24);
pub const DIB_FIRST_DPB: Field<u32> = Field::at(0x26);
pub const DIB_FIRST_FILE_TABLE: Field<u32> = Field::at(0x2a);
pub const DIB_ACTIVE_CLOCK: Field<u32> = Field::at(0x2e);
pub const DIB_ACTIVE_CON: Field<u32> = Field::at(0x32);
pub const DIB_MAX_SECTOR_LENGTH: Field<u16> = Field::at(0x36);
pub const DIB_DISK_INFO_BUFFER: Field<u32> = Field::at(0x38);
pub const DIB_CUR_DIR_STRUCTURE: Field<u32> = Field::at(0x3c);
pub const DIB_FCB_TABLE: Field<u32> = Field::at(0x40);
pub const DIB_PROT_FCBS: Field<u16> = Field::at(0x44);
pub const DIB_BLOCK_DEVICES: Field<u8> = Field::at(0x46);
pub const DIB_LASTDRIVE: Field<u8> = Field::at(0x47);
pub const DIB_NUL_NEXT_DRIVER: Field<u32> = Field::at(0x48);
pub const DIB_NUL_ATTRIBUTES: Field<u16> = Field::at(0x4c);
pub const DIB_NUL_STRATEGY: Field<u32> = Field::at(0x4e);
pub const DIB_NUL_STRING: Field<[u8; 8]> = Field::at(0x52);
pub const DIB_JOINED_DRIVES: Field<u8> = Field::at(0x5a);
pub const DIB_SPECIAL_CODE_SEG: Field<u16> = Field::at(0x5b);
pub const DIB_SETVER_PTR: Field<u32> = Field::at(0x5d);
pub const DIB_A20_FIX_OFS: Field<u16> = Field::at(0x61);
pub const DIB_PSP_LAST_IF_HMA: Field<u16> = Field::at(0x63);
pub const DIB_BUFFERS_X: Field<u16> = Field::at(0x65);
pub const DIB_BUFFERS_Y: Field<u16> = Field::at(0x67);
pub const DIB_BOOT_DRIVE: Field<u8> = Field::at(0x69);
pub const DIB_USE_DWORD_MOV: Field<u8> = Field::at(0x6a);
pub const DIB_EXTENDED_SIZE: Field<u16> = Field::at(0x6b);
pub const DIB_DISK_BUFFER_HEAD_PT: Field<u32> = Field::at(0x6d);
pub const DIB_DIRTY_DISK_BUFFERS: Field<u16> = Field::at(0x71);
pub const DIB_LOOKAHEAD_BUF_PT: Field<u32> = Field::at(0x73);
pub const DIB_LOOKAHEAD_BUF_NUMBER: Field<u16> = Field::at(0x77);
pub const DIB_BUFFER_LOCATION: Field<u8> = Field::at(0x79);
pub const DIB_WORKSPACE_BUFFER: Field<u32> = Field::at(0x7a);
pub const DIB_UNKNOWN_3: Field<[u8; 11]> = Field::at(0x7e);
pub const DIB_CHAINING_UMB: Field<u8> = Field::at(0x89);
pub const DIB_MIN_MEM_FOR_EXEC: Field<u16> = Field::at(0x8a);
pub const DIB_START_OF_UMB_CHAIN: Field<u16> = Field::at(0x8c);
pub const DIB_MEM_ALLOC_SCAN_START: Field<u16> = Field::at(0x8e);
pub const DIB_BYTES: u32 = 0x90;

const _: () = {
	assert!(packed(&DIB_UNKNOWN_1, &DIB_MAGIC_WORD));
	assert!(packed(&DIB_MAGIC_WORD, &DIB_UNKNOWN_2));
	assert!(packed(&DIB_UNKNOWN_2, &DIB_REG_CX_FROM_5E));
	assert!(packed(&DIB_REG_CX_FROM_5E, &DIB_COUNT_LRU_CACHE));
	assert!(packed(&DIB_COUNT_LRU_CACHE, &DIB_COUNT_LRU_OPENS));
	assert!(packed(&DIB_COUNT_LRU_OPENS, &DIB_STUFF));
	assert!(packed(&DIB_STUFF, &DIB_SHARING_COUNT));
	assert!(packed(&DIB_SHARING_COUNT, &DIB_SHARING_DELAY));
	assert!(packed(&DIB_SHARING_DELAY, &DIB_DISK_BUF_PTR));
	assert!(packed(&DIB_DISK_BUF_PTR, &DIB_PTR_CON_INPUT));
	assert!(packed(&DIB_PTR_CON_INPUT, &DIB_FIRST_MCB));
	assert!(packed(&DIB_FIRST_MCB, &DIB_FIRST_DPB));
	assert!(packed(&DIB_FIRST_DPB, &DIB_FIRST_FILE_TABLE));
	assert!(packed(&DIB_FIRST_FILE_TABLE, &DIB_ACTIVE_CLOCK));
	assert!(packed(&DIB_ACTIVE_CLOCK, &DIB_ACTIVE_CON));
	assert!(packed(&DIB_ACTIVE_CON, &DIB_MAX_SECTOR_LENGTH));
	assert!(packed(&DIB_MAX_SECTOR_LENGTH, &DIB_DISK_INFO_BUFFER));
	assert!(packed(&DIB_DISK_INFO_BUFFER, &DIB_CUR_DIR_STRUCTURE));
	assert!(packed(&DIB_CUR_DIR_STRUCTURE, &DIB_FCB_TABLE));
	assert!(packed(&DIB_FCB_TABLE, &DIB_PROT_FCBS));
	assert!(packed(&DIB_PROT_FCBS, &DIB_BLOCK_DEVICES));
	assert!(packed(&DIB_BLOCK_DEVICES, &DIB_LASTDRIVE));
	assert!(packed(&DIB_LASTDRIVE, &DIB_NUL_NEXT_DRIVER));
	assert!(packed(&DIB_NUL_NEXT_DRIVER, &DIB_NUL_ATTRIBUTES));
	assert!(packed(&DIB_NUL_ATTRIBUTES, &DIB_NUL_STRATEGY));
	assert!(packed(&DIB_NUL_STRATEGY, &DIB_NUL_STRING));
	assert!(packed(&DIB_NUL_STRING, &DIB_JOINED_DRIVES));
	assert!(packed(&DIB_JOINED_DRIVES, &DIB_SPECIAL_CODE_SEG));
	assert!(packed(&DIB_SPECIAL_CODE_SEG, &DIB_SETVER_PTR));
	assert!(packed(&DIB_SETVER_PTR, &DIB_A20_FIX_OFS));
	assert!(packed(&DIB_A20_FIX_OFS, &DIB_PSP_LAST_IF_HMA));
	assert!(packed(&DIB_PSP_LAST_IF_HMA, &DIB_BUFFERS_X));
	assert!(packed(&DIB_BUFFERS_X, &DIB_BUFFERS_Y));
	assert!(packed(&DIB_BUFFERS_Y, &DIB_BOOT_DRIVE));
	assert!(packed(&DIB_BOOT_DRIVE, &DIB_USE_DWORD_MOV));
	assert!(packed(&DIB_USE_DWORD_MOV, &DIB_EXTENDED_SIZE));
	assert!(packed(&DIB_EXTENDED_SIZE, &DIB_DISK_BUFFER_HEAD_PT));
	assert!(packed(&DIB_DISK_BUFFER_HEAD_PT, &DIB_DIRTY_DISK_BUFFERS));
	assert!(packed(&DIB_DIRTY_DISK_BUFFERS, &DIB_LOOKAHEAD_BUF_PT));
	assert!(packed(&DIB_LOOKAHEAD_BUF_PT, &DIB_LOOKAHEAD_BUF_NUMBER));
	assert!(packed(&DIB_LOOKAHEAD_BUF_NUMBER, &DIB_BUFFER_LOCATION));
	assert!(packed(&DIB_BUFFER_LOCATION, &DIB_WORKSPACE_BUFFER));
	assert!(packed(&DIB_WORKSPACE_BUFFER, &DIB_UNKNOWN_3));
	assert!(packed(&DIB_UNKNOWN_3, &DIB_CHAINING_UMB));
	assert!(packed(&DIB_CHAINING_UMB, &DIB_MIN_MEM_FOR_EXEC));
	assert!(packed(&DIB_MIN_MEM_FOR_EXEC, &DIB_START_OF_UMB_CHAIN));
	assert!(packed(&DIB_START_OF_UMB_CHAIN, &DIB_MEM_ALLOC_SCAN_START));
	assert!(DIB_MEM_ALLOC_SCAN_START.end() == DIB_BYTES);
};

/// Attribute word of the NUL device header embedded in the block.
pub const NUL_DEVICE_ATTRIBUTES: u16 = 0x8004;
/// Number of handles the fake system file tables claim to hold.
const FAKE_SFT_FILES: u16 = 100;
/// Paragraph offset of the second fake file table, past the end of the block.
const FAKE_SFT_SEGMENT_OFFSET: u16 = 0x26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoBlock {
	segment: u16,
}

impl MemStruct for InfoBlock {
	const SIZE: u32 = DIB_BYTES;
	fn pt(&self) -> PhysPt {
		phys_make(self.segment, 0)
	}
}

impl InfoBlock {
	pub fn new(segment: u16) -> InfoBlock {
		InfoBlock { segment }
	}

	pub fn segment(&self) -> u16 {
		self.segment
	}

	/// Fills the block with the values a freshly booted DOS 5 has. `first_mcb` seeds the allocation
	/// scan start, `total_pages` is the amount of RAM in 4KB pages.
	pub fn set_location(&self, mem: &mut dyn GuestMemory, first_mcb: u16, total_pages: u32) {
		let pt = self.pt();
		mem.fill(pt, 0xff, DIB_BYTES);
		mem.fill(pt, 0, 14);

		self.set(mem, DIB_REG_CX_FROM_5E, 0);
		self.set(mem, DIB_COUNT_LRU_CACHE, 0);
		self.set(mem, DIB_COUNT_LRU_OPENS, 0);
		self.set(mem, DIB_PROT_FCBS, 0);
		self.set(mem, DIB_SPECIAL_CODE_SEG, 0);
		self.set(mem, DIB_JOINED_DRIVES, 0);
		self.set(mem, DIB_LASTDRIVE, 0x01);
		self.set(mem, DIB_DISK_INFO_BUFFER, real_make(self.segment, DIB_DISK_BUFFER_HEAD_PT.offset as u16));
		self.set(mem, DIB_SETVER_PTR, 0);
		self.set(mem, DIB_A20_FIX_OFS, 0);
		self.set(mem, DIB_PSP_LAST_IF_HMA, 0);
		self.set(mem, DIB_BLOCK_DEVICES, 0);
		self.set(mem, DIB_BOOT_DRIVE, 0);
		self.set(mem, DIB_USE_DWORD_MOV, 1);
		self.set(mem, DIB_EXTENDED_SIZE, (total_pages * 4).saturating_sub(1024) as u16);
		self.set(mem, DIB_MAGIC_WORD, 0x0001);
		self.set(mem, DIB_SHARING_COUNT, 0);
		self.set(mem, DIB_SHARING_DELAY, 0);
		self.set(mem, DIB_PTR_CON_INPUT, 0);
		self.set(mem, DIB_MAX_SECTOR_LENGTH, 0x200);
		self.set(mem, DIB_DIRTY_DISK_BUFFERS, 0);
		self.set(mem, DIB_LOOKAHEAD_BUF_PT, 0);
		self.set(mem, DIB_LOOKAHEAD_BUF_NUMBER, 0);
		self.set(mem, DIB_BUFFER_LOCATION, 0);
		self.set(mem, DIB_WORKSPACE_BUFFER, 0);
		self.set(mem, DIB_MIN_MEM_FOR_EXEC, 0);
		self.set(mem, DIB_MEM_ALLOC_SCAN_START, first_mcb);
		self.set(mem, DIB_START_OF_UMB_CHAIN, 0xffff);
		self.set(mem, DIB_CHAINING_UMB, 0);

		self.set(mem, DIB_NUL_NEXT_DRIVER, 0xffffffff);
		self.set(mem, DIB_NUL_ATTRIBUTES, NUL_DEVICE_ATTRIBUTES);
		self.set(mem, DIB_NUL_STRATEGY, 0);
		self.set(mem, DIB_NUL_STRING, *b"NUL     ");

		// Two chained file tables that claim 100 handles each. Nothing reads them but programs
		// that count handles.
		let sft_offset = DIB_FIRST_FILE_TABLE.offset as u16 + 0xa2;
		self.set(mem, DIB_FIRST_FILE_TABLE, real_make(self.segment, sft_offset));
		let second_table = self.segment + FAKE_SFT_SEGMENT_OFFSET;
		mem.write_u32(phys_make(self.segment, sft_offset), real_make(second_table, 0));
		mem.write_u16(phys_make(self.segment, sft_offset + 4), FAKE_SFT_FILES);
		mem.write_u32(phys_make(second_table, 0), 0xffffffff);
		mem.write_u16(phys_make(second_table, 4), FAKE_SFT_FILES);
	}

	/// What AH=52h returns in ES:BX.
	pub fn get_pointer(&self) -> RealPt {
		real_make(self.segment, DIB_FIRST_DPB.offset as u16)
	}

	pub fn get_first_mcb(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, DIB_FIRST_MCB)
	}

	pub fn set_first_mcb(&self, mem: &mut dyn GuestMemory, segment: u16) {
		self.set(mem, DIB_FIRST_MCB, segment)
	}

	pub fn set_buffers(&self, mem: &mut dyn GuestMemory, x: u16, y: u16) {
		self.set(mem, DIB_BUFFERS_X, x);
		self.set(mem, DIB_BUFFERS_Y, y);
	}

	pub fn set_cur_dir_struct(&self, mem: &mut dyn GuestMemory, cds: RealPt) {
		self.set(mem, DIB_CUR_DIR_STRUCTURE, cds)
	}

	pub fn set_fcb_table(&self, mem: &mut dyn GuestMemory, table: RealPt) {
		self.set(mem, DIB_FCB_TABLE, table)
	}

	pub fn set_device_chain_start(&self, mem: &mut dyn GuestMemory, chain: RealPt) {
		self.set(mem, DIB_NUL_NEXT_DRIVER, chain)
	}

	pub fn get_device_chain(&self, mem: &dyn GuestMemory) -> RealPt {
		self.get(mem, DIB_NUL_NEXT_DRIVER)
	}

	pub fn set_disk_buffer_head_pt(&self, mem: &mut dyn GuestMemory, head: RealPt) {
		self.set(mem, DIB_DISK_BUFFER_HEAD_PT, head)
	}

	pub fn get_umb_chain_state(&self, mem: &dyn GuestMemory) -> u8 {
		self.get(mem, DIB_CHAINING_UMB)
	}

	pub fn set_umb_chain_state(&self, mem: &mut dyn GuestMemory, state: u8) {
		self.set(mem, DIB_CHAINING_UMB, state)
	}

	pub fn get_start_of_umb_chain(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, DIB_START_OF_UMB_CHAIN)
	}

	pub fn set_start_of_umb_chain(&self, mem: &mut dyn GuestMemory, segment: u16) {
		self.set(mem, DIB_START_OF_UMB_CHAIN, segment)
	}

	pub fn set_block_devices(&self, mem: &mut dyn GuestMemory, count: u8) {
		self.set(mem, DIB_BLOCK_DEVICES, count)
	}

	pub fn get_sharing_count(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, DIB_SHARING_COUNT)
	}

	pub fn set_sharing_retry(&self, mem: &mut dyn GuestMemory, count: u16, delay: u16) {
		self.set(mem, DIB_SHARING_COUNT, count);
		self.set(mem, DIB_SHARING_DELAY, delay);
	}
}
