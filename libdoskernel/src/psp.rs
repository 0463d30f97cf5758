use crate::guest_memory::{phys_make, real_make, real_to_phys, GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// https://en.wikipedia.org/wiki/Program_Segment_Prefix
// http://stanislavs.org/helppc/program_segment_prefix.html

pub const PSP_EXIT: Field<[u8; 2]> = Field::at(0x00);
pub const PSP_NEXT_SEG: Field<u16> = Field::at(0x02);
pub const PSP_FILL_1: Field<u8> = Field::at(0x04);
pub const PSP_FAR_CALL: Field<u8> = Field::at(0x05);
pub const PSP_CPM_ENTRY: Field<u32> = Field::at(0x06);
pub const PSP_INT_22: Field<u32> = Field::at(0x0a);
pub const PSP_INT_23: Field<u32> = Field::at(0x0e);
pub const PSP_INT_24: Field<u32> = Field::at(0x12);
pub const PSP_PARENT: Field<u16> = Field::at(0x16);
pub const PSP_FILES: Field<[u8; 20]> = Field::at(0x18);
pub const PSP_ENVIRONMENT: Field<u16> = Field::at(0x2c);
pub const PSP_STACK: Field<u32> = Field::at(0x2e);
pub const PSP_MAX_FILES: Field<u16> = Field::at(0x32);
pub const PSP_FILE_TABLE: Field<u32> = Field::at(0x34);
pub const PSP_PREV_PSP: Field<u32> = Field::at(0x38);
pub const PSP_INTERIM_FLAG: Field<u8> = Field::at(0x3c);
pub const PSP_TRUENAME_FLAG: Field<u8> = Field::at(0x3d);
pub const PSP_NN_FLAGS: Field<u16> = Field::at(0x3e);
pub const PSP_DOS_VERSION: Field<u16> = Field::at(0x40);
pub const PSP_FILL_2: Field<[u8; 14]> = Field::at(0x42);
pub const PSP_SERVICE: Field<[u8; 3]> = Field::at(0x50);
pub const PSP_FILL_3: Field<[u8; 9]> = Field::at(0x53);
pub const PSP_FCB1: Field<[u8; 16]> = Field::at(0x5c);
pub const PSP_FCB2: Field<[u8; 16]> = Field::at(0x6c);
pub const PSP_FILL_4: Field<[u8; 4]> = Field::at(0x7c);
pub const PSP_CMDTAIL_COUNT: Field<u8> = Field::at(0x80);
pub const PSP_CMDTAIL_BUFFER: Field<[u8; 127]> = Field::at(0x81);
pub const PSP_BYTES: u32 = 0x100;

const _: () = {
	assert!(packed(&PSP_EXIT, &PSP_NEXT_SEG));
	assert!(packed(&PSP_NEXT_SEG, &PSP_FILL_1));
	assert!(packed(&PSP_FILL_1, &PSP_FAR_CALL));
	assert!(packed(&PSP_FAR_CALL, &PSP_CPM_ENTRY));
	assert!(packed(&PSP_CPM_ENTRY, &PSP_INT_22));
	assert!(packed(&PSP_INT_22, &PSP_INT_23));
	assert!(packed(&PSP_INT_23, &PSP_INT_24));
	assert!(packed(&PSP_INT_24, &PSP_PARENT));
	assert!(packed(&PSP_PARENT, &PSP_FILES));
	assert!(packed(&PSP_FILES, &PSP_ENVIRONMENT));
	assert!(packed(&PSP_ENVIRONMENT, &PSP_STACK));
	assert!(packed(&PSP_STACK, &PSP_MAX_FILES));
	assert!(packed(&PSP_MAX_FILES, &PSP_FILE_TABLE));
	assert!(packed(&PSP_FILE_TABLE, &PSP_PREV_PSP));
	assert!(packed(&PSP_PREV_PSP, &PSP_INTERIM_FLAG));
	assert!(packed(&PSP_INTERIM_FLAG, &PSP_TRUENAME_FLAG));
	assert!(packed(&PSP_TRUENAME_FLAG, &PSP_NN_FLAGS));
	assert!(packed(&PSP_NN_FLAGS, &PSP_DOS_VERSION));
	assert!(packed(&PSP_DOS_VERSION, &PSP_FILL_2));
	assert!(packed(&PSP_FILL_2, &PSP_SERVICE));
	assert!(packed(&PSP_SERVICE, &PSP_FILL_3));
	assert!(packed(&PSP_FILL_3, &PSP_FCB1));
	assert!(packed(&PSP_FCB1, &PSP_FCB2));
	assert!(packed(&PSP_FCB2, &PSP_FILL_4));
	assert!(packed(&PSP_FILL_4, &PSP_CMDTAIL_COUNT));
	assert!(packed(&PSP_CMDTAIL_COUNT, &PSP_CMDTAIL_BUFFER));
	assert!(PSP_CMDTAIL_BUFFER.end() == PSP_BYTES);
};

/// Handles every PSP starts with, before `SetNumFiles` moves the table elsewhere.
pub const PSP_DEFAULT_FILES: u16 = 20;
/// Marks an unused slot in a PSP file table.
pub const PSP_UNUSED_HANDLE: u8 = 0xff;
/// Returned by the entry searches when nothing matched.
pub const PSP_NO_ENTRY: u16 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Psp {
	segment: u16,
}

impl MemStruct for Psp {
	const SIZE: u32 = PSP_BYTES;
	fn pt(&self) -> PhysPt {
		phys_make(self.segment, 0)
	}
}

impl Psp {
	pub fn new(segment: u16) -> Psp {
		Psp { segment }
	}

	pub fn segment(&self) -> u16 {
		self.segment
	}

	/// Initialises a fresh PSP that owns `mem_size` paragraphs. The file table is local with all 20
	/// handles unused, and the current INT 22h/23h/24h vectors are saved.
	pub fn make_new(&self, mem: &mut dyn GuestMemory, mem_size: u16, parent: u16, dos_version: u16) {
		self.clear(mem);
		self.set(mem, PSP_NEXT_SEG, self.segment.wrapping_add(mem_size));
		self.set(mem, PSP_FAR_CALL, 0xea);
		self.set(mem, PSP_CPM_ENTRY, real_make(0xdead, 0xffff));
		// INT 20h, and INT 21h followed by RETF.
		self.set(mem, PSP_EXIT, [0xcd, 0x20]);
		self.set(mem, PSP_SERVICE, [0xcd, 0x21, 0xcb]);
		self.set(mem, PSP_PARENT, parent);
		self.set(mem, PSP_PREV_PSP, 0xffffffff);
		self.set(mem, PSP_DOS_VERSION, dos_version);
		self.save_vectors(mem);

		self.set(mem, PSP_FILE_TABLE, real_make(self.segment, PSP_FILES.offset as u16));
		self.set(mem, PSP_MAX_FILES, PSP_DEFAULT_FILES);
		for index in 0..PSP_DEFAULT_FILES {
			self.set_file_handle(mem, index, PSP_UNUSED_HANDLE);
		}
	}

	pub fn get_size(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, PSP_NEXT_SEG)
	}

	pub fn set_size(&self, mem: &mut dyn GuestMemory, size: u16) {
		self.set(mem, PSP_NEXT_SEG, self.segment.wrapping_add(size))
	}

	pub fn get_parent(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, PSP_PARENT)
	}

	pub fn set_parent(&self, mem: &mut dyn GuestMemory, parent: u16) {
		self.set(mem, PSP_PARENT, parent)
	}

	pub fn get_environment(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, PSP_ENVIRONMENT)
	}

	pub fn set_environment(&self, mem: &mut dyn GuestMemory, environment: u16) {
		self.set(mem, PSP_ENVIRONMENT, environment)
	}

	pub fn get_stack(&self, mem: &dyn GuestMemory) -> RealPt {
		self.get(mem, PSP_STACK)
	}

	pub fn set_stack(&self, mem: &mut dyn GuestMemory, stack: RealPt) {
		self.set(mem, PSP_STACK, stack)
	}

	pub fn get_int22(&self, mem: &dyn GuestMemory) -> RealPt {
		self.get(mem, PSP_INT_22)
	}

	pub fn get_dos_version(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, PSP_DOS_VERSION)
	}

	pub fn get_max_files(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, PSP_MAX_FILES)
	}

	pub fn get_file_table(&self, mem: &dyn GuestMemory) -> RealPt {
		self.get(mem, PSP_FILE_TABLE)
	}

	/// Points the handle table somewhere else, as `SetNumFiles` does when it outgrows the PSP.
	pub fn set_file_table(&self, mem: &mut dyn GuestMemory, table: RealPt, max_files: u16) {
		self.set(mem, PSP_FILE_TABLE, table);
		self.set(mem, PSP_MAX_FILES, max_files);
	}

	pub fn set_max_files(&self, mem: &mut dyn GuestMemory, max_files: u16) {
		self.set(mem, PSP_MAX_FILES, max_files)
	}

	/// The SFT index behind a process handle, or 0xff past the end of the table.
	pub fn get_file_handle(&self, mem: &dyn GuestMemory, index: u16) -> u8 {
		if index >= self.get_max_files(mem) {
			return PSP_UNUSED_HANDLE;
		}
		let files = real_to_phys(self.get_file_table(mem));
		mem.read_u8(files + index as u32)
	}

	pub fn set_file_handle(&self, mem: &mut dyn GuestMemory, index: u16, handle: u8) {
		if index < self.get_max_files(mem) {
			let files = real_to_phys(self.get_file_table(mem));
			mem.write_u8(files + index as u32, handle);
		}
	}

	pub fn find_free_file_entry(&self, mem: &dyn GuestMemory) -> u16 {
		self.find_entry_by_handle(mem, PSP_UNUSED_HANDLE)
	}

	pub fn find_entry_by_handle(&self, mem: &dyn GuestMemory, handle: u8) -> u16 {
		let files = real_to_phys(self.get_file_table(mem));
		(0..self.get_max_files(mem))
			.find(|&index| mem.read_u8(files + index as u32) == handle)
			.unwrap_or(PSP_NO_ENTRY)
	}

	/// The 20 handles stored inside the PSP itself, regardless of where the active table lives.
	pub fn get_local_files(&self, mem: &dyn GuestMemory) -> [u8; 20] {
		self.get(mem, PSP_FILES)
	}

	pub fn save_vectors(&self, mem: &mut dyn GuestMemory) {
		let int22 = mem.real_get_vec(0x22);
		let int23 = mem.real_get_vec(0x23);
		let int24 = mem.real_get_vec(0x24);
		self.set(mem, PSP_INT_22, int22);
		self.set(mem, PSP_INT_23, int23);
		self.set(mem, PSP_INT_24, int24);
	}

	pub fn restore_vectors(&self, mem: &mut dyn GuestMemory) {
		let int22 = self.get(mem, PSP_INT_22);
		let int23 = self.get(mem, PSP_INT_23);
		let int24 = self.get(mem, PSP_INT_24);
		mem.real_set_vec(0x22, int22);
		mem.real_set_vec(0x23, int23);
		mem.real_set_vec(0x24, int24);
	}

	/// Copies the 128 byte command tail from `source`. A null pointer leaves an empty tail.
	pub fn set_command_tail(&self, mem: &mut dyn GuestMemory, source: RealPt) {
		if source != 0 {
			mem.block_copy(self.pt() + PSP_CMDTAIL_COUNT.offset, real_to_phys(source), 128);
		} else {
			self.set(mem, PSP_CMDTAIL_COUNT, 0);
			mem.write_u8(self.pt() + PSP_CMDTAIL_BUFFER.offset, 0x0d);
		}
	}

	/// Writes `tail` as the command line, truncated to 126 characters and terminated with CR.
	pub fn write_command_tail(&self, mem: &mut dyn GuestMemory, tail: &[u8]) {
		let len = tail.len().min(126);
		self.set(mem, PSP_CMDTAIL_COUNT, len as u8);
		let buffer = self.pt() + PSP_CMDTAIL_BUFFER.offset;
		mem.block_write(buffer, &tail[..len]);
		mem.write_u8(buffer + len as u32, 0x0d);
	}

	pub fn get_command_tail(&self, mem: &dyn GuestMemory) -> Vec<u8> {
		let len = (self.get(mem, PSP_CMDTAIL_COUNT) as usize).min(127);
		let buffer = self.get(mem, PSP_CMDTAIL_BUFFER);
		buffer[..len].to_vec()
	}

	pub fn set_fcb1(&self, mem: &mut dyn GuestMemory, source: RealPt) {
		if source != 0 {
			mem.block_copy(self.pt() + PSP_FCB1.offset, real_to_phys(source), 16);
		}
	}

	pub fn set_fcb2(&self, mem: &mut dyn GuestMemory, source: RealPt) {
		if source != 0 {
			mem.block_copy(self.pt() + PSP_FCB2.offset, real_to_phys(source), 16);
		}
	}
}
