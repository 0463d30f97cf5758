use crate::guest_memory::{real_to_phys, GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// http://stanislavs.org/helppc/fcb.html

pub const FCB_DRIVE: Field<u8> = Field::at(0x00);
pub const FCB_FILENAME: Field<[u8; 8]> = Field::at(0x01);
pub const FCB_EXT: Field<[u8; 3]> = Field::at(0x09);
pub const FCB_CUR_BLOCK: Field<u16> = Field::at(0x0c);
pub const FCB_REC_SIZE: Field<u16> = Field::at(0x0e);
pub const FCB_FILESIZE: Field<u32> = Field::at(0x10);
pub const FCB_DATE: Field<u16> = Field::at(0x14);
pub const FCB_TIME: Field<u16> = Field::at(0x16);
pub const FCB_SFT_ENTRIES: Field<u8> = Field::at(0x18);
pub const FCB_SHARE_ATTRIBUTES: Field<u8> = Field::at(0x19);
pub const FCB_EXTRA_INFO: Field<u8> = Field::at(0x1a);
pub const FCB_FILE_HANDLE: Field<u8> = Field::at(0x1b);
pub const FCB_RESERVED: Field<[u8; 4]> = Field::at(0x1c);
pub const FCB_CUR_REC: Field<u8> = Field::at(0x20);
pub const FCB_RANDOM: Field<u32> = Field::at(0x21);
pub const FCB_BYTES: u32 = 0x25;

const _: () = {
	assert!(packed(&FCB_DRIVE, &FCB_FILENAME));
	assert!(packed(&FCB_FILENAME, &FCB_EXT));
	assert!(packed(&FCB_EXT, &FCB_CUR_BLOCK));
	assert!(packed(&FCB_CUR_BLOCK, &FCB_REC_SIZE));
	assert!(packed(&FCB_REC_SIZE, &FCB_FILESIZE));
	assert!(packed(&FCB_FILESIZE, &FCB_DATE));
	assert!(packed(&FCB_DATE, &FCB_TIME));
	assert!(packed(&FCB_TIME, &FCB_SFT_ENTRIES));
	assert!(packed(&FCB_SFT_ENTRIES, &FCB_SHARE_ATTRIBUTES));
	assert!(packed(&FCB_SHARE_ATTRIBUTES, &FCB_EXTRA_INFO));
	assert!(packed(&FCB_EXTRA_INFO, &FCB_FILE_HANDLE));
	assert!(packed(&FCB_FILE_HANDLE, &FCB_RESERVED));
	assert!(packed(&FCB_RESERVED, &FCB_CUR_REC));
	assert!(packed(&FCB_CUR_REC, &FCB_RANDOM));
	assert!(FCB_RANDOM.end() == FCB_BYTES);
};

/// An extended FCB starts with this byte, followed by 5 reserved bytes and the attribute.
pub const FCB_EXTENDED_MARKER: u8 = 0xff;
/// Distance from the start of an extended FCB to the normal FCB inside it.
pub const FCB_EXTENDED_HEADER: u32 = 7;
/// Bytes cleared by `create` for a normal FCB. Extended ones add the header.
const FCB_CREATE_FILL: u32 = 33;
/// Record size set when an FCB is opened.
pub const FCB_DEFAULT_RECORD_SIZE: u16 = 128;
pub const FCB_BLOCK_RECORDS: u32 = 128;

/// What FCB record reads and writes report in AL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcbRecordStatus {
	Success = 0,
	/// End of file on a read. On a write the disk is full or the write failed.
	NoData = 1,
	/// A read hit the end of the file part way into the record, the rest is zero filled.
	Partial = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fcb {
	/// Where the caller's structure starts, including any extended header.
	real_pt: PhysPt,
	/// The normal FCB fields.
	pt: PhysPt,
	extended: bool,
}

impl MemStruct for Fcb {
	const SIZE: u32 = FCB_BYTES;
	fn pt(&self) -> PhysPt {
		self.pt
	}
}

impl Fcb {
	/// Views the FCB at `pt`. With `allow_extended`, a leading 0xff selects the extended form.
	pub fn new(mem: &dyn GuestMemory, pt: RealPt, allow_extended: bool) -> Fcb {
		Fcb::at_phys(mem, real_to_phys(pt), allow_extended)
	}

	pub fn at_phys(mem: &dyn GuestMemory, real_pt: PhysPt, allow_extended: bool) -> Fcb {
		let extended = allow_extended && mem.read_u8(real_pt) == FCB_EXTENDED_MARKER;
		let pt = if extended { real_pt + FCB_EXTENDED_HEADER } else { real_pt };
		Fcb { real_pt, pt, extended }
	}

	pub fn is_extended(&self) -> bool {
		self.extended
	}

	/// Zeroes the structure and re-marks it as normal or extended.
	pub fn create(&mut self, mem: &mut dyn GuestMemory, extended: bool) {
		let fill = if extended { FCB_CREATE_FILL + FCB_EXTENDED_HEADER } else { FCB_CREATE_FILL };
		mem.fill(self.real_pt, 0, fill);
		self.extended = extended;
		if extended {
			mem.write_u8(self.real_pt, FCB_EXTENDED_MARKER);
			self.pt = self.real_pt + FCB_EXTENDED_HEADER;
		} else {
			self.pt = self.real_pt;
		}
	}

	pub fn set_name(&self, mem: &mut dyn GuestMemory, drive: u8, name: [u8; 8], ext: [u8; 3]) {
		self.set(mem, FCB_DRIVE, drive);
		self.set(mem, FCB_FILENAME, name);
		self.set(mem, FCB_EXT, ext);
	}

	/// The name as "D:NNNNNNNN.EEE", with the padding left in.
	pub fn get_name(&self, mem: &dyn GuestMemory, default_drive: u8) -> Vec<u8> {
		let mut name = vec![b'A'.wrapping_add(self.get_drive(mem, default_drive)), b':'];
		name.extend_from_slice(&self.get(mem, FCB_FILENAME));
		name.push(b'.');
		name.extend_from_slice(&self.get(mem, FCB_EXT));
		name
	}

	pub fn set_size_date_time(&self, mem: &mut dyn GuestMemory, size: u32, date: u16, time: u16) {
		self.set(mem, FCB_FILESIZE, size);
		self.set(mem, FCB_DATE, date);
		self.set(mem, FCB_TIME, time);
	}

	pub fn get_size_date_time(&self, mem: &dyn GuestMemory) -> (u32, u16, u16) {
		(self.get(mem, FCB_FILESIZE), self.get(mem, FCB_DATE), self.get(mem, FCB_TIME))
	}

	pub fn set_record(&self, mem: &mut dyn GuestMemory, cur_block: u16, cur_rec: u8) {
		self.set(mem, FCB_CUR_BLOCK, cur_block);
		self.set(mem, FCB_CUR_REC, cur_rec);
	}

	pub fn get_record(&self, mem: &dyn GuestMemory) -> (u16, u8) {
		(self.get(mem, FCB_CUR_BLOCK), self.get(mem, FCB_CUR_REC))
	}

	pub fn get_seq_data(&self, mem: &dyn GuestMemory) -> (u8, u16) {
		(self.get(mem, FCB_FILE_HANDLE), self.get(mem, FCB_REC_SIZE))
	}

	pub fn set_random(&self, mem: &mut dyn GuestMemory, random: u32) {
		self.set(mem, FCB_RANDOM, random)
	}

	pub fn get_random(&self, mem: &dyn GuestMemory) -> u32 {
		self.get(mem, FCB_RANDOM)
	}

	/// Only extended FCBs carry an attribute; on a normal one this does nothing.
	pub fn set_attr(&self, mem: &mut dyn GuestMemory, attr: u8) {
		if self.extended {
			mem.write_u8(self.pt - 1, attr);
		}
	}

	pub fn get_attr(&self, mem: &dyn GuestMemory) -> Option<u8> {
		if self.extended {
			Some(mem.read_u8(self.pt - 1))
		} else {
			None
		}
	}

	/// Writes a directory search hit. The offsets are those of a directory entry, which is what
	/// FCB style find calls leave behind the drive byte.
	pub fn set_result(&self, mem: &mut dyn GuestMemory, size: u32, date: u16, time: u16, attr: u8) {
		mem.write_u32(self.pt + 0x1d, size);
		mem.write_u16(self.pt + 0x19, date);
		mem.write_u16(self.pt + 0x17, time);
		mem.write_u8(self.pt + 0x0c, attr);
	}

	/// Zero based drive, with drive byte 0 meaning the default drive.
	pub fn get_drive(&self, mem: &dyn GuestMemory, default_drive: u8) -> u8 {
		match self.get(mem, FCB_DRIVE) {
			0 => default_drive,
			drive => drive - 1,
		}
	}

	pub fn valid(&self, mem: &dyn GuestMemory) -> bool {
		let name = self.get(mem, FCB_FILENAME);
		!(name[0] == 0 && self.get(mem, FCB_FILE_HANDLE) == 0)
	}

	/// Byte offset of the current record in the file.
	pub fn record_position(&self, mem: &dyn GuestMemory) -> u32 {
		let (block, record) = self.get_record(mem);
		let record_size = self.get(mem, FCB_REC_SIZE);
		(block as u32 * FCB_BLOCK_RECORDS + record as u32) * record_size as u32
	}

	pub fn next_record(&self, mem: &mut dyn GuestMemory) {
		let (block, record) = self.get_record(mem);
		if record as u32 + 1 >= FCB_BLOCK_RECORDS {
			self.set_record(mem, block.wrapping_add(1), 0);
		} else {
			self.set_record(mem, block, record + 1);
		}
	}

	/// Points the current record at the random record number.
	pub fn seek_random(&self, mem: &mut dyn GuestMemory) -> u32 {
		let random = self.get_random(mem);
		self.set_record(mem, (random / FCB_BLOCK_RECORDS) as u16, (random % FCB_BLOCK_RECORDS) as u8);
		random
	}

	/// The random record number of the current record.
	pub fn random_from_record(&self, mem: &mut dyn GuestMemory) {
		let (block, record) = self.get_record(mem);
		self.set_random(mem, block as u32 * FCB_BLOCK_RECORDS + record as u32);
	}

	/// Records an opened SFT entry in the FCB. The random record field is left alone.
	pub fn file_open(&self, mem: &mut dyn GuestMemory, handle: u8, default_drive: u8, size: u32, date: u16, time: u16) {
		let drive = self.get_drive(mem, default_drive);
		self.set(mem, FCB_DRIVE, drive + 1);
		self.set(mem, FCB_FILE_HANDLE, handle);
		self.set(mem, FCB_CUR_BLOCK, 0);
		self.set(mem, FCB_REC_SIZE, FCB_DEFAULT_RECORD_SIZE);
		self.set_size_date_time(mem, size, date, time);
	}

	/// Detaches the SFT entry, returning it.
	pub fn file_close(&self, mem: &mut dyn GuestMemory) -> u8 {
		let handle = self.get(mem, FCB_FILE_HANDLE);
		self.set(mem, FCB_FILE_HANDLE, 0xff);
		handle
	}
}
