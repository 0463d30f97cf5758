use crate::guest_memory::{real_to_phys, GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// http://stanislavs.org/helppc/int_21-4e.html

pub const DTA_SEARCH_DRIVE: Field<u8> = Field::at(0x00);
pub const DTA_SEARCH_NAME: Field<[u8; 8]> = Field::at(0x01);
pub const DTA_SEARCH_EXT: Field<[u8; 3]> = Field::at(0x09);
pub const DTA_SEARCH_ATTR: Field<u8> = Field::at(0x0c);
pub const DTA_DIR_ID: Field<u16> = Field::at(0x0d);
pub const DTA_DIR_CLUSTER: Field<u16> = Field::at(0x0f);
pub const DTA_FILL: Field<[u8; 4]> = Field::at(0x11);
pub const DTA_ATTR: Field<u8> = Field::at(0x15);
pub const DTA_TIME: Field<u16> = Field::at(0x16);
pub const DTA_DATE: Field<u16> = Field::at(0x18);
pub const DTA_SIZE: Field<u32> = Field::at(0x1a);
pub const DTA_NAME: Field<[u8; 13]> = Field::at(0x1e);
pub const DTA_BYTES: u32 = 0x2b;

const _: () = {
	assert!(packed(&DTA_SEARCH_DRIVE, &DTA_SEARCH_NAME));
	assert!(packed(&DTA_SEARCH_NAME, &DTA_SEARCH_EXT));
	assert!(packed(&DTA_SEARCH_EXT, &DTA_SEARCH_ATTR));
	assert!(packed(&DTA_SEARCH_ATTR, &DTA_DIR_ID));
	assert!(packed(&DTA_DIR_ID, &DTA_DIR_CLUSTER));
	assert!(packed(&DTA_DIR_CLUSTER, &DTA_FILL));
	assert!(packed(&DTA_FILL, &DTA_ATTR));
	assert!(packed(&DTA_ATTR, &DTA_TIME));
	assert!(packed(&DTA_TIME, &DTA_DATE));
	assert!(packed(&DTA_DATE, &DTA_SIZE));
	assert!(packed(&DTA_SIZE, &DTA_NAME));
	assert!(DTA_NAME.end() == DTA_BYTES);
};

/// What `find_first` stored for `find_next` to continue from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
	pub drive: u8,
	pub attr: u8,
	/// Space padded name and extension, as stored.
	pub name: [u8; 8],
	pub ext: [u8; 3],
}

impl SearchParams {
	/// The "NNNNNNNN.EEE" form DOS hands to the drive.
	pub fn padded_pattern(&self) -> [u8; 12] {
		let mut pattern = [b' '; 12];
		pattern[..8].copy_from_slice(&self.name);
		pattern[8] = b'.';
		pattern[9..].copy_from_slice(&self.ext);
		pattern
	}

	/// The pattern with the padding removed, eg. "*.TXT" or "README".
	pub fn pattern(&self) -> String {
		let name = String::from_utf8_lossy(&self.name).trim_end().to_string();
		let ext = String::from_utf8_lossy(&self.ext).trim_end().to_string();
		if ext.is_empty() {
			name
		} else {
			format!("{}.{}", name, ext)
		}
	}
}

/// One directory entry as it appears in the result half of a DTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtaResult {
	pub name: Vec<u8>,
	pub size: u32,
	pub date: u16,
	pub time: u16,
	pub attr: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dta {
	pt: PhysPt,
}

impl MemStruct for Dta {
	const SIZE: u32 = DTA_BYTES;
	fn pt(&self) -> PhysPt {
		self.pt
	}
}

impl Dta {
	pub fn new(pt: RealPt) -> Dta {
		Dta { pt: real_to_phys(pt) }
	}

	pub fn at_phys(pt: PhysPt) -> Dta {
		Dta { pt }
	}

	/// Stores the drive, attribute mask and pattern. The name part is cut at the first '.' and
	/// truncated to 8 characters, the extension to 3, and both are padded with spaces.
	pub fn setup_search(&self, mem: &mut dyn GuestMemory, drive: u8, attr: u8, pattern: &[u8]) {
		self.set(mem, DTA_SEARCH_DRIVE, drive);
		self.set(mem, DTA_SEARCH_ATTR, attr);
		let mut name = [b' '; 8];
		let mut ext = [b' '; 3];
		match pattern.iter().position(|&c| c == b'.') {
			Some(dot) => {
				let name_len = dot.min(8);
				name[..name_len].copy_from_slice(&pattern[..name_len]);
				let after_dot = &pattern[dot + 1..];
				let ext_len = after_dot.len().min(3);
				ext[..ext_len].copy_from_slice(&after_dot[..ext_len]);
			}
			None => {
				let name_len = pattern.len().min(8);
				name[..name_len].copy_from_slice(&pattern[..name_len]);
			}
		}
		self.set(mem, DTA_SEARCH_NAME, name);
		self.set(mem, DTA_SEARCH_EXT, ext);
	}

	pub fn get_search_params(&self, mem: &dyn GuestMemory) -> SearchParams {
		SearchParams {
			drive: self.get(mem, DTA_SEARCH_DRIVE),
			attr: self.get(mem, DTA_SEARCH_ATTR),
			name: self.get(mem, DTA_SEARCH_NAME),
			ext: self.get(mem, DTA_SEARCH_EXT),
		}
	}

	pub fn get_search_drive(&self, mem: &dyn GuestMemory) -> u8 {
		self.get(mem, DTA_SEARCH_DRIVE)
	}

	pub fn get_dir_id(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, DTA_DIR_ID)
	}

	pub fn set_dir_id(&self, mem: &mut dyn GuestMemory, id: u16) {
		self.set(mem, DTA_DIR_ID, id)
	}

	pub fn get_dir_id_cluster(&self, mem: &dyn GuestMemory) -> u16 {
		self.get(mem, DTA_DIR_CLUSTER)
	}

	pub fn set_dir_id_cluster(&self, mem: &mut dyn GuestMemory, cluster: u16) {
		self.set(mem, DTA_DIR_CLUSTER, cluster)
	}

	/// Writes a found entry. The name is NUL terminated and cut to 12 characters.
	pub fn set_result(&self, mem: &mut dyn GuestMemory, name: &[u8], size: u32, date: u16, time: u16, attr: u8) {
		let mut stored = [0u8; 13];
		let len = name.len().min(12);
		stored[..len].copy_from_slice(&name[..len]);
		self.set(mem, DTA_NAME, stored);
		self.set(mem, DTA_SIZE, size);
		self.set(mem, DTA_DATE, date);
		self.set(mem, DTA_TIME, time);
		self.set(mem, DTA_ATTR, attr);
	}

	pub fn get_result(&self, mem: &dyn GuestMemory) -> DtaResult {
		let stored = self.get(mem, DTA_NAME);
		let len = stored.iter().position(|&c| c == 0).unwrap_or(stored.len());
		DtaResult {
			name: stored[..len].to_vec(),
			size: self.get(mem, DTA_SIZE),
			date: self.get(mem, DTA_DATE),
			time: self.get(mem, DTA_TIME),
			attr: self.get(mem, DTA_ATTR),
		}
	}
}
