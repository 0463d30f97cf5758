use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use std::io::Cursor;

// https://wiki.osdev.org/MZ

pub const EXE_SIGNATURE: u16 = 0x5a4d;
// Some linkers wrote the signature the other way around and DOS accepted it.
pub const EXE_SIGNATURE_SWAPPED: u16 = 0x4d5a;
pub const EXE_HEADER_BYTES: usize = 28;
const EXE_PARAGRAPH_BYTES: u32 = 16;
const EXE_BLOCK_BYTES: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExeLoadError {
	#[error("header is {0} bytes, shorter than an MZ header")]
	TooShort(usize),
	#[error("bad signature {0:#06x}")]
	BadSignature(u16),
	#[error("failed to read {field}: {message}")]
	Read { field: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MzHeader {
	pub signature: u16,
	pub last_block_bytes: u16,
	pub file_block_count: u16,
	pub relocation_items: u16,
	pub header_paragraph_count: u16,
	pub minimum_memory_paragraphs: u16,
	pub maximum_memory_paragraphs: u16,
	pub initial_ss: u16,
	pub initial_sp: u16,
	pub checksum: u16,
	pub initial_ip: u16,
	pub initial_cs: u16,
	pub relocation_table: u16,
	pub overlay: u16,
}

fn read_field(stream: &mut Cursor<&[u8]>, field: &'static str) -> Result<u16, ExeLoadError> {
	stream.read_u16::<LittleEndian>().map_err(|e| ExeLoadError::Read { field, message: e.to_string() })
}

impl MzHeader {
	/// Parses the first 28 bytes of a program. Anything that fails here gets loaded as a COM file.
	pub fn parse(data: &[u8]) -> Result<MzHeader, ExeLoadError> {
		if data.len() < EXE_HEADER_BYTES {
			return Err(ExeLoadError::TooShort(data.len()));
		}
		let mut stream = Cursor::new(data);
		let signature = read_field(&mut stream, "signature")?;
		if signature != EXE_SIGNATURE && signature != EXE_SIGNATURE_SWAPPED {
			return Err(ExeLoadError::BadSignature(signature));
		}
		Ok(MzHeader {
			signature,
			last_block_bytes: read_field(&mut stream, "last_block_bytes")?,
			file_block_count: read_field(&mut stream, "file_block_count")?,
			relocation_items: read_field(&mut stream, "relocation_items")?,
			header_paragraph_count: read_field(&mut stream, "header_paragraph_count")?,
			minimum_memory_paragraphs: read_field(&mut stream, "minimum_memory_paragraphs")?,
			maximum_memory_paragraphs: read_field(&mut stream, "maximum_memory_paragraphs")?,
			initial_ss: read_field(&mut stream, "initial_ss")?,
			initial_sp: read_field(&mut stream, "initial_sp")?,
			checksum: read_field(&mut stream, "checksum")?,
			initial_ip: read_field(&mut stream, "initial_ip")?,
			initial_cs: read_field(&mut stream, "initial_cs")?,
			relocation_table: read_field(&mut stream, "relocation_table")?,
			overlay: read_field(&mut stream, "overlay")?,
		})
	}

	pub fn header_size(&self) -> u32 {
		self.header_paragraph_count as u32 * EXE_PARAGRAPH_BYTES
	}

	/// Bytes of the load image. The partial last block is ignored and the block count is capped
	/// at 0x7ff, the way DOS itself sizes images. Tiny images are padded to one block.
	pub fn image_size(&self) -> u32 {
		let blocks = (self.file_block_count & 0x7ff) as u32;
		let header_size = self.header_size();
		let total = (blocks * EXE_BLOCK_BYTES).max(EXE_BLOCK_BYTES);
		total.saturating_sub(header_size)
	}

	/// Minimum and maximum paragraphs the program wants, PSP included. A zero maximum means all
	/// the memory there is.
	pub fn memory_range(&self) -> (u16, u16) {
		let base = self.image_size() + 256;
		let min = crate::memory::long2para(base + ((self.minimum_memory_paragraphs as u32) << 4));
		let max = if self.maximum_memory_paragraphs != 0 {
			crate::memory::long2para(base + ((self.maximum_memory_paragraphs as u32) << 4))
		} else {
			0xffff
		};
		(min, max)
	}

	/// Both limits zero asks for the program to be loaded at the top of its block.
	pub fn loads_high(&self) -> bool {
		self.minimum_memory_paragraphs == 0 && self.maximum_memory_paragraphs == 0
	}

	/// Reads the (offset, segment) pairs of the relocation table from `data`, which holds the
	/// whole file.
	pub fn relocations(&self, data: &[u8]) -> Result<Vec<(u16, u16)>, ExeLoadError> {
		let start = self.relocation_table as usize;
		let end = start + self.relocation_items as usize * 4;
		if data.len() < end {
			return Err(ExeLoadError::TooShort(data.len()));
		}
		let mut stream = Cursor::new(&data[start..end]);
		let mut entries = Vec::with_capacity(self.relocation_items as usize);
		for _ in 0..self.relocation_items {
			let offset = read_field(&mut stream, "relocation offset")?;
			let segment = read_field(&mut stream, "relocation segment")?;
			entries.push((offset, segment));
		}
		Ok(entries)
	}
}
