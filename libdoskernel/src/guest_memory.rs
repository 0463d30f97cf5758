use byteorder::{ByteOrder, LittleEndian};

/// Linear physical address inside guest memory.
pub type PhysPt = u32;
/// Real mode far pointer, segment in the high word and offset in the low word.
pub type RealPt = u32;

pub const PARAGRAPH_BYTES: u32 = 16;
pub const PAGE_BYTES: u32 = 4096;
pub const INTERRUPT_TABLE_ENTRY_BYTES: u32 = 4;

pub const fn phys_make(seg: u16, off: u16) -> PhysPt {
	((seg as u32) << 4) + off as u32
}

pub const fn real_make(seg: u16, off: u16) -> RealPt {
	((seg as u32) << 16) | off as u32
}

pub const fn real_seg(pt: RealPt) -> u16 {
	(pt >> 16) as u16
}

pub const fn real_off(pt: RealPt) -> u16 {
	(pt & 0xffff) as u16
}

pub const fn real_to_phys(pt: RealPt) -> PhysPt {
	phys_make(real_seg(pt), real_off(pt))
}

/// The flat address space the DOS layer reads and writes. Only byte access is required, wider
/// accesses are little-endian compositions of it.
///
/// Addresses past the end of the backing store read as 0xff and swallow writes, the same as an
/// unpopulated bus on real hardware.
pub trait GuestMemory: std::fmt::Debug {
	fn size(&self) -> u32;
	fn read_u8(&self, addr: PhysPt) -> u8;
	fn write_u8(&mut self, addr: PhysPt, value: u8);

	/// Number of 4KB pages of RAM.
	fn total_pages(&self) -> u32 {
		self.size() / PAGE_BYTES
	}

	fn read_u16(&self, addr: PhysPt) -> u16 {
		let mut buf = [0u8; 2];
		self.block_read(addr, &mut buf);
		LittleEndian::read_u16(&buf)
	}

	fn read_u32(&self, addr: PhysPt) -> u32 {
		let mut buf = [0u8; 4];
		self.block_read(addr, &mut buf);
		LittleEndian::read_u32(&buf)
	}

	fn write_u16(&mut self, addr: PhysPt, value: u16) {
		let mut buf = [0u8; 2];
		LittleEndian::write_u16(&mut buf, value);
		self.block_write(addr, &buf);
	}

	fn write_u32(&mut self, addr: PhysPt, value: u32) {
		let mut buf = [0u8; 4];
		LittleEndian::write_u32(&mut buf, value);
		self.block_write(addr, &buf);
	}

	fn block_read(&self, addr: PhysPt, destination: &mut [u8]) {
		for (i, byte) in destination.iter_mut().enumerate() {
			*byte = self.read_u8(addr.wrapping_add(i as u32));
		}
	}

	fn block_write(&mut self, addr: PhysPt, data: &[u8]) {
		for (i, byte) in data.iter().enumerate() {
			self.write_u8(addr.wrapping_add(i as u32), *byte);
		}
	}

	fn block_copy(&mut self, destination: PhysPt, source: PhysPt, len: u32) {
		let mut buf = vec![0u8; len as usize];
		self.block_read(source, &mut buf);
		self.block_write(destination, &buf);
	}

	fn fill(&mut self, addr: PhysPt, value: u8, len: u32) {
		for i in 0..len {
			self.write_u8(addr.wrapping_add(i), value);
		}
	}

	/// Reads bytes up to (not including) a NUL terminator, giving up after `max_len` bytes.
	fn read_null_terminated_string(&self, addr: PhysPt, max_len: usize) -> Vec<u8> {
		let mut result = vec![];
		for i in 0..max_len {
			let byte = self.read_u8(addr.wrapping_add(i as u32));
			if byte == 0 {
				break;
			}
			result.push(byte);
		}
		result
	}

	fn real_get_vec(&self, vector: u8) -> RealPt {
		self.read_u32(vector as u32 * INTERRUPT_TABLE_ENTRY_BYTES)
	}

	fn real_set_vec(&mut self, vector: u8, pt: RealPt) {
		self.write_u32(vector as u32 * INTERRUPT_TABLE_ENTRY_BYTES, pt);
	}
}

#[derive(Debug, Clone)]
pub struct FlatMemory {
	memory: Vec<u8>,
}

impl FlatMemory {
	pub fn new(size: usize) -> FlatMemory {
		FlatMemory {
			memory: vec![0; size],
		}
	}

	pub fn with_megabytes(megabytes: u32) -> FlatMemory {
		FlatMemory::new(megabytes as usize * 1024 * 1024)
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.memory
	}
}

impl GuestMemory for FlatMemory {
	fn size(&self) -> u32 {
		self.memory.len() as u32
	}

	fn read_u8(&self, addr: PhysPt) -> u8 {
		self.memory.get(addr as usize).copied().unwrap_or(0xff)
	}

	fn write_u8(&mut self, addr: PhysPt, value: u8) {
		if let Some(byte) = self.memory.get_mut(addr as usize) {
			*byte = value;
		}
	}

	fn block_read(&self, addr: PhysPt, destination: &mut [u8]) {
		let start = addr as usize;
		match self.memory.get(start..start + destination.len()) {
			Some(source) => destination.copy_from_slice(source),
			None => {
				for (i, byte) in destination.iter_mut().enumerate() {
					*byte = self.read_u8(addr.wrapping_add(i as u32));
				}
			}
		}
	}

	fn block_write(&mut self, addr: PhysPt, data: &[u8]) {
		let start = addr as usize;
		match self.memory.get_mut(start..start + data.len()) {
			Some(destination) => destination.copy_from_slice(data),
			None => {
				for (i, byte) in data.iter().enumerate() {
					self.write_u8(addr.wrapping_add(i as u32), *byte);
				}
			}
		}
	}
}
