use crate::dos_drive::DOS_DRIVES;
use crate::dos_error_codes::DosErrorCode;
use crate::guest_memory::{phys_make, real_make, real_to_phys, GuestMemory, RealPt};
use crate::info_block::{InfoBlock, DIB_FIRST_DPB};
use crate::mem_struct::MemStruct;
use crate::sda::Sda;

use log::error;

// Fixed segments of the kernel's own data, all below the first MCB.
pub const DOS_INFOBLOCK_SEG: u16 = 0x80;
pub const DOS_CONDRV_SEG: u16 = 0xa0;
pub const DOS_CONSTRING_SEG: u16 = 0xa8;
pub const DOS_SDA_SEG: u16 = 0xb2;
pub const DOS_SDA_OFS: u16 = 0;
pub const DOS_CDS_SEG: u16 = 0x108;
pub const DOS_FIRST_SHELL: u16 = 0x118;
pub const DOS_MEM_START: u16 = 0x16f;

/// Paragraphs handed out by `get_memory` for tables that live outside the MCB chain.
pub const DOS_PRIVATE_SEGMENT: u16 = 0xc800;
pub const DOS_PRIVATE_SEGMENT_END: u16 = 0xd000;

/// "CON " as a little endian dword.
const CON_NAME_DWORD: u32 = 0x204e4f43;
const CON_DRIVER_ATTRIBUTES: u16 = 0x8013;

/// Bump allocator over the kernel-private paragraphs. Nothing is ever given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateSegment {
	next: u16,
	end: u16,
}

impl PrivateSegment {
	pub fn new(start: u16, end: u16) -> PrivateSegment {
		PrivateSegment { next: start, end }
	}

	pub fn get_memory(&mut self, paragraphs: u16) -> Result<u16, DosErrorCode> {
		if self.next as u32 + paragraphs as u32 >= self.end as u32 {
			error!("Not enough memory for internal tables: {} paragraphs requested, {} left", paragraphs, self.remaining());
			return Err(DosErrorCode::InsufficientMemory);
		}
		let segment = self.next;
		self.next += paragraphs;
		Ok(segment)
	}

	pub fn remaining(&self) -> u16 {
		self.end.saturating_sub(self.next)
	}
}

impl Default for PrivateSegment {
	fn default() -> PrivateSegment {
		PrivateSegment::new(DOS_PRIVATE_SEGMENT, DOS_PRIVATE_SEGMENT_END)
	}
}

/// Where `setup_tables` put the odds and ends guest programs can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosTables {
	pub mediaid: RealPt,
	pub tempdta: RealPt,
	pub tempdta_fcbdelete: RealPt,
	pub dbcs: RealPt,
	pub fcb_table: RealPt,
	pub dpb: u16,
	pub disk_buffer_head: RealPt,
}

/// Writes the DOS information block, the SDA and the fake device, directory and buffer tables
/// hanging off them.
pub fn setup_tables(mem: &mut dyn GuestMemory, private: &mut PrivateSegment, info_block: &InfoBlock, sda: &Sda) -> Result<DosTables, DosErrorCode> {
	let mut tables = DosTables::default();
	tables.mediaid = real_make(private.get_memory(4)?, 0);
	tables.tempdta = real_make(private.get_memory(4)?, 0);
	tables.tempdta_fcbdelete = real_make(private.get_memory(4)?, 0);
	for drive in 0..DOS_DRIVES as u32 {
		mem.write_u16(real_to_phys(tables.mediaid) + drive * 2, 0);
	}

	let total_pages = mem.total_pages();
	info_block.set_location(mem, DOS_MEM_START, total_pages);
	sda.init(mem);

	// Programs that look for more than 20 handles scan for these.
	mem.write_u32(phys_make(DOS_CONSTRING_SEG, 0x0a), CON_NAME_DWORD);
	mem.write_u32(phys_make(DOS_CONSTRING_SEG, 0x1a), CON_NAME_DWORD);
	mem.write_u32(phys_make(DOS_CONSTRING_SEG, 0x2a), CON_NAME_DWORD);

	// CON device driver header
	mem.write_u32(phys_make(DOS_CONDRV_SEG, 0x00), 0xffffffff);
	mem.write_u16(phys_make(DOS_CONDRV_SEG, 0x04), CON_DRIVER_ATTRIBUTES);
	mem.write_u32(phys_make(DOS_CONDRV_SEG, 0x06), 0xffffffff);
	mem.write_u32(phys_make(DOS_CONDRV_SEG, 0x0a), CON_NAME_DWORD);
	mem.write_u32(phys_make(DOS_CONDRV_SEG, 0x0e), 0x20202020);
	info_block.set_device_chain_start(mem, real_make(DOS_CONDRV_SEG, 0));

	// Current directory structure with only "C:\" in it.
	mem.write_u32(phys_make(DOS_CDS_SEG, 0), 0x005c3a43);
	info_block.set_cur_dir_struct(mem, real_make(DOS_CDS_SEG, 0));

	// Empty double byte character set table
	tables.dbcs = real_make(private.get_memory(12)?, 0);
	mem.write_u32(real_to_phys(tables.dbcs), 0);

	tables.fcb_table = real_make(private.get_memory(4)?, 0);
	mem.write_u32(real_to_phys(tables.fcb_table), 0xffffffff);
	mem.write_u16(real_to_phys(tables.fcb_table) + 4, 100);
	info_block.set_fcb_table(mem, tables.fcb_table);

	// Drive parameter blocks, one byte per drive holding its number.
	tables.dpb = private.get_memory(2)?;
	for drive in 0..DOS_DRIVES as u16 {
		mem.write_u8(phys_make(tables.dpb, drive), drive as u8);
	}
	info_block.set(mem, DIB_FIRST_DPB, real_make(tables.dpb, 0));

	let buffer_seg = private.get_memory(6)?;
	mem.fill(phys_make(buffer_seg, 0), 0, 0x20);
	// Forward and backward links, "not in use", FAT count and DPB pointer.
	mem.write_u16(phys_make(buffer_seg, 0x00), 0xffff);
	mem.write_u16(phys_make(buffer_seg, 0x02), 0xffff);
	mem.write_u8(phys_make(buffer_seg, 0x04), 0xff);
	mem.write_u8(phys_make(buffer_seg, 0x0a), 0x01);
	mem.write_u32(phys_make(buffer_seg, 0x0d), 0xffffffff);
	tables.disk_buffer_head = real_make(buffer_seg, 0);
	info_block.set_disk_buffer_head_pt(mem, tables.disk_buffer_head);

	info_block.set_buffers(mem, 50, 50);
	Ok(tables)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::guest_memory::FlatMemory;
	use crate::info_block::DIB_MEM_ALLOC_SCAN_START;

	#[test] fn test_private_segment_exhaustion() {
		let mut private = PrivateSegment::new(0xc800, 0xc810);
		assert_eq!(private.get_memory(4), Ok(0xc800));
		assert_eq!(private.get_memory(8), Ok(0xc804));
		assert_eq!(private.remaining(), 4);
		assert_eq!(private.get_memory(4), Err(DosErrorCode::InsufficientMemory));
		assert_eq!(private.get_memory(3), Ok(0xc80c));
	}

	#[test] fn test_setup_tables() {
		let mut memory = FlatMemory::with_megabytes(1);
		let mut private = PrivateSegment::default();
		let info_block = InfoBlock::new(DOS_INFOBLOCK_SEG);
		let sda = Sda::new(DOS_SDA_SEG, DOS_SDA_OFS);
		let tables = setup_tables(&mut memory, &mut private, &info_block, &sda).unwrap();
		assert_eq!(tables.mediaid, real_make(0xc800, 0));
		assert_eq!(tables.tempdta, real_make(0xc804, 0));
		assert_eq!(tables.fcb_table, real_make(0xc818, 0));
		assert_eq!(tables.dpb, 0xc81c);
		assert_eq!(info_block.get(&memory, DIB_MEM_ALLOC_SCAN_START), DOS_MEM_START);
		assert_eq!(info_block.get_device_chain(&memory), real_make(DOS_CONDRV_SEG, 0));
		assert_eq!(memory.read_u16(phys_make(DOS_CONDRV_SEG, 4)), 0x8013);
		assert_eq!(&memory.as_slice()[0xa0a..0xa12], b"CON     ");
		assert_eq!(&memory.as_slice()[0x1080..0x1083], b"C:\\");
		assert_eq!(memory.read_u8(phys_make(0xc81c, 3)), 3);
		assert_eq!(memory.read_u16(real_to_phys(tables.disk_buffer_head)), 0xffff);
		assert_eq!(memory.read_u32(real_to_phys(tables.disk_buffer_head) + 0x0d), 0xffffffff);
		assert_eq!(memory.read_u8(phys_make(DOS_SDA_SEG, 2)), 0xff);
	}
}
