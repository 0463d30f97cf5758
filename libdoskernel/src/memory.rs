use crate::bios_loader::conventional_memory_paragraphs;
use crate::config::McbFaultStrategy;
use crate::dos_error_codes::{DosErrorCode, KernelFault, MemoryError};
use crate::dos_tables::DOS_MEM_START;
use crate::guest_memory::{phys_make, real_make, GuestMemory, PARAGRAPH_BYTES};
use crate::kernel::DosKernel;
use crate::mcb::{next_mcb, Mcb, MCB_DOS, MCB_FREE, MCB_LAST, MCB_NORMAL};

use log::{debug, error, warn};

/// Segment of the MCB that covers the gap between conventional memory and the first UMB.
pub const UMB_START_SEG: u16 = 0x9fff;
const UMB_FIRST_SEG: u16 = 0xd000;
const NO_UMB_CHAIN: u16 = 0xffff;
/// Conventional memory never extends past the video buffer.
const CONVENTIONAL_LIMIT: u32 = 0xa000;

// Allocation strategies for INT 21h AX=5801h. The low bits pick the fit, the high bits the area.
pub const MEM_FIRST_FIT: u16 = 0x00;
pub const MEM_BEST_FIT: u16 = 0x01;
pub const MEM_LAST_FIT: u16 = 0x02;
/// Try upper memory first, then conventional.
pub const MEM_HIGH_FIRST: u16 = 0x80;
/// Upper memory only.
pub const MEM_HIGH_ONLY: u16 = 0x40;
const MEM_FIT_MASK: u16 = 0x3f;
const MEM_AREA_MASK: u16 = 0xc0;

/// Bytes to paragraphs, rounding up.
pub fn long2para(size: u32) -> u16 {
	if size > 0xffff0 {
		0xffff
	} else if size & 0xf != 0 {
		((size >> 4) + 1) as u16
	} else {
		(size >> 4) as u16
	}
}

/// A snapshot of one MCB, for reports and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McbInfo {
	pub segment: u16,
	pub mcb_type: u8,
	pub psp_segment: u16,
	pub size: u16,
	pub name: String,
}

impl McbInfo {
	fn read(mem: &dyn GuestMemory, mcb: Mcb) -> McbInfo {
		McbInfo {
			segment: mcb.segment(),
			mcb_type: mcb.get_type(mem),
			psp_segment: mcb.get_psp_segment(mem),
			size: mcb.get_size(mem),
			name: mcb.file_name_string(mem),
		}
	}

	pub fn is_free(&self) -> bool {
		self.psp_segment == MCB_FREE
	}
}

/// Appends the intact blocks from `start` up to the last one.
fn walk_chain(mem: &dyn GuestMemory, start: u16, chain: &mut Vec<McbInfo>) {
	let mut mcb = Mcb::new(start);
	while mcb.has_valid_type(mem) {
		chain.push(McbInfo::read(mem, mcb));
		let next = mcb.next(mem);
		if mcb.is_last(mem) || next.segment() <= mcb.segment() {
			break;
		}
		mcb = next;
	}
}

/// Gives the first `blocks` paragraphs of a free block to `psp` and leaves the rest free.
fn split_block(mem: &mut dyn GuestMemory, mcb: Mcb, blocks: u16, psp: u16, name: &[u8]) {
	let size = mcb.get_size(mem);
	let rest = Mcb::new(next_mcb(mcb.segment(), blocks));
	let mcb_type = mcb.get_type(mem);
	rest.write(mem, mcb_type, MCB_FREE, size - blocks - 1);
	mcb.write(mem, MCB_NORMAL, psp, blocks);
	mcb.set_file_name(mem, name);
}

impl DosKernel {
	/// Lays out the MCB chain of a standard PC: a DOS device block, a few small blocks DOS keeps
	/// for itself and one free block reaching to the top of conventional memory.
	pub fn setup_memory(&mut self) {
		let mem = &mut *self.mem;
		// Some games compare these vectors against each other, so point them at a shared IRET.
		mem.write_u8(phys_make(0x70, 0xf4), 0xcf);
		for &vector in &[0x01, 0x02, 0x03, 0x04, 0x0f] {
			mem.real_set_vec(vector, real_make(0x70, 0xf4));
		}

		let total_paragraphs = mem.size() / PARAGRAPH_BYTES;
		let seg_limit = conventional_memory_paragraphs(mem).min(total_paragraphs).min(CONVENTIONAL_LIMIT) as u16;

		Mcb::new(DOS_MEM_START).write(mem, MCB_NORMAL, MCB_DOS, 1);
		Mcb::new(DOS_MEM_START + 2).write(mem, MCB_NORMAL, MCB_FREE, 4);
		Mcb::new(DOS_MEM_START + 7).write(mem, MCB_NORMAL, 0x40, 16);
		let free_start = DOS_MEM_START + 24;
		Mcb::new(free_start).write(mem, MCB_LAST, MCB_FREE, seg_limit.saturating_sub(free_start + 2));

		self.first_mcb = DOS_MEM_START;
		self.info_block.set_first_mcb(mem, DOS_MEM_START);
		self.disable_umb_chain();
		debug!("Conventional memory ends at {:#06x}", seg_limit);
	}

	/// Manages `paragraphs` paragraphs starting at `first` as one free block.
	pub fn init_mcb_chain(&mut self, first: u16, paragraphs: u16) {
		let mem = &mut *self.mem;
		Mcb::new(first).write(mem, MCB_LAST, MCB_FREE, paragraphs.saturating_sub(1));
		self.first_mcb = first;
		self.info_block.set_first_mcb(mem, first);
		self.disable_umb_chain();
	}

	pub fn first_mcb(&self) -> u16 {
		self.first_mcb
	}

	pub(crate) fn disable_umb_chain(&mut self) {
		self.info_block.set_start_of_umb_chain(&mut *self.mem, NO_UMB_CHAIN);
		self.info_block.set_umb_chain_state(&mut *self.mem, 0);
	}

	/// The start of the UMB chain when there is one.
	pub fn umb_chain_start(&self) -> Option<u16> {
		match self.info_block.get_start_of_umb_chain(&*self.mem) {
			UMB_START_SEG => Some(UMB_START_SEG),
			NO_UMB_CHAIN => None,
			start => {
				error!("Corrupt UMB chain: {:#06x}", start);
				None
			}
		}
	}

	pub fn umbs_linked(&self) -> bool {
		self.info_block.get_umb_chain_state(&*self.mem) & 1 != 0
	}

	/// Adds one UMB at D000 behind a system block covering the video memory. Gives up if memory
	/// is too small or conventional memory doesn't end where the cover has to go.
	pub fn build_umb_chain(&mut self) -> bool {
		let umb_size: u16 = if self.config.ems { 0x1000 } else { 0x2000 };
		let umb_end = (UMB_FIRST_SEG as u32 + umb_size as u32) * PARAGRAPH_BYTES;
		if !self.config.umb || self.config.memory_size_mb * 1024 < 1024 + 64 || self.mem.size() < umb_end {
			self.disable_umb_chain();
			return false;
		}

		let mut chain = vec![];
		walk_chain(&*self.mem, self.first_mcb, &mut chain);
		let cover = match chain.last() {
			Some(last) if last.mcb_type == MCB_LAST => next_mcb(last.segment, last.size),
			_ => {
				warn!("MCB chain is broken, not adding upper memory");
				self.disable_umb_chain();
				return false;
			}
		};
		if cover != UMB_START_SEG {
			warn!("Conventional memory ends at {:#06x}, not adding upper memory", cover);
			self.disable_umb_chain();
			return false;
		}

		let mem = &mut *self.mem;
		Mcb::new(UMB_FIRST_SEG).write(mem, MCB_LAST, MCB_FREE, umb_size - 1);
		let cover = Mcb::new(cover);
		cover.write(mem, MCB_NORMAL, MCB_DOS, UMB_FIRST_SEG - cover.segment() - 1);
		cover.set_file_name(mem, b"SC      ");
		self.info_block.set_start_of_umb_chain(mem, UMB_START_SEG);
		self.info_block.set_umb_chain_state(mem, 0);
		true
	}

	/// Splices the UMB chain into the conventional one (`state` 1) or cuts it off again (0).
	pub fn link_umbs_to_mem_chain(&mut self, state: u16) -> bool {
		let umb_start = match self.umb_chain_start() {
			Some(start) => start,
			None => return false,
		};
		if state & 1 == self.info_block.get_umb_chain_state(&*self.mem) as u16 & 1 {
			return true;
		}

		let mem = &mut *self.mem;
		let mut mcb = Mcb::new(self.first_mcb);
		let mut prev = mcb;
		while mcb.segment() != umb_start && !mcb.is_last(mem) {
			let next = mcb.next(mem);
			if next.segment() <= mcb.segment() {
				error!("MCB chain loops at {:#06x}", mcb.segment());
				return false;
			}
			prev = mcb;
			mcb = next;
		}

		match state {
			0 => {
				if prev.get_type(mem) == MCB_NORMAL && mcb.segment() == umb_start {
					prev.set_type(mem, MCB_LAST);
				}
				self.info_block.set_umb_chain_state(mem, 0);
			}
			1 => {
				if mcb.is_last(mem) {
					if next_mcb(mcb.segment(), mcb.get_size(mem)) != umb_start {
						warn!("MCB chain no longer reaches the end of conventional memory, not linking UMBs");
						return false;
					}
					mcb.set_type(mem, MCB_NORMAL);
					self.info_block.set_umb_chain_state(mem, 1);
				}
			}
			_ => return false,
		}
		true
	}

	/// Every intact block, conventional memory first.
	pub fn mcb_chain(&self) -> Vec<McbInfo> {
		let mut chain = vec![];
		walk_chain(&*self.mem, self.first_mcb, &mut chain);
		if let Some(umb_start) = self.umb_chain_start() {
			if !chain.iter().any(|info| info.segment == umb_start) {
				walk_chain(&*self.mem, umb_start, &mut chain);
			}
		}
		chain
	}

	/// The biggest free block the current strategy would search, as far as the chain is intact.
	pub fn largest_free_block(&self) -> u16 {
		let mut chain = vec![];
		walk_chain(&*self.mem, self.first_mcb, &mut chain);
		if let Some(umb_start) = self.umb_chain_start() {
			if self.mem_alloc_strategy & MEM_AREA_MASK != 0 && !chain.iter().any(|info| info.segment == umb_start) {
				walk_chain(&*self.mem, umb_start, &mut chain);
			}
		}
		chain.iter().filter(|info| info.is_free()).map(|info| info.size).max().unwrap_or(0)
	}

	pub(crate) fn check_fault(&mut self) -> Result<(), DosErrorCode> {
		if self.fault.is_some() {
			self.fail(DosErrorCode::McbDestroyed)
		} else {
			Ok(())
		}
	}

	/// Applies the configured fault strategy to a broken link after `last_good`. `Ok` means the
	/// chain was repaired and now ends at `last_good`.
	fn memory_fault(&mut self, last_good: Option<Mcb>, bad_segment: u16) -> Result<(), DosErrorCode> {
		match (self.config.fault_strategy, last_good) {
			(McbFaultStrategy::Repair, Some(last)) => {
				warn!("MCB chain broken at {:#06x}, truncating it at {:#06x}", bad_segment, last.segment());
				last.set_type(&mut *self.mem, MCB_LAST);
				Ok(())
			}
			(McbFaultStrategy::Fatal, _) => {
				let fault = KernelFault::McbChainCorrupted { segment: bad_segment };
				error!("{}", fault);
				for info in self.mcb_chain() {
					error!("  {:#06x} {} owner {:#06x} size {:#06x} {}", info.segment, info.mcb_type as char, info.psp_segment, info.size, info.name);
				}
				self.fault = Some(fault);
				self.fail(DosErrorCode::McbDestroyed)
			}
			_ => {
				warn!("MCB chain broken at {:#06x}", bad_segment);
				self.fail(DosErrorCode::McbDestroyed)
			}
		}
	}

	fn chain_start(&mut self, segment: u16) -> Result<Mcb, DosErrorCode> {
		let mcb = Mcb::new(segment);
		if !mcb.has_valid_type(&*self.mem) {
			self.memory_fault(None, segment)?;
		}
		Ok(mcb)
	}

	/// The block after `mcb`, or `None` once the chain ends.
	fn next_block(&mut self, mcb: Mcb) -> Result<Option<Mcb>, DosErrorCode> {
		if mcb.is_last(&*self.mem) {
			return Ok(None);
		}
		let next = mcb.next(&*self.mem);
		if next.segment() > mcb.segment() && next.has_valid_type(&*self.mem) {
			Ok(Some(next))
		} else {
			self.memory_fault(Some(mcb), next.segment())?;
			Ok(None)
		}
	}

	fn compress_chain(&mut self, start: u16) -> Result<(), DosErrorCode> {
		let mut mcb = self.chain_start(start)?;
		while let Some(next) = self.next_block(mcb)? {
			let mem = &mut *self.mem;
			if mcb.is_free(mem) && next.is_free(mem) {
				let size = mcb.get_size(mem).wrapping_add(next.get_size(mem)).wrapping_add(1);
				mcb.set_size(mem, size);
				let mcb_type = next.get_type(mem);
				mcb.set_type(mem, mcb_type);
			} else {
				mcb = next;
			}
		}
		Ok(())
	}

	/// Merges every run of adjacent free blocks into one.
	pub fn compress_memory(&mut self) -> Result<(), DosErrorCode> {
		self.check_fault()?;
		self.compress_chain(self.first_mcb)?;
		if let Some(umb_start) = self.umb_chain_start() {
			if !self.umbs_linked() {
				self.compress_chain(umb_start)?;
			}
		}
		Ok(())
	}

	/// Frees every block owned by `psp`, upper memory included.
	pub fn free_process_memory(&mut self, psp: u16) -> Result<(), DosErrorCode> {
		self.check_fault()?;
		let mut starts = vec![self.first_mcb];
		starts.extend(self.umb_chain_start());
		for start in starts {
			let mut mcb = Some(self.chain_start(start)?);
			while let Some(block) = mcb {
				if block.get_psp_segment(&*self.mem) == psp {
					block.set_psp_segment(&mut *self.mem, MCB_FREE);
				}
				mcb = self.next_block(block)?;
			}
		}
		self.compress_memory()
	}

	pub fn get_mem_alloc_strategy(&self) -> u16 {
		self.mem_alloc_strategy
	}

	/// Only first, best and last fit exist. Anything else is refused.
	pub fn set_mem_alloc_strategy(&mut self, strategy: u16) -> bool {
		if strategy & MEM_FIT_MASK < 3 {
			self.mem_alloc_strategy = strategy;
			true
		} else {
			false
		}
	}

	/// Allocates `blocks` paragraphs for the current PSP and returns the segment of the data.
	/// When nothing fits the error carries the largest free block.
	pub fn allocate_memory(&mut self, blocks: u16) -> Result<u16, MemoryError> {
		self.compress_memory()?;
		let psp = self.current_psp();
		let psp_name = Mcb::for_block(psp).get_file_name(&*self.mem);
		let umb_start = self.umb_chain_start();
		let mut strategy = self.mem_alloc_strategy;

		let start = match umb_start {
			Some(umb_start) if strategy & MEM_AREA_MASK != 0 => umb_start,
			_ => self.first_mcb,
		};
		let mut mcb = self.chain_start(start)?;
		let mut largest = 0;
		let mut found: Option<(Mcb, u16)> = None;
		loop {
			let mem = &mut *self.mem;
			if mcb.is_free(mem) {
				let block_size = mcb.get_size(mem);
				if block_size < blocks {
					largest = largest.max(block_size);
				} else if block_size == blocks && strategy & MEM_FIT_MASK < MEM_LAST_FIT {
					mcb.set_psp_segment(mem, psp);
					return Ok(mcb.data_segment());
				} else {
					match strategy & MEM_FIT_MASK {
						MEM_FIRST_FIT => {
							split_block(mem, mcb, blocks, psp, &psp_name);
							return Ok(mcb.data_segment());
						}
						MEM_BEST_FIT => {
							if found.map_or(true, |(_, found_size)| block_size < found_size) {
								found = Some((mcb, block_size));
							}
						}
						_ => found = Some((mcb, block_size)),
					}
				}
			}

			match self.next_block(mcb)? {
				Some(next) => mcb = next,
				None if strategy & MEM_HIGH_FIRST != 0 && umb_start.is_some() => {
					strategy &= !MEM_AREA_MASK;
					mcb = self.chain_start(self.first_mcb)?;
				}
				None => break,
			}
		}

		let (found_mcb, found_size) = match found {
			Some(found) => found,
			None => {
				self.set_error(DosErrorCode::InsufficientMemory);
				return Err(MemoryError::Insufficient { available: largest });
			}
		};
		let mem = &mut *self.mem;
		if strategy & MEM_FIT_MASK == MEM_BEST_FIT {
			split_block(mem, found_mcb, blocks, psp, &psp_name);
			Ok(found_mcb.data_segment())
		} else if found_size == blocks {
			found_mcb.set_psp_segment(mem, psp);
			found_mcb.set_file_name(mem, &psp_name);
			Ok(found_mcb.data_segment())
		} else {
			// Last fit takes the top of the block.
			let segment = found_mcb.data_segment().wrapping_add(found_size - blocks);
			let block = Mcb::for_block(segment);
			let mcb_type = found_mcb.get_type(mem);
			block.write(mem, mcb_type, psp, blocks);
			block.set_file_name(mem, &psp_name);
			found_mcb.write(mem, MCB_NORMAL, MCB_FREE, found_size - blocks - 1);
			Ok(segment)
		}
	}

	/// Shrinks or grows the block at `segment` in place. Growing only works into a free block
	/// right after it. If the request doesn't fit, the block is grown as far as it can go and the
	/// error carries that size.
	pub fn resize_memory(&mut self, segment: u16, blocks: u16) -> Result<u16, MemoryError> {
		self.check_fault()?;
		if segment < DOS_MEM_START + 1 {
			warn!("Resizing a block below the first MCB: {:#06x}", segment);
		}
		let mcb = Mcb::for_block(segment);
		if !mcb.has_valid_type(&*self.mem) {
			self.set_error(DosErrorCode::McbDestroyed);
			return Err(DosErrorCode::McbDestroyed.into());
		}

		self.compress_memory()?;
		let psp = self.current_psp();
		let mem = &mut *self.mem;
		let mut total = mcb.get_size(mem);
		let next = Mcb::new(segment.wrapping_add(total));
		if blocks <= total {
			if blocks == total {
				return Ok(blocks);
			}
			let rest = Mcb::new(segment.wrapping_add(blocks));
			let mcb_type = mcb.get_type(mem);
			rest.write(mem, mcb_type, MCB_FREE, total - blocks - 1);
			mcb.write(mem, MCB_NORMAL, psp, blocks);
			self.compress_memory()?;
			return Ok(blocks);
		}

		let joins_next = !mcb.is_last(mem) && next.is_free(mem);
		if joins_next {
			total = total.wrapping_add(next.get_size(mem)).wrapping_add(1);
		}
		if blocks < total {
			let next_type = next.get_type(mem);
			let rest = Mcb::new(segment.wrapping_add(blocks));
			rest.write(mem, next_type, MCB_FREE, total - blocks - 1);
			mcb.write(mem, MCB_NORMAL, psp, blocks);
			return Ok(blocks);
		}

		if joins_next {
			let mcb_type = next.get_type(mem);
			mcb.set_type(mem, mcb_type);
		}
		mcb.set_size(mem, total);
		mcb.set_psp_segment(mem, psp);
		if blocks == total {
			Ok(blocks)
		} else {
			self.set_error(DosErrorCode::InsufficientMemory);
			Err(MemoryError::Insufficient { available: total })
		}
	}

	/// Frees the block at `segment` without checking who owns it, then merges free neighbours.
	pub fn free_memory(&mut self, segment: u16) -> Result<(), DosErrorCode> {
		self.check_fault()?;
		let mcb = Mcb::for_block(segment);
		if segment < DOS_MEM_START + 1 || !mcb.has_valid_type(&*self.mem) {
			error!("Program tried to free {:#06x}", segment);
			return self.fail(DosErrorCode::MbAddressInvalid);
		}
		mcb.set_psp_segment(&mut *self.mem, MCB_FREE);
		self.compress_memory()
	}

	/// Paragraphs for kernel tables outside the MCB chain. They are never freed.
	pub fn get_memory(&mut self, paragraphs: u16) -> Result<u16, DosErrorCode> {
		let result = self.private_segment.get_memory(paragraphs);
		self.check(result)
	}
}
