use crate::dos_error_codes::{DosErrorCode, MemoryError};
use crate::dos_file::{OPEN_NOT_INHERIT, OPEN_READ, OPEN_READWRITE};
use crate::dos_tables::{DOS_FIRST_SHELL, DOS_MEM_START};
use crate::exe_loader::MzHeader;
use crate::guest_memory::{phys_make, real_make, real_off, real_seg, real_to_phys, PhysPt, RealPt};
use crate::kernel::DosKernel;
use crate::mcb::{Mcb, MCB_NORMAL};
use crate::memory::long2para;
use crate::param_block::ParamBlock;
use crate::psp::{Psp, PSP_DEFAULT_FILES, PSP_UNUSED_HANDLE};
use crate::registers::{Flag, Reg, Registers, FLAGS_TEST_MASK};

use log::{debug, info, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

pub const EXEC_LOAD_AND_GO: u8 = 0;
pub const EXEC_LOAD: u8 = 1;
pub const EXEC_OVERLAY: u8 = 3;

const MAX_ENVIRONMENT: u32 = 32768;
const ENVIRONMENT_KEEP_FREE: u32 = 83;
const COM_MAX_IMAGE: usize = 0xffff - 256;
const MAX_PROGRAM_BYTES: usize = 0x100000;

const SHELL_ENVIRONMENT: u16 = DOS_FIRST_SHELL + 19;
const SHELL_NAME: &[u8] = b"C:\\COMMAND.COM";
const SHELL_STACK_BYTES: u16 = 2048;

// Pushed onto the caller's stack by EXEC in this order and popped again on termination.
const SAVED_REGISTERS: [Reg; 9] = [Reg::AX, Reg::CX, Reg::DX, Reg::BX, Reg::SI, Reg::DI, Reg::BP, Reg::DS, Reg::ES];
const SAVED_REGISTERS_BYTES: u16 = 18;

/// How the last child process ended, reported in AH by INT 21h AH=4Dh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ReturnMode {
	Exit = 0,
	CtrlC = 1,
	Abort = 2,
	Tsr = 3,
}

fn stack_pt(regs: &Registers, offset: u16) -> PhysPt {
	phys_make(regs.get_reg_u16(Reg::SS), regs.get_reg_u16(Reg::SP).wrapping_add(offset))
}

/// The name a program's MCB gets: the upper case file name without directory or extension.
pub fn program_mcb_name(name: &[u8]) -> Vec<u8> {
	let base = name.rsplit(|&c| c == b':' || c == b'\\' || c == b'/').next().unwrap_or(name);
	base.iter().take_while(|&&c| c != b'.').take(8).map(|c| c.to_ascii_uppercase()).collect()
}

impl DosKernel {
	/// Sets up COMMAND.COM's PSP and environment below the first MCB, along with the standard
	/// handles. The table starts 01 01 01 00 02: stdin, stdout and stderr share one CON entry.
	pub fn setup_first_shell(&mut self) -> Result<(), DosErrorCode> {
		let stack_segment = self.get_memory(SHELL_STACK_BYTES / 16)?;
		let version = self.config.version_word();
		let mem = &mut *self.mem;

		// INT 24h goes through a far jump in the shell's block, INT 23h to the INT 20h in its PSP.
		let int24 = mem.real_get_vec(0x24);
		let stub = phys_make(DOS_FIRST_SHELL + 17, 0);
		mem.write_u8(stub, 0xea);
		mem.write_u32(stub + 1, int24);
		mem.real_set_vec(0x24, real_make(DOS_FIRST_SHELL, 17 << 4));
		mem.real_set_vec(0x23, real_make(DOS_FIRST_SHELL, 0));

		let psp_mcb = Mcb::for_block(DOS_FIRST_SHELL);
		psp_mcb.write(mem, MCB_NORMAL, DOS_FIRST_SHELL, 0x10 + 2);
		psp_mcb.set_file_name(mem, b"COMMAND");
		Mcb::for_block(SHELL_ENVIRONMENT).write(mem, MCB_NORMAL, DOS_FIRST_SHELL, DOS_MEM_START - SHELL_ENVIRONMENT);

		let mut environment = b"PATH=C:\\\0COMSPEC=".to_vec();
		environment.extend_from_slice(SHELL_NAME);
		environment.extend_from_slice(b"\0\0\x01\0");
		environment.extend_from_slice(SHELL_NAME);
		environment.push(0);
		mem.block_write(phys_make(SHELL_ENVIRONMENT, 0), &environment);

		let psp = Psp::new(DOS_FIRST_SHELL);
		psp.make_new(mem, 0, DOS_FIRST_SHELL, version);
		psp.set_environment(mem, SHELL_ENVIRONMENT);
		psp.set_stack(mem, real_make(stack_segment, SHELL_STACK_BYTES - 2));
		psp.write_command_tail(mem, b"");
		self.set_current_psp(DOS_FIRST_SHELL);

		self.open_file(b"CON", OPEN_READWRITE)?;
		self.open_file(b"CON", OPEN_READWRITE)?;
		self.close_file(0)?;
		self.force_duplicate_entry(1, 0)?;
		self.force_duplicate_entry(1, 2)?;
		self.open_file(b"CON", OPEN_READWRITE)?;
		// No printer, so stdprn goes nowhere.
		self.open_file(b"NUL", OPEN_READWRITE)?;

		self.set_dta(real_make(DOS_FIRST_SHELL, 0x80));
		debug!("First shell at {:#06x}, environment at {:#06x}", DOS_FIRST_SHELL, SHELL_ENVIRONMENT);
		Ok(())
	}

	/// Registers for code running in the first shell: its segments and its stack.
	pub fn shell_registers(&self) -> Registers {
		let stack = Psp::new(DOS_FIRST_SHELL).get_stack(&*self.mem);
		let mut regs = Registers::new();
		for &seg in &[Reg::CS, Reg::DS, Reg::ES] {
			regs.set_reg_u16(seg, DOS_FIRST_SHELL);
		}
		regs.set_reg_u16(Reg::SS, real_seg(stack));
		regs.set_reg_u16(Reg::SP, real_off(stack));
		regs.set_flag(Flag::Interrupt, true);
		regs
	}

	/// What the CPU does on an INT instruction: push FLAGS, CS and IP.
	pub fn push_interrupt_frame(&mut self, regs: &mut Registers) {
		let sp = regs.get_reg_u16(Reg::SP).wrapping_sub(6);
		regs.set_reg_u16(Reg::SP, sp);
		self.mem.write_u16(stack_pt(regs, 0), regs.get_reg_u16(Reg::IP));
		self.mem.write_u16(stack_pt(regs, 2), regs.get_reg_u16(Reg::CS));
		self.mem.write_u16(stack_pt(regs, 4), regs.get_reg_u16(Reg::Flags));
	}

	fn save_registers(&mut self, regs: &mut Registers) {
		let sp = regs.get_reg_u16(Reg::SP).wrapping_sub(SAVED_REGISTERS_BYTES);
		regs.set_reg_u16(Reg::SP, sp);
		for (index, &reg) in SAVED_REGISTERS.iter().enumerate() {
			let pt = stack_pt(regs, index as u16 * 2);
			self.mem.write_u16(pt, regs.get_reg_u16(reg));
		}
	}

	fn restore_registers(&mut self, regs: &mut Registers) {
		for (index, &reg) in SAVED_REGISTERS.iter().enumerate() {
			let value = self.mem.read_u16(stack_pt(regs, index as u16 * 2));
			regs.set_reg_u16(reg, value);
		}
		let sp = regs.get_reg_u16(Reg::SP).wrapping_add(SAVED_REGISTERS_BYTES);
		regs.set_reg_u16(Reg::SP, sp);
	}

	/// Copies the first 20 handles of `source` into `psp`. A child only inherits handles that
	/// are open and not marked no-inherit, and each inherited handle counts as another reference.
	fn copy_file_table(&mut self, psp: Psp, source: Psp, child: bool) {
		for index in 0..PSP_DEFAULT_FILES {
			let handle = source.get_file_handle(&*self.mem, index);
			let handle = if child {
				match self.files.get_mut(handle as usize).and_then(|slot| slot.as_mut()) {
					Some(file) if file.flags & OPEN_NOT_INHERIT == 0 => {
						file.add_ref();
						handle
					}
					_ => PSP_UNUSED_HANDLE,
				}
			} else {
				handle
			};
			psp.set_file_handle(&mut *self.mem, index, handle);
		}
	}

	/// INT 21h AH=26h. The copy keeps the parent's handles without touching their counts.
	pub fn new_psp(&mut self, segment: u16, size: u16) {
		let parent = Psp::new(self.current_psp());
		let psp = Psp::new(segment);
		psp.make_new(&mut *self.mem, size, parent.segment(), self.config.version_word());
		self.copy_file_table(psp, parent, false);
		psp.set_command_tail(&mut *self.mem, real_make(parent.segment(), 0x80));
	}

	/// INT 21h AH=55h. The caller's registers are saved on its stack so that terminating the
	/// child returns there.
	pub fn child_psp(&mut self, segment: u16, size: u16, regs: &mut Registers) {
		let parent = Psp::new(self.current_psp());
		let psp = Psp::new(segment);
		psp.make_new(&mut *self.mem, size, parent.segment(), self.config.version_word());
		self.copy_file_table(psp, parent, true);
		let mem = &mut *self.mem;
		psp.set_command_tail(mem, real_make(parent.segment(), 0x80));
		psp.set_fcb1(mem, real_make(parent.segment(), 0x5c));
		psp.set_fcb2(mem, real_make(parent.segment(), 0x6c));
		let environment = parent.get_environment(mem);
		psp.set_environment(mem, environment);
		psp.set_size(mem, size);

		self.save_registers(regs);
		psp.set_stack(&mut *self.mem, real_make(regs.get_reg_u16(Reg::SS), regs.get_reg_u16(Reg::SP)));
		let sp = regs.get_reg_u16(Reg::SP).wrapping_add(SAVED_REGISTERS_BYTES);
		regs.set_reg_u16(Reg::SP, sp);
	}

	/// INT 21h AH=67h. Past 20 handles the table moves out of the PSP into kernel memory.
	pub fn set_num_files(&mut self, count: u16) -> Result<(), DosErrorCode> {
		let psp = Psp::new(self.current_psp());
		let count = count.max(PSP_DEFAULT_FILES);
		if count == PSP_DEFAULT_FILES {
			psp.set_max_files(&mut *self.mem, count);
			return Ok(());
		}
		let count = count.saturating_add(2);
		let table = self.get_memory(((count as u32 + 15) / 16) as u16)?;
		let mem = &mut *self.mem;
		let local = psp.get_local_files(mem);
		psp.set_file_table(mem, real_make(table, 0), count);
		mem.block_write(phys_make(table, 0), &local);
		mem.fill(phys_make(table, PSP_DEFAULT_FILES), PSP_UNUSED_HANDLE, (count - PSP_DEFAULT_FILES) as u32);
		debug!("PSP {:#06x} handle table grown to {} at {:#06x}", psp.segment(), count, table);
		Ok(())
	}

	/// Builds the environment for `name`: a copy of `source` (or the current process's when 0),
	/// then the word 1 and the program's full path.
	pub fn make_env(&mut self, name: &[u8], source: u16) -> Result<u16, DosErrorCode> {
		let source = if source == 0 { Psp::new(self.current_psp()).get_environment(&*self.mem) } else { source };
		let read = phys_make(source, 0);
		let mut size = 1;
		if source != 0 {
			size = 0;
			while self.mem.read_u16(read + size) != 0 {
				size += 1;
				if size >= MAX_ENVIRONMENT - ENVIRONMENT_KEEP_FREE {
					return self.fail(DosErrorCode::EnvironmentInvalid);
				}
			}
			size += 2;
		}
		let path = self.canonicalize(name)?;
		let segment = self.allocate_memory(long2para(size + ENVIRONMENT_KEEP_FREE)).map_err(|e| e.code())?;

		let mem = &mut *self.mem;
		let mut write = phys_make(segment, 0);
		if source != 0 {
			mem.block_copy(write, read, size);
			write += size;
		} else {
			mem.write_u8(write, 0);
			write += 1;
		}
		mem.write_u16(write, 1);
		write += 2;
		mem.block_write(write, &path);
		mem.write_u8(write + path.len() as u32, 0);
		Ok(segment)
	}

	fn read_program(&mut self, name: &[u8]) -> Result<Vec<u8>, DosErrorCode> {
		let entry = match self.open_file(name, OPEN_READ) {
			Ok(entry) => entry,
			Err(_) => return self.fail(DosErrorCode::FileNotFound),
		};
		let mut data = vec![];
		let mut buffer = vec![0; 0x8000];
		while data.len() < MAX_PROGRAM_BYTES {
			match self.read_file(entry, &mut buffer) {
				Ok(0) => break,
				Ok(count) => data.extend_from_slice(&buffer[..count]),
				Err(code) => {
					let _ = self.close_file(entry);
					return Err(code);
				}
			}
		}
		self.close_file(entry)?;
		if data.is_empty() {
			return self.fail(DosErrorCode::AccessDenied);
		}
		Ok(data)
	}

	/// Allocates the program's block: as much as is free up to what the program asks for.
	/// Returns the PSP segment and the block size.
	fn allocate_program(&mut self, header: Option<&MzHeader>, file_size: usize) -> Result<(u16, u16), DosErrorCode> {
		let max_free = match self.allocate_memory(0xffff) {
			Ok(segment) => {
				self.free_memory(segment)?;
				0xffff
			}
			Err(MemoryError::Insufficient { available }) => available,
			Err(MemoryError::Dos(code)) => return Err(code),
		};
		let (mut min, max) = header.map_or((0x1000, 0xffff), |header| header.memory_range());
		// A small COM file makes do with less than 64k.
		if max_free < min && header.is_none() && file_size < 0xf800 {
			min = (((file_size + 0x10) >> 4) + 0x20) as u16;
		}
		if max_free < min {
			return self.fail(DosErrorCode::InsufficientMemory);
		}
		let size = max_free.min(max);
		let psp = self.allocate_memory(size).map_err(|e| e.code())?;
		Ok((psp, size))
	}

	fn abandon_exec<T>(&mut self, blocks: &[u16], code: DosErrorCode) -> Result<T, DosErrorCode> {
		for &block in blocks {
			let _ = self.free_memory(block);
		}
		self.fail(code)
	}

	fn setup_process_psp(&mut self, segment: u16, size: u16, environment: u16) {
		let mem = &mut *self.mem;
		Mcb::for_block(segment).set_psp_segment(mem, segment);
		Mcb::for_block(environment).set_psp_segment(mem, segment);
		let psp = Psp::new(segment);
		let parent = Psp::new(self.current_psp());
		psp.make_new(&mut *self.mem, size, parent.segment(), self.config.version_word());
		psp.set_environment(&mut *self.mem, environment);
		self.copy_file_table(psp, parent, true);
	}

	/// INT 21h AH=4Bh. `flags` is AL: load and run, load only, or load an overlay. The block
	/// at `block_pt` holds the exec or overlay parameters. On a load and run the caller's
	/// registers end up on its stack, and `regs` are set up to continue at the program's
	/// entry point without popping an interrupt frame.
	pub fn execute(&mut self, name: &[u8], block_pt: PhysPt, flags: u8, regs: &mut Registers) -> Result<(), DosErrorCode> {
		let mut block = ParamBlock::new(block_pt);
		block.load_data(&*self.mem);
		let flags = flags & 0x7f;
		if flags != EXEC_LOAD_AND_GO && flags != EXEC_LOAD && flags != EXEC_OVERLAY {
			warn!("Unsupported execute mode {} for {}", flags, String::from_utf8_lossy(name));
			return self.fail(DosErrorCode::FormatInvalid);
		}

		let data = self.read_program(name)?;
		let header = MzHeader::parse(&data).ok();
		let relocations = match &header {
			Some(header) => match header.relocations(&data) {
				Ok(relocations) => relocations,
				Err(e) => {
					warn!("Bad relocation table in {}: {}", String::from_utf8_lossy(name), e);
					return self.fail(DosErrorCode::FormatInvalid);
				}
			},
			None => vec![],
		};
		let image = match &header {
			Some(header) => {
				let start = (header.header_size() as usize).min(data.len());
				let end = (start + header.image_size() as usize).min(data.len());
				&data[start..end]
			}
			None => &data[..data.len().min(COM_MAX_IMAGE)],
		};

		let (psp, mem_size, environment, load_segment) = if flags == EXEC_OVERLAY {
			(0, 0, 0, block.overlay.loadseg)
		} else {
			let environment = self.make_env(name, block.exec.envseg)?;
			let (psp, mem_size) = match self.allocate_program(header.as_ref(), data.len()) {
				Ok(allocation) => allocation,
				Err(code) => return self.abandon_exec(&[environment], code),
			};
			let block_end = psp as u32 + mem_size as u32;
			let mut load_segment = psp + 16;
			let needed = match &header {
				Some(header) => {
					let paragraphs = (header.image_size() + 0xf) / 0x10;
					if header.loads_high() {
						load_segment = (block_end.saturating_sub(paragraphs) as u16).max(psp + 16);
					}
					(load_segment as u32 - psp as u32) * 16 + header.image_size()
				}
				None => 256 + data.len() as u32,
			};
			if needed > mem_size as u32 * 16 {
				return self.abandon_exec(&[psp, environment], DosErrorCode::InsufficientMemory);
			}
			(psp, mem_size, environment, load_segment)
		};

		self.mem.block_write(phys_make(load_segment, 0), image);
		let relocation = if flags == EXEC_OVERLAY { block.overlay.relocation } else { load_segment };
		for &(offset, segment) in &relocations {
			let address = phys_make(segment.wrapping_add(load_segment), offset);
			let value = self.mem.read_u16(address).wrapping_add(relocation);
			self.mem.write_u16(address, value);
		}
		if flags == EXEC_OVERLAY {
			debug!("Overlay {} loaded at {:#06x}", String::from_utf8_lossy(name), load_segment);
			return Ok(());
		}

		let (csip, sssp): (RealPt, RealPt) = match &header {
			Some(header) => {
				let csip = real_make(load_segment.wrapping_add(header.initial_cs), header.initial_ip);
				let sssp = real_make(load_segment.wrapping_add(header.initial_ss), header.initial_sp);
				let limit = real_make(psp.wrapping_add(mem_size), 0);
				if csip >= limit || sssp >= limit {
					warn!("Entry point or stack of {} lies outside its memory block", String::from_utf8_lossy(name));
					return self.abandon_exec(&[psp, environment], DosErrorCode::FormatInvalid);
				}
				(csip, sssp)
			}
			None => {
				let block_bytes = mem_size as u32 * 16;
				let stack_sp = if 0xfffe >= block_bytes { (block_bytes - 2) as u16 } else { 0xfffe };
				self.mem.write_u16(phys_make(psp, stack_sp), 0);
				(real_make(psp, 0x100), real_make(psp, stack_sp))
			}
		};

		self.setup_process_psp(psp, mem_size, environment);
		Psp::new(psp).set_command_tail(&mut *self.mem, block.exec.cmdtail);
		info!("Executing {} at PSP {:#06x}, entry {:04x}:{:04x}", String::from_utf8_lossy(name), psp, real_seg(csip), real_off(csip));

		if flags == EXEC_LOAD {
			self.save_registers(regs);
			let caller = Psp::new(self.current_psp());
			caller.set_stack(&mut *self.mem, real_make(regs.get_reg_u16(Reg::SS), regs.get_reg_u16(Reg::SP)));
			let sp = regs.get_reg_u16(Reg::SP).wrapping_add(SAVED_REGISTERS_BYTES);
			regs.set_reg_u16(Reg::SP, sp);
			self.set_current_psp(psp);
			self.set_dta(real_make(psp, 0x80));
			// The word on top of the stack is what AX should hold at startup.
			let initial_sssp = real_make(real_seg(sssp), real_off(sssp).wrapping_sub(2));
			self.mem.write_u16(real_to_phys(initial_sssp), 0xffff);
			block.exec.initsssp = initial_sssp;
			block.exec.initcsip = csip;
			block.save_data(&mut *self.mem);
			return Ok(());
		}

		// The caller's return address becomes the child's termination address.
		let return_ip = self.mem.read_u16(stack_pt(regs, 0));
		let return_cs = self.mem.read_u16(stack_pt(regs, 2));
		self.mem.real_set_vec(0x22, real_make(return_cs, return_ip));
		self.save_registers(regs);
		let caller = Psp::new(self.current_psp());
		caller.set_stack(&mut *self.mem, real_make(regs.get_reg_u16(Reg::SS), regs.get_reg_u16(Reg::SP)));
		self.set_current_psp(psp);
		self.set_dta(real_make(psp, 0x80));
		let process = Psp::new(psp);
		let mem = &mut *self.mem;
		process.save_vectors(mem);
		process.set_fcb1(mem, block.exec.fcb1);
		process.set_fcb2(mem, block.exec.fcb2);
		Mcb::for_block(psp).set_file_name(mem, &program_mcb_name(name));

		regs.set_reg_u16(Reg::SS, real_seg(sssp));
		regs.set_reg_u16(Reg::SP, real_off(sssp));
		regs.set_reg_u16(Reg::CS, real_seg(csip));
		regs.set_reg_u16(Reg::IP, real_off(csip));
		let flags = (regs.get_reg_u16(Reg::Flags) & !FLAGS_TEST_MASK) | Flag::Interrupt.mask();
		regs.set_reg_u16(Reg::Flags, flags);
		regs.set_reg_u16(Reg::AX, 0);
		regs.set_reg_u16(Reg::BX, 0);
		regs.set_reg_u16(Reg::CX, 0xff);
		regs.set_reg_u16(Reg::DX, psp);
		regs.set_reg_u16(Reg::SI, real_off(csip));
		regs.set_reg_u16(Reg::DI, real_off(sssp));
		regs.set_reg_u16(Reg::BP, 0x91c);
		regs.set_reg_u16(Reg::DS, psp);
		regs.set_reg_u16(Reg::ES, psp);
		Ok(())
	}

	/// Ends the process at `psp` and returns to its parent. The parent's saved registers are
	/// restored and an interrupt frame to the INT 22h address is left on its stack, ready for
	/// an IRET. A process that is its own parent only records the code.
	pub fn terminate(&mut self, psp: u16, tsr: bool, code: u8, regs: &mut Registers) -> Result<(), DosErrorCode> {
		let mode = if tsr { ReturnMode::Tsr } else { ReturnMode::Exit };
		self.set_return_code(code, mode);
		let process = Psp::new(psp);
		let parent = process.get_parent(&*self.mem);
		if parent == psp {
			return Ok(());
		}

		if !tsr {
			self.set_current_psp(psp);
			for entry in 0..process.get_max_files(&*self.mem) {
				if process.get_file_handle(&*self.mem, entry) != PSP_UNUSED_HANDLE {
					let _ = self.close_file(entry);
				}
			}
		}
		let int22 = process.get_int22(&*self.mem);
		process.restore_vectors(&mut *self.mem);
		self.set_current_psp(parent);

		let stack = Psp::new(parent).get_stack(&*self.mem);
		regs.set_reg_u16(Reg::SS, real_seg(stack));
		regs.set_reg_u16(Reg::SP, real_off(stack));
		self.restore_registers(regs);
		self.mem.write_u16(stack_pt(regs, 0), real_off(int22));
		self.mem.write_u16(stack_pt(regs, 2), real_seg(int22));
		// IOPL 3, nested task and interrupts on.
		self.mem.write_u16(stack_pt(regs, 4), 0x7202);

		if !tsr {
			self.free_process_memory(psp)?;
		}
		info!("Process {:#06x} ended with code {} ({:?})", psp, code, mode);
		Ok(())
	}

	fn set_return_code(&mut self, code: u8, mode: ReturnMode) {
		self.sda.set_return_code(&mut *self.mem, code as u16 | ((mode as u16) << 8));
	}

	/// INT 21h AH=4Dh. Reading the code clears it.
	pub fn get_return_code(&mut self) -> (u8, ReturnMode) {
		let word = self.sda.get_return_code(&*self.mem);
		self.sda.set_return_code(&mut *self.mem, 0);
		let mode = ReturnMode::from_u8((word >> 8) as u8).unwrap_or(ReturnMode::Exit);
		(word as u8, mode)
	}
}
