use crate::dos_error_codes::{DosErrorCode, MemoryError};
use crate::dos_file::FileAttributes;
use crate::dos_drive::DOS_DRIVES;
use crate::fcb::Fcb;
use crate::guest_memory::{phys_make, real_make, real_off, real_seg, PhysPt};
use crate::kernel::DosKernel;
use crate::process::EXEC_LOAD_AND_GO;
use crate::psp::Psp;
use crate::registers::{Flag, Reg, RegHalf, Registers};

use log::{debug, warn};

const DOS_PATH_LENGTH: usize = 80;
const STDIN: u16 = 0;
const STDOUT: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DosInterruptResult {
	/// Return to the caller with an IRET.
	ShouldReturn,
	/// A program was started: continue at CS:IP and leave the stack alone.
	ShouldJump,
	/// Console input was requested and there is none yet. Run the call again once there is.
	ShouldBlockForKeypress,
}

/// Entry point for the DOS interrupts. Registers are those of the interrupted program, with
/// its interrupt frame (IP, CS, FLAGS) on top of the stack.
#[derive(Debug)]
pub struct DosEventHandler {
	pub kernel: DosKernel,
	pub result: DosInterruptResult,
}

fn set_carry(regs: &mut Registers, result: Result<(), DosErrorCode>) {
	match result {
		Ok(()) => regs.set_flag(Flag::Carry, false),
		Err(error_code) => {
			regs.set_flag(Flag::Carry, true);
			regs.set_reg_u16(Reg::AX, error_code.code());
		}
	}
}

/// Like `set_carry`, with `on_ok` storing the result of a successful call.
fn finish<T, F>(regs: &mut Registers, result: Result<T, DosErrorCode>, on_ok: F)
	where F: FnOnce(&mut Registers, T)
{
	match result {
		Ok(value) => {
			regs.set_flag(Flag::Carry, false);
			on_ok(regs, value);
		}
		Err(error_code) => {
			regs.set_flag(Flag::Carry, true);
			regs.set_reg_u16(Reg::AX, error_code.code());
		}
	}
}

fn finish_memory(regs: &mut Registers, result: Result<u16, MemoryError>, success_ax: Option<u16>) {
	match result {
		Ok(segment) => {
			regs.set_flag(Flag::Carry, false);
			regs.set_reg_u16(Reg::AX, success_ax.unwrap_or(segment));
		}
		Err(MemoryError::Insufficient { available }) => {
			regs.set_flag(Flag::Carry, true);
			regs.set_reg_u16(Reg::AX, DosErrorCode::InsufficientMemory.code());
			regs.set_reg_u16(Reg::BX, available);
		}
		Err(MemoryError::Dos(error_code)) => {
			regs.set_flag(Flag::Carry, true);
			regs.set_reg_u16(Reg::AX, error_code.code());
		}
	}
}

impl DosEventHandler {
	pub fn new(kernel: DosKernel) -> DosEventHandler {
		DosEventHandler {
			kernel,
			result: DosInterruptResult::ShouldReturn,
		}
	}

	fn read_name(&self, regs: &Registers, seg: Reg, off: Reg) -> Vec<u8> {
		self.kernel.memory().read_null_terminated_string(regs.get_seg_reg(seg, off), DOS_PATH_LENGTH)
	}

	fn interrupt_frame_cs(&self, regs: &Registers) -> u16 {
		let sp = regs.get_reg_u16(Reg::SP).wrapping_add(2);
		self.kernel.memory().read_u16(phys_make(regs.get_reg_u16(Reg::SS), sp))
	}

	fn write_stdout(&mut self, data: &[u8]) {
		if let Err(error_code) = self.kernel.write_file(STDOUT, data) {
			debug!("Console write failed: {}", error_code);
		}
	}

	/// Reads one character from stdin, or asks to be called again when there is none.
	fn read_stdin(&mut self, regs: &mut Registers, echo: bool) {
		if !self.kernel.get_stdin_status() {
			self.result = DosInterruptResult::ShouldBlockForKeypress;
			return;
		}
		let mut c = [0u8];
		match self.kernel.read_file(STDIN, &mut c) {
			Ok(1) => {
				regs.set_reg_u8(Reg::AX, RegHalf::Low, c[0]);
				if echo {
					self.write_stdout(&c);
				}
			}
			_ => self.result = DosInterruptResult::ShouldBlockForKeypress,
		}
	}

	pub fn handle_interrupt(&mut self, regs: &mut Registers, interrupt_index: u8) -> DosInterruptResult {
		self.result = DosInterruptResult::ShouldReturn;
		match interrupt_index {
			0x20 => {
				let psp = self.interrupt_frame_cs(regs);
				let result = self.kernel.terminate(psp, false, 0, regs);
				set_carry(regs, result);
			}
			0x21 => self.handle_int21(regs),
			0x27 => {
				// Terminate and stay resident, keeping DX bytes.
				let psp = self.interrupt_frame_cs(regs);
				let bytes = regs.get_reg_u16(Reg::DX) as u32;
				let paragraphs = ((bytes + 15) / 16) as u16;
				if let Err(e) = self.kernel.resize_memory(psp, paragraphs) {
					warn!("TSR couldn't shrink its block to {} paragraphs: {}", paragraphs, e);
				}
				let result = self.kernel.terminate(psp, true, 0, regs);
				set_carry(regs, result);
			}
			_ => warn!("Unhandled interrupt {:#04x}", interrupt_index),
		}
		self.result
	}

	// http://spike.scu.edu.au/~barry/interrupts.html
	// http://stanislavs.org/helppc/int_21.html
	pub fn handle_int21(&mut self, regs: &mut Registers) {
		let dos_int = regs.get_reg_u8(Reg::AX, RegHalf::High);
		let al = regs.get_reg_u8(Reg::AX, RegHalf::Low);
		match dos_int {
			0x00 => {
				let psp = self.interrupt_frame_cs(regs);
				let result = self.kernel.terminate(psp, false, 0, regs);
				set_carry(regs, result);
			}
			0x01 => self.read_stdin(regs, true),
			0x02 => {
				let c = regs.get_reg_u8(Reg::DX, RegHalf::Low);
				self.write_stdout(&[c]);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, c);
			}
			0x07 | 0x08 => self.read_stdin(regs, false),
			0x09 => {
				// Print the string at DS:DX up to a '$'.
				let mut addr = regs.get_seg_reg(Reg::DS, Reg::DX);
				let mut text = vec![];
				loop {
					let c = self.kernel.memory().read_u8(addr);
					if c == b'$' || text.len() >= 0x10000 {
						break;
					}
					text.push(c);
					addr += 1;
				}
				self.write_stdout(&text);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, b'$');
			}
			0x0b => {
				let ready = if self.kernel.get_stdin_status() { 0xff } else { 0 };
				regs.set_reg_u8(Reg::AX, RegHalf::Low, ready);
			}
			0x0e => {
				self.kernel.set_default_drive(regs.get_reg_u8(Reg::DX, RegHalf::Low));
				regs.set_reg_u8(Reg::AX, RegHalf::Low, DOS_DRIVES as u8);
			}
			0x0f | 0x10 | 0x16 | 0x23 => {
				// FCB open, close, create and file size report in AL only.
				let fcb = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				let result = match dos_int {
					0x0f => self.kernel.fcb_open(fcb),
					0x10 => self.kernel.fcb_close(fcb),
					0x16 => self.kernel.fcb_create(fcb),
					_ => self.kernel.fcb_get_file_size(fcb),
				};
				regs.set_reg_u8(Reg::AX, RegHalf::Low, if result.is_ok() { 0 } else { 0xff });
			}
			0x14 | 0x15 => {
				let fcb = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				let status = if dos_int == 0x14 { self.kernel.fcb_read(fcb, 0) } else { self.kernel.fcb_write(fcb, 0) };
				debug!("FCB sequential {} gave {:?}", if dos_int == 0x14 { "read" } else { "write" }, status);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, status as u8);
			}
			0x21 | 0x22 | 0x27 | 0x28 => {
				// Single random records, or CX records for the block calls.
				let fcb = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				let block = dos_int >= 0x27;
				let mut count = if block { regs.get_reg_u16(Reg::CX) } else { 1 };
				let status = if dos_int & 1 != 0 {
					self.kernel.fcb_random_read(fcb, &mut count, !block)
				} else {
					self.kernel.fcb_random_write(fcb, &mut count, !block)
				};
				if block {
					regs.set_reg_u16(Reg::CX, count);
				}
				regs.set_reg_u8(Reg::AX, RegHalf::Low, status as u8);
			}
			0x24 => {
				let fcb = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				Fcb::new(self.kernel.memory(), fcb, true).random_from_record(self.kernel.memory_mut());
			}
			0x19 => {
				let drive = self.kernel.get_default_drive();
				regs.set_reg_u8(Reg::AX, RegHalf::Low, drive);
			}
			0x1a => {
				let dta = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				self.kernel.set_dta(dta);
			}
			0x25 => {
				// Store DS:DX as interrupt vector AL.
				let handler = real_make(regs.get_reg_u16(Reg::DS), regs.get_reg_u16(Reg::DX));
				self.kernel.memory_mut().real_set_vec(al, handler);
			}
			0x26 => {
				let current = self.kernel.current_psp();
				let size = Psp::new(current).get_size(self.kernel.memory()).wrapping_sub(current);
				self.kernel.new_psp(regs.get_reg_u16(Reg::DX), size);
			}
			0x2f => {
				let dta = self.kernel.get_dta();
				regs.set_reg_u16(Reg::ES, real_seg(dta));
				regs.set_reg_u16(Reg::BX, real_off(dta));
			}
			0x30 => {
				let (major, minor) = self.kernel.config.dos_version;
				regs.set_reg_u8(Reg::AX, RegHalf::Low, major);
				regs.set_reg_u8(Reg::AX, RegHalf::High, minor);
				regs.set_reg_u16(Reg::BX, 0xff00);
				regs.set_reg_u16(Reg::CX, 0);
			}
			0x31 => {
				let psp = self.kernel.current_psp();
				let keep = regs.get_reg_u16(Reg::DX);
				if let Err(e) = self.kernel.resize_memory(psp, keep) {
					warn!("TSR couldn't shrink its block to {} paragraphs: {}", keep, e);
				}
				let result = self.kernel.terminate(psp, true, al, regs);
				set_carry(regs, result);
			}
			0x33 => match al {
				// Ctrl-Break checking is never on.
				0x00 => regs.set_reg_u8(Reg::DX, RegHalf::Low, 0),
				0x01 => {}
				0x05 => regs.set_reg_u8(Reg::DX, RegHalf::Low, 3),
				0x06 => {
					let (major, minor) = self.kernel.config.dos_version;
					regs.set_reg_u8(Reg::BX, RegHalf::Low, major);
					regs.set_reg_u8(Reg::BX, RegHalf::High, minor);
					regs.set_reg_u16(Reg::DX, 0x1000);
				}
				_ => {
					warn!("Unhandled INT 21h AX={:#06x}", regs.get_reg_u16(Reg::AX));
					regs.set_reg_u8(Reg::AX, RegHalf::Low, 0xff);
				}
			},
			0x35 => {
				let vector = self.kernel.memory().real_get_vec(al);
				regs.set_reg_u16(Reg::ES, real_seg(vector));
				regs.set_reg_u16(Reg::BX, real_off(vector));
			}
			0x36 => {
				let drive = match regs.get_reg_u8(Reg::DX, RegHalf::Low) {
					0 => self.kernel.get_default_drive(),
					dl => dl - 1,
				};
				match self.kernel.mounted(drive).map(|mounted| mounted.drive.allocation_info()) {
					Some(info) => {
						regs.set_reg_u16(Reg::AX, info.sectors_per_cluster as u16);
						regs.set_reg_u16(Reg::BX, info.free_clusters);
						regs.set_reg_u16(Reg::CX, info.bytes_per_sector);
						regs.set_reg_u16(Reg::DX, info.total_clusters);
					}
					None => {
						self.kernel.set_error(DosErrorCode::InvalidDrive);
						regs.set_reg_u16(Reg::AX, 0xffff);
					}
				}
			}
			0x39 | 0x3a | 0x3b | 0x41 => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let result = match dos_int {
					0x39 => self.kernel.make_dir(&name),
					0x3a => self.kernel.remove_dir(&name),
					0x3b => self.kernel.change_dir(&name),
					_ => self.kernel.unlink_file(&name),
				};
				set_carry(regs, result);
			}
			0x3c => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let attributes = FileAttributes::from_bits_truncate(regs.get_reg_u8(Reg::CX, RegHalf::Low));
				let result = self.kernel.create_file(&name, attributes);
				finish(regs, result, |regs, handle| regs.set_reg_u16(Reg::AX, handle));
			}
			0x3d => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let result = self.kernel.open_file(&name, al);
				finish(regs, result, |regs, handle| regs.set_reg_u16(Reg::AX, handle));
			}
			0x3e => {
				let result = self.kernel.close_file(regs.get_reg_u16(Reg::BX)).map(|_| ());
				set_carry(regs, result);
			}
			0x3f => {
				let handle = regs.get_reg_u16(Reg::BX);
				if handle == STDIN && self.kernel.open_file_entry(self.kernel.real_handle(STDIN)).map_or(false, |file| file.is_device()) && !self.kernel.get_stdin_status() {
					self.result = DosInterruptResult::ShouldBlockForKeypress;
					return;
				}
				let mut buffer = vec![0; regs.get_reg_u16(Reg::CX) as usize];
				let destination = regs.get_seg_reg(Reg::DS, Reg::DX);
				let result = self.kernel.read_file(handle, &mut buffer);
				if let Ok(count) = result {
					self.kernel.memory_mut().block_write(destination, &buffer[..count]);
				}
				finish(regs, result, |regs, count| regs.set_reg_u16(Reg::AX, count as u16));
			}
			0x40 => {
				let mut buffer = vec![0; regs.get_reg_u16(Reg::CX) as usize];
				self.kernel.memory().block_read(regs.get_seg_reg(Reg::DS, Reg::DX), &mut buffer);
				let result = self.kernel.write_file(regs.get_reg_u16(Reg::BX), &buffer);
				finish(regs, result, |regs, count| regs.set_reg_u16(Reg::AX, count as u16));
			}
			0x42 => {
				let offset = ((regs.get_reg_u16(Reg::CX) as u32) << 16) | regs.get_reg_u16(Reg::DX) as u32;
				let result = self.kernel.seek_file(regs.get_reg_u16(Reg::BX), offset as i32, al);
				finish(regs, result, |regs, position| {
					regs.set_reg_u16(Reg::AX, position as u16);
					regs.set_reg_u16(Reg::DX, (position >> 16) as u16);
				});
			}
			0x43 => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let result = self.kernel.get_file_attr(&name);
				match al {
					0x00 => finish(regs, result, |regs, attr| {
						regs.set_reg_u16(Reg::CX, attr.bits() as u16);
						regs.set_reg_u16(Reg::AX, attr.bits() as u16);
					}),
					0x01 => {
						// The drives don't store attributes, so setting one only checks the file is there.
						debug!("Ignoring attributes {:#x} for {}", regs.get_reg_u16(Reg::CX), String::from_utf8_lossy(&name));
						set_carry(regs, result.map(|_| ()));
					}
					_ => {
						self.kernel.set_error(DosErrorCode::FunctionNumberInvalid);
						set_carry(regs, Err(DosErrorCode::FunctionNumberInvalid));
					}
				}
			}
			0x44 => {
				let result = self.kernel.ioctl(regs);
				set_carry(regs, result);
			}
			0x45 => {
				let result = self.kernel.duplicate_entry(regs.get_reg_u16(Reg::BX));
				finish(regs, result, |regs, handle| regs.set_reg_u16(Reg::AX, handle));
			}
			0x46 => {
				let result = self.kernel.force_duplicate_entry(regs.get_reg_u16(Reg::BX), regs.get_reg_u16(Reg::CX));
				set_carry(regs, result);
			}
			0x47 => {
				let result = self.kernel.get_current_dir(regs.get_reg_u8(Reg::DX, RegHalf::Low));
				if let Ok(dir) = &result {
					let destination = regs.get_seg_reg(Reg::DS, Reg::SI);
					let mem = self.kernel.memory_mut();
					mem.block_write(destination, dir);
					mem.write_u8(destination + dir.len() as u32, 0);
				}
				finish(regs, result, |regs, _| regs.set_reg_u16(Reg::AX, 0x0100));
			}
			0x48 => {
				let result = self.kernel.allocate_memory(regs.get_reg_u16(Reg::BX));
				if let Err(MemoryError::Dos(_)) = result {
					regs.set_reg_u16(Reg::BX, self.kernel.largest_free_block());
				}
				finish_memory(regs, result, None);
			}
			0x49 => {
				let result = self.kernel.free_memory(regs.get_reg_u16(Reg::ES));
				set_carry(regs, result);
			}
			0x4a => {
				let segment = regs.get_reg_u16(Reg::ES);
				let result = self.kernel.resize_memory(segment, regs.get_reg_u16(Reg::BX));
				finish_memory(regs, result, Some(segment));
			}
			0x4b => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let block: PhysPt = regs.get_seg_reg(Reg::ES, Reg::BX);
				match self.kernel.execute(&name, block, al, regs) {
					Ok(()) if al & 0x7f == EXEC_LOAD_AND_GO => self.result = DosInterruptResult::ShouldJump,
					result => set_carry(regs, result),
				}
			}
			0x4c => {
				let psp = self.kernel.current_psp();
				let result = self.kernel.terminate(psp, false, al, regs);
				set_carry(regs, result);
			}
			0x4d => {
				let (code, mode) = self.kernel.get_return_code();
				regs.set_reg_u8(Reg::AX, RegHalf::Low, code);
				regs.set_reg_u8(Reg::AX, RegHalf::High, mode as u8);
				regs.set_flag(Flag::Carry, false);
			}
			0x4e => {
				let name = self.read_name(regs, Reg::DS, Reg::DX);
				let result = self.kernel.find_first(&name, regs.get_reg_u8(Reg::CX, RegHalf::Low));
				set_carry(regs, result);
			}
			0x4f => {
				let result = self.kernel.find_next();
				set_carry(regs, result);
			}
			0x50 => self.kernel.set_current_psp(regs.get_reg_u16(Reg::BX)),
			0x51 | 0x62 => {
				let psp = self.kernel.current_psp();
				regs.set_reg_u16(Reg::BX, psp);
			}
			0x52 => {
				let list = self.kernel.info_block().get_pointer();
				regs.set_reg_u16(Reg::ES, real_seg(list));
				regs.set_reg_u16(Reg::BX, real_off(list));
			}
			0x55 => {
				let segment = regs.get_reg_u16(Reg::DX);
				self.kernel.child_psp(segment, regs.get_reg_u16(Reg::SI), regs);
				self.kernel.set_current_psp(segment);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, 0xf0);
			}
			0x56 => {
				let old_name = self.read_name(regs, Reg::DS, Reg::DX);
				let new_name = self.read_name(regs, Reg::ES, Reg::DI);
				let result = self.kernel.rename(&old_name, &new_name);
				set_carry(regs, result);
			}
			0x58 => self.handle_allocation_strategy(regs, al),
			0x59 => {
				let error_code = self.kernel.last_error();
				let not_found = error_code == Some(DosErrorCode::FileNotFound) || error_code == Some(DosErrorCode::PathNotFound);
				regs.set_reg_u16(Reg::AX, error_code.map_or(0, |code| code.code()));
				regs.set_reg_u8(Reg::BX, RegHalf::High, if not_found { 8 } else { 0 });
				regs.set_reg_u8(Reg::BX, RegHalf::Low, 1);
				regs.set_reg_u8(Reg::CX, RegHalf::High, 0);
			}
			0x5c => {
				let start = ((regs.get_reg_u16(Reg::CX) as u32) << 16) | regs.get_reg_u16(Reg::DX) as u32;
				let len = ((regs.get_reg_u16(Reg::SI) as u32) << 16) | regs.get_reg_u16(Reg::DI) as u32;
				let result = self.kernel.lock_file(regs.get_reg_u16(Reg::BX), al, start, len);
				set_carry(regs, result);
			}
			0x67 => {
				let result = self.kernel.set_num_files(regs.get_reg_u16(Reg::BX));
				set_carry(regs, result);
			}
			0x6c => {
				if al != 0 {
					self.kernel.set_error(DosErrorCode::FunctionNumberInvalid);
					set_carry(regs, Err(DosErrorCode::FunctionNumberInvalid));
					return;
				}
				let name = self.read_name(regs, Reg::DS, Reg::SI);
				let attributes = FileAttributes::from_bits_truncate(regs.get_reg_u8(Reg::CX, RegHalf::Low));
				let result = self.kernel.open_file_extended(&name, regs.get_reg_u16(Reg::BX), attributes, regs.get_reg_u16(Reg::DX));
				finish(regs, result, |regs, (handle, status)| {
					regs.set_reg_u16(Reg::AX, handle);
					regs.set_reg_u16(Reg::CX, status as u16);
				});
			}
			_ => {
				warn!("Unhandled INT 21h AH={:#04x} AL={:#04x}", dos_int, al);
				self.kernel.set_error(DosErrorCode::FunctionNumberInvalid);
				set_carry(regs, Err(DosErrorCode::FunctionNumberInvalid));
			}
		}
	}

	fn handle_allocation_strategy(&mut self, regs: &mut Registers, al: u8) {
		match al {
			0x00 => {
				let strategy = self.kernel.get_mem_alloc_strategy();
				regs.set_reg_u16(Reg::AX, strategy);
				regs.set_flag(Flag::Carry, false);
			}
			0x01 => {
				let ok = self.kernel.set_mem_alloc_strategy(regs.get_reg_u16(Reg::BX));
				regs.set_flag(Flag::Carry, !ok);
				if !ok {
					regs.set_reg_u16(Reg::AX, 1);
				}
			}
			0x02 => {
				let linked = self.kernel.umbs_linked();
				regs.set_reg_u8(Reg::AX, RegHalf::Low, linked as u8);
				regs.set_flag(Flag::Carry, false);
			}
			0x03 => {
				let ok = self.kernel.link_umbs_to_mem_chain(regs.get_reg_u16(Reg::BX));
				regs.set_flag(Flag::Carry, !ok);
				if !ok {
					regs.set_reg_u16(Reg::AX, 1);
				}
			}
			_ => {
				warn!("Unhandled INT 21h AX={:#06x}", regs.get_reg_u16(Reg::AX));
				self.kernel.set_error(DosErrorCode::FunctionNumberInvalid);
				set_carry(regs, Err(DosErrorCode::FunctionNumberInvalid));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::McbFaultStrategy;
	use crate::dos_tables::DOS_FIRST_SHELL;
	use crate::kernel::tests::test_kernel;
	use crate::memory_drive::MemoryDrive;
	use crate::param_block::ParamBlock;
	use crate::process::ReturnMode;

	const NAME: PhysPt = phys_make(0x3000, 0);
	const BUFFER: PhysPt = phys_make(0x3000, 0x100);

	fn handler(files: &[(&[u8], &[u8])]) -> (DosEventHandler, Registers) {
		let mut kernel = test_kernel();
		let mut drive = MemoryDrive::with_label(b"EMULATED");
		for (path, contents) in files {
			drive.add_file(path, contents).unwrap();
		}
		kernel.unmount_drive(2);
		kernel.mount_drive(2, Box::new(drive)).unwrap();
		kernel.boot().unwrap();
		let mut regs = kernel.shell_registers();
		regs.set_reg_u16(Reg::IP, 0x0200);
		kernel.push_interrupt_frame(&mut regs);
		regs.set_reg_u16(Reg::DS, 0x3000);
		regs.set_reg_u16(Reg::ES, 0x3000);
		(DosEventHandler::new(kernel), regs)
	}

	fn call(handler: &mut DosEventHandler, regs: &mut Registers, ax: u16) -> DosInterruptResult {
		regs.set_reg_u16(Reg::AX, ax);
		handler.handle_interrupt(regs, 0x21)
	}

	fn write_name(handler: &mut DosEventHandler, name: &[u8]) {
		let mem = handler.kernel.memory_mut();
		mem.block_write(NAME, name);
		mem.write_u8(NAME + name.len() as u32, 0);
	}

	#[test] fn test_open_read_close() {
		let (mut handler, mut regs) = handler(&[(&b"README.TXT"[..], &b"hello world"[..])]);
		write_name(&mut handler, b"readme.txt");
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x3d00);
		assert!(!regs.get_flag(Flag::Carry));
		let handle = regs.get_reg_u16(Reg::AX);
		assert_eq!(handle, 5);

		regs.set_reg_u16(Reg::BX, handle);
		regs.set_reg_u16(Reg::CX, 5);
		regs.set_reg_u16(Reg::DX, 0x100);
		call(&mut handler, &mut regs, 0x3f00);
		assert_eq!(regs.get_reg_u16(Reg::AX), 5);
		let mut data = [0; 5];
		handler.kernel.memory().block_read(BUFFER, &mut data);
		assert_eq!(&data, b"hello");

		regs.set_reg_u16(Reg::CX, 0);
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x4202);
		assert_eq!((regs.get_reg_u16(Reg::DX), regs.get_reg_u16(Reg::AX)), (0, 11));

		call(&mut handler, &mut regs, 0x3e00);
		assert!(!regs.get_flag(Flag::Carry));
		call(&mut handler, &mut regs, 0x3e00);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), DosErrorCode::InvalidFileHandle.code());
	}

	#[test] fn test_fcb_records() {
		let contents = [0x41; 200];
		let (mut handler, mut regs) = handler(&[(&b"RECORDS.DAT"[..], &contents[..])]);
		let mut fcb = Fcb::new(handler.kernel.memory(), real_make(0x3000, 0), false);
		fcb.create(handler.kernel.memory_mut(), false);
		fcb.set_name(handler.kernel.memory_mut(), 3, *b"RECORDS ", *b"DAT");
		regs.set_reg_u16(Reg::DX, 0x100);
		call(&mut handler, &mut regs, 0x1a00);
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x0f00);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0);

		call(&mut handler, &mut regs, 0x1400);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0);
		assert_eq!(handler.kernel.memory().read_u8(BUFFER + 127), 0x41);
		call(&mut handler, &mut regs, 0x2400);
		assert_eq!(fcb.get_random(handler.kernel.memory()), 1);
		call(&mut handler, &mut regs, 0x2100);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 3);
		assert_eq!(fcb.get_record(handler.kernel.memory()), (0, 1));

		fcb.set_random(handler.kernel.memory_mut(), 0);
		regs.set_reg_u16(Reg::CX, 5);
		call(&mut handler, &mut regs, 0x2700);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 3);
		assert_eq!(regs.get_reg_u16(Reg::CX), 2);
		assert_eq!(fcb.get_random(handler.kernel.memory()), 2);
		assert_eq!(handler.kernel.memory().read_u8(BUFFER + 128 + 71), 0x41);
		assert_eq!(handler.kernel.memory().read_u8(BUFFER + 128 + 72), 0);

		fcb.set_random(handler.kernel.memory_mut(), 0);
		call(&mut handler, &mut regs, 0x2300);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0);
		assert_eq!(fcb.get_random(handler.kernel.memory()), 2);
		call(&mut handler, &mut regs, 0x1000);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0);
	}

	#[test] fn test_errors_and_extended_error() {
		let (mut handler, mut regs) = handler(&[]);
		write_name(&mut handler, b"MISSING.TXT");
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x3d00);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), 2);
		call(&mut handler, &mut regs, 0x5900);
		assert_eq!(regs.get_reg_u16(Reg::AX), 2);
		assert_eq!(regs.get_reg_u8(Reg::BX, RegHalf::High), 8);
		assert_eq!(regs.get_reg_u8(Reg::BX, RegHalf::Low), 1);

		assert_eq!(call(&mut handler, &mut regs, 0xee00), DosInterruptResult::ShouldReturn);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), 1);
		assert_eq!(handler.kernel.last_error(), Some(DosErrorCode::FunctionNumberInvalid));
	}

	#[test] fn test_console_output() {
		let (mut handler, mut regs) = handler(&[]);
		handler.kernel.memory_mut().block_write(NAME, b"Hello$world");
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x0900);
		regs.set_reg_u16(Reg::DX, b'!' as u16);
		call(&mut handler, &mut regs, 0x0200);
		assert_eq!(handler.kernel.take_console_output(), b"Hello!".to_vec());
	}

	#[test] fn test_console_input_blocks() {
		let (mut handler, mut regs) = handler(&[]);
		assert_eq!(call(&mut handler, &mut regs, 0x0100), DosInterruptResult::ShouldBlockForKeypress);
		call(&mut handler, &mut regs, 0x0b00);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0);
		handler.kernel.push_console_input(b"y");
		call(&mut handler, &mut regs, 0x0b00);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0xff);
		assert_eq!(call(&mut handler, &mut regs, 0x0100), DosInterruptResult::ShouldReturn);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), b'y');
		assert_eq!(handler.kernel.take_console_output(), b"y".to_vec());
	}

	#[test] fn test_memory_services() {
		let (mut handler, mut regs) = handler(&[]);
		regs.set_reg_u16(Reg::BX, 0xffff);
		call(&mut handler, &mut regs, 0x4800);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), 8);
		let available = regs.get_reg_u16(Reg::BX);
		assert!(available > 0x9000);

		regs.set_reg_u16(Reg::BX, 0x100);
		call(&mut handler, &mut regs, 0x4800);
		assert!(!regs.get_flag(Flag::Carry));
		let segment = regs.get_reg_u16(Reg::AX);
		regs.set_reg_u16(Reg::ES, segment);
		regs.set_reg_u16(Reg::BX, 0x80);
		call(&mut handler, &mut regs, 0x4a00);
		assert!(!regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), segment);
		call(&mut handler, &mut regs, 0x4900);
		assert!(!regs.get_flag(Flag::Carry));
		regs.set_reg_u16(Reg::ES, 0x3001);
		call(&mut handler, &mut regs, 0x4900);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), DosErrorCode::MbAddressInvalid.code());

		regs.set_reg_u16(Reg::BX, 2);
		call(&mut handler, &mut regs, 0x5801);
		call(&mut handler, &mut regs, 0x5800);
		assert_eq!(regs.get_reg_u16(Reg::AX), 2);
		regs.set_reg_u16(Reg::BX, 7);
		call(&mut handler, &mut regs, 0x5801);
		assert!(regs.get_flag(Flag::Carry));
	}

	#[test] fn test_allocate_on_broken_chain() {
		let (mut handler, mut regs) = handler(&[]);
		handler.kernel.config.fault_strategy = McbFaultStrategy::ReportError;
		regs.set_reg_u16(Reg::BX, 0x20);
		call(&mut handler, &mut regs, 0x4800);
		let first = regs.get_reg_u16(Reg::AX);
		regs.set_reg_u16(Reg::BX, 0x10);
		call(&mut handler, &mut regs, 0x4800);
		let second = regs.get_reg_u16(Reg::AX);
		regs.set_reg_u16(Reg::ES, first);
		call(&mut handler, &mut regs, 0x4900);
		assert!(!regs.get_flag(Flag::Carry));
		handler.kernel.memory_mut().write_u8(phys_make(second + 0x10, 0), b'X');

		regs.set_reg_u16(Reg::BX, 0x30);
		call(&mut handler, &mut regs, 0x4800);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), DosErrorCode::McbDestroyed.code());
		assert_eq!(regs.get_reg_u16(Reg::BX), 0x20);
	}

	#[test] fn test_process_services() {
		let (mut handler, mut regs) = handler(&[(&b"GAME.COM"[..], &b"\xb8\x03\x4c\xcd\x21"[..])]);
		call(&mut handler, &mut regs, 0x5100);
		assert_eq!(regs.get_reg_u16(Reg::BX), DOS_FIRST_SHELL);
		call(&mut handler, &mut regs, 0x3000);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x0005);

		write_name(&mut handler, b"GAME.COM");
		let mut block = ParamBlock::new(BUFFER);
		block.exec.cmdtail = real_make(0x3000, 0x200);
		block.save_data(handler.kernel.memory_mut());
		regs.set_reg_u16(Reg::DX, 0);
		regs.set_reg_u16(Reg::BX, 0x100);
		assert_eq!(call(&mut handler, &mut regs, 0x4b00), DosInterruptResult::ShouldJump);
		let psp = handler.kernel.current_psp();
		assert_ne!(psp, DOS_FIRST_SHELL);
		assert_eq!(regs.get_reg_u16(Reg::CS), psp);
		assert_eq!(regs.get_reg_u16(Reg::IP), 0x100);

		// The program's INT 21h pushes its own frame before AH=4Ch.
		regs.set_reg_u16(Reg::IP, 0x105);
		handler.kernel.push_interrupt_frame(&mut regs);
		assert_eq!(call(&mut handler, &mut regs, 0x4c03), DosInterruptResult::ShouldReturn);
		assert_eq!(handler.kernel.current_psp(), DOS_FIRST_SHELL);
		let ip = handler.kernel.memory().read_u16(regs.get_seg_reg(Reg::SS, Reg::SP));
		assert_eq!(ip, 0x200);

		call(&mut handler, &mut regs, 0x4d00);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x0003 | ((ReturnMode::Exit as u16) << 8));
	}

	#[test] fn test_directory_services() {
		let (mut handler, mut regs) = handler(&[(&b"README.TXT"[..], &b""[..])]);
		write_name(&mut handler, b"GAMES");
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x3900);
		assert!(!regs.get_flag(Flag::Carry));
		call(&mut handler, &mut regs, 0x3b00);
		assert!(!regs.get_flag(Flag::Carry));
		regs.set_reg_u16(Reg::DX, 0);
		regs.set_reg_u16(Reg::SI, 0x100);
		call(&mut handler, &mut regs, 0x4700);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x0100);
		assert_eq!(handler.kernel.memory().read_null_terminated_string(BUFFER, 64), b"GAMES".to_vec());

		write_name(&mut handler, b"\\*.TXT");
		regs.set_reg_u16(Reg::DX, 0x200);
		call(&mut handler, &mut regs, 0x1a00);
		regs.set_reg_u16(Reg::DX, 0);
		regs.set_reg_u16(Reg::CX, 0);
		call(&mut handler, &mut regs, 0x4e00);
		assert!(!regs.get_flag(Flag::Carry));
		call(&mut handler, &mut regs, 0x4f00);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), DosErrorCode::NoMoreFiles.code());
		call(&mut handler, &mut regs, 0x2f00);
		assert_eq!((regs.get_reg_u16(Reg::ES), regs.get_reg_u16(Reg::BX)), (0x3000, 0x200));
	}

	#[test] fn test_drive_services() {
		let (mut handler, mut regs) = handler(&[]);
		call(&mut handler, &mut regs, 0x1900);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 2);
		regs.set_reg_u16(Reg::DX, 0);
		call(&mut handler, &mut regs, 0x3600);
		assert_eq!(regs.get_reg_u16(Reg::CX), 512);
		regs.set_reg_u16(Reg::DX, 5);
		call(&mut handler, &mut regs, 0x3600);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0xffff);
		regs.set_reg_u16(Reg::DX, 7);
		call(&mut handler, &mut regs, 0x0e00);
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 26);
		assert_eq!(handler.kernel.get_default_drive(), 2);
	}

	#[test] fn test_handle_count() {
		let (mut handler, mut regs) = handler(&[]);
		regs.set_reg_u16(Reg::BX, 40);
		call(&mut handler, &mut regs, 0x6700);
		assert!(!regs.get_flag(Flag::Carry));
		regs.set_reg_u16(Reg::BX, 0xffff);
		assert_eq!(call(&mut handler, &mut regs, 0x6700), DosInterruptResult::ShouldReturn);
		assert!(regs.get_flag(Flag::Carry));
		assert_eq!(regs.get_reg_u16(Reg::AX), DosErrorCode::InsufficientMemory.code());
	}

	#[test] fn test_vectors() {
		let (mut handler, mut regs) = handler(&[]);
		regs.set_reg_u16(Reg::DS, 0x1234);
		regs.set_reg_u16(Reg::DX, 0x5678);
		call(&mut handler, &mut regs, 0x2560);
		call(&mut handler, &mut regs, 0x3560);
		assert_eq!((regs.get_reg_u16(Reg::ES), regs.get_reg_u16(Reg::BX)), (0x1234, 0x5678));
	}
}
