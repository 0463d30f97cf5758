use crate::dos_drive::DOS_DRIVES;
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DeviceInformation, DosFileSeekOrigin, FileObject};
use crate::kernel::DosKernel;
use crate::registers::{Reg, RegHalf, Registers};

use log::{debug, error};

// http://www.ctyme.com/intr/rb-2819.htm

/// Subfunctions that take a file handle in BX. The other ones below 0x12 take a drive in BL.
fn uses_handle(function: u8) -> bool {
	match function {
		0x00..=0x03 | 0x06 | 0x07 | 0x0a | 0x0c | 0x10 => true,
		_ => false,
	}
}

/// The 11 byte "NNNNNNNNEEE" form of a volume label.
fn padded_label(label: &[u8]) -> [u8; 11] {
	let mut padded = [b' '; 11];
	match label.iter().position(|&c| c == b'.') {
		Some(dot) => {
			let name = &label[..dot.min(8)];
			padded[..name.len()].copy_from_slice(name);
			let ext = &label[dot + 1..];
			let ext = &ext[..ext.len().min(3)];
			padded[8..8 + ext.len()].copy_from_slice(ext);
		}
		None => {
			let name = &label[..label.len().min(8)];
			padded[..name.len()].copy_from_slice(name);
		}
	}
	padded
}

impl DosKernel {
	/// INT 21h AH=44h. The subfunction is in AL; results go back in the registers.
	pub fn ioctl(&mut self, regs: &mut Registers) -> Result<(), DosErrorCode> {
		let function = regs.get_reg_u8(Reg::AX, RegHalf::Low);
		let mut index = 0;
		let mut drive = 0;
		if uses_handle(function) {
			index = self.real_handle(regs.get_reg_u16(Reg::BX)) as usize;
			if self.files.get(index).map_or(true, |slot| slot.is_none()) {
				return self.fail(DosErrorCode::InvalidFileHandle);
			}
		} else if function < 0x12 {
			if function != 0x0b {
				drive = match regs.get_reg_u8(Reg::BX, RegHalf::Low) {
					0 => self.get_default_drive(),
					bl => bl - 1,
				};
				if drive >= 2 && !((drive as usize) < DOS_DRIVES && self.drive_exists(drive)) {
					return self.fail(DosErrorCode::InvalidDrive);
				}
			}
		} else {
			error!("IOCTL call {:#04x} unhandled", function);
			return self.fail(DosErrorCode::FunctionNumberInvalid);
		}

		match function {
			0x00 => {
				let (information, file_drive) = match self.files[index].as_ref() {
					Some(file) => (self.information(file), file.drive),
					None => return self.fail(DosErrorCode::InvalidFileHandle),
				};
				let dx = if information.is_device() {
					information.bits()
				} else {
					let file_drive = file_drive.unwrap_or_else(|| {
						debug!("IOCTL 00: no drive set, defaulting to C:");
						2
					});
					(information.bits() & 0xffe0) | file_drive as u16
				};
				regs.set_reg_u16(Reg::DX, dx);
				regs.set_reg_u16(Reg::AX, dx);
				Ok(())
			}
			0x01 => {
				if regs.get_reg_u8(Reg::DX, RegHalf::High) != 0 {
					return self.fail(DosErrorCode::InvalidData);
				}
				let information = self.sft_information(index);
				if information.is_device() {
					regs.set_reg_u8(Reg::AX, RegHalf::Low, (information.bits() & 0xff) as u8);
					Ok(())
				} else {
					self.fail(DosErrorCode::FunctionNumberInvalid)
				}
			}
			0x02 | 0x03 => {
				let information = self.sft_information(index);
				let device = match self.files[index].as_ref().map(|file| &file.object) {
					Some(FileObject::Device(device)) if information.bits() & 0xc000 != 0 => *device,
					_ => return self.fail(DosErrorCode::FunctionNumberInvalid),
				};
				let buffer_pt = regs.get_seg_reg(Reg::DS, Reg::DX);
				let mut buffer = vec![0; regs.get_reg_u16(Reg::CX) as usize];
				let status = if function == 0x02 {
					let status = self.device(device).and_then(|device| device.read_from_control_channel(&mut buffer));
					if status.is_some() {
						self.mem.block_write(buffer_pt, &buffer);
					}
					status
				} else {
					self.mem.block_read(buffer_pt, &mut buffer);
					self.device(device).and_then(|device| device.write_to_control_channel(&buffer))
				};
				match status {
					Some(status) => {
						regs.set_reg_u16(Reg::AX, status);
						Ok(())
					}
					None => self.fail(DosErrorCode::FunctionNumberInvalid),
				}
			}
			0x06 => {
				let information = self.sft_information(index);
				let status = if information.is_device() {
					if information.contains(DeviceInformation::EOF_OR_NOT_WRITTEN) { 0x00 } else { 0xff }
				} else {
					let position = self.seek_sft(index, 0, DosFileSeekOrigin::Current)?;
					let end = self.seek_sft(index, 0, DosFileSeekOrigin::End);
					let restored = self.seek_sft(index, position as i32, DosFileSeekOrigin::Start);
					let end = end?;
					restored?;
					debug!("IOCTL 06: input status of regular file in SFT entry {}", index);
					if position < end { 0xff } else { 0x00 }
				};
				regs.set_reg_u8(Reg::AX, RegHalf::Low, status);
				Ok(())
			}
			0x07 => {
				debug!("IOCTL 07: faking ready output status for SFT entry {}", index);
				regs.set_reg_u8(Reg::AX, RegHalf::Low, 0xff);
				Ok(())
			}
			0x08 => {
				let removable = self.mounted(drive).map_or(false, |mounted| mounted.drive.is_removable());
				if drive < 2 {
					regs.set_reg_u16(Reg::AX, 0);
				} else if !removable {
					regs.set_reg_u16(Reg::AX, 1);
				} else {
					return self.fail(DosErrorCode::FunctionNumberInvalid);
				}
				Ok(())
			}
			0x09 => {
				let remote = drive >= 2 && self.mounted(drive).map_or(false, |mounted| mounted.drive.is_remote());
				// Remote: bit 12 only. Local: what MS-DOS 6.22 reports, open/close and 32 bit access.
				regs.set_reg_u16(Reg::DX, if remote { 0x1000 } else { 0x0802 });
				regs.set_reg_u16(Reg::AX, 0x0300);
				Ok(())
			}
			0x0b => {
				if regs.get_reg_u16(Reg::DX) == 0 {
					return self.fail(DosErrorCode::FunctionNumberInvalid);
				}
				self.info_block.set_sharing_retry(&mut *self.mem, regs.get_reg_u16(Reg::DX), regs.get_reg_u16(Reg::CX));
				Ok(())
			}
			0x0d => self.generic_block_request(regs, drive),
			0x0e => {
				if drive < 2 {
					let map = if self.drive_exists(drive) { drive + 1 } else { 1 };
					regs.set_reg_u8(Reg::AX, RegHalf::Low, map);
				} else if self.mounted(drive).map_or(false, |mounted| mounted.drive.is_removable()) {
					return self.fail(DosErrorCode::FunctionNumberInvalid);
				} else {
					regs.set_reg_u8(Reg::AX, RegHalf::Low, 0);
				}
				regs.set_reg_u8(Reg::AX, RegHalf::High, 0x07);
				Ok(())
			}
			_ => {
				error!("IOCTL call {:#04x} unhandled", function);
				self.fail(DosErrorCode::FunctionNumberInvalid)
			}
		}
	}

	fn sft_information(&self, index: usize) -> DeviceInformation {
		match self.files.get(index).and_then(|slot| slot.as_ref()) {
			Some(file) => self.information(file),
			None => DeviceInformation::empty(),
		}
	}

	/// IOCTL 0Dh, with the minor code in CL and the parameter block at DS:DX.
	fn generic_block_request(&mut self, regs: &mut Registers, drive: u8) -> Result<(), DosErrorCode> {
		let (removable, label) = match self.mounted(drive) {
			Some(mounted) => (mounted.drive.is_removable(), mounted.drive.label()),
			None => return self.fail(DosErrorCode::AccessDenied),
		};
		if regs.get_reg_u8(Reg::CX, RegHalf::High) != 0x08 || removable {
			return self.fail(DosErrorCode::FunctionNumberInvalid);
		}
		let pt = regs.get_seg_reg(Reg::DS, Reg::DX);
		let hard_disk = drive >= 2;
		match regs.get_reg_u8(Reg::CX, RegHalf::Low) {
			0x60 => {
				// Device type: hard disk or 1.44M floppy. Cylinders and media type are left zero,
				// then bytes per sector opens the BIOS parameter block.
				self.mem.write_u8(pt + 1, if hard_disk { 0x05 } else { 0x07 });
				self.mem.write_u16(pt + 2, if hard_disk { 0x01 } else { 0x00 });
				self.mem.write_u16(pt + 4, 0x0000);
				self.mem.write_u8(pt + 6, 0x00);
				self.mem.write_u16(pt + 7, 0x200);
			}
			0x46 => {}
			0x66 => {
				let label = padded_label(&label.unwrap_or_default());
				let file_system: &[u8; 8] = if hard_disk { b"FAT16   " } else { b"FAT12   " };
				self.mem.write_u32(pt + 2, 0x1234);
				self.mem.block_write(pt + 6, &label);
				self.mem.block_write(pt + 0x11, file_system);
			}
			minor => {
				error!("IOCTL 0D:{:02x} on drive {} unhandled", minor, drive);
				return self.fail(DosErrorCode::FunctionNumberInvalid);
			}
		}
		regs.set_reg_u16(Reg::AX, 0);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dos_device::DosDevice;
	use crate::dos_file::{DriveFile, OPEN_READ};
	use crate::dos_tables::DOS_FIRST_SHELL;
	use crate::guest_memory::phys_make;
	use crate::info_block::DIB_SHARING_COUNT;
	use crate::kernel::tests::test_kernel;
	use crate::mem_struct::MemStruct;
	use crate::memory_drive::MemoryDrive;
	use crate::psp::Psp;

	/// Moves to the end before reporting that the seek failed.
	#[derive(Debug)]
	struct BrokenEndFile {
		position: u32,
	}

	impl DriveFile for BrokenEndFile {
		fn read(&mut self, _destination: &mut [u8]) -> Result<usize, DosErrorCode> {
			Ok(0)
		}
		fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
			Ok(data.len())
		}
		fn seek(&mut self, offset: i32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
			match origin {
				DosFileSeekOrigin::Start => self.position = offset as u32,
				DosFileSeekOrigin::Current => self.position = (self.position as i32 + offset) as u32,
				DosFileSeekOrigin::End => {
					self.position = 100;
					return Err(DosErrorCode::AccessDenied);
				}
			}
			Ok(self.position)
		}
	}

	#[derive(Debug, Default)]
	struct ControlDevice {
		written: Vec<u8>,
	}

	impl DosDevice for ControlDevice {
		fn name(&self) -> &[u8] {
			b"EMMXXXX0"
		}
		fn read(&mut self, _destination: &mut [u8]) -> Result<usize, DosErrorCode> {
			Ok(0)
		}
		fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
			Ok(data.len())
		}
		fn information(&self) -> DeviceInformation {
			DeviceInformation::from_bits_retain(0xc0c0)
		}
		fn read_from_control_channel(&mut self, destination: &mut [u8]) -> Option<u16> {
			for (index, byte) in destination.iter_mut().enumerate() {
				*byte = index as u8 + 1;
			}
			Some(destination.len() as u16)
		}
		fn write_to_control_channel(&mut self, data: &[u8]) -> Option<u16> {
			self.written.extend_from_slice(data);
			Some(0x55)
		}
	}

	fn ioctl_kernel() -> DosKernel {
		let mut kernel = test_kernel();
		let mut drive = MemoryDrive::with_label(b"EMULATED");
		drive.add_file(b"DATA.BIN", b"0123456789").unwrap();
		kernel.unmount_drive(2);
		kernel.mount_drive(2, Box::new(drive)).unwrap();
		let mut floppy = MemoryDrive::with_label(b"DISK1.A");
		floppy.set_removable(true);
		kernel.mount_drive(0, Box::new(floppy)).unwrap();
		Psp::new(DOS_FIRST_SHELL).make_new(kernel.memory_mut(), 0x100, DOS_FIRST_SHELL, 5);
		kernel
	}

	fn call(kernel: &mut DosKernel, ax: u16, bx: u16) -> (Result<(), DosErrorCode>, Registers) {
		let mut regs = Registers::new();
		regs.set_reg_u16(Reg::AX, ax);
		regs.set_reg_u16(Reg::BX, bx);
		regs.set_reg_u16(Reg::DS, 0x3000);
		regs.set_reg_u16(Reg::CX, 0x0860);
		let result = kernel.ioctl(&mut regs);
		(result, regs)
	}

	#[test] fn test_bad_handle_and_function() {
		let mut kernel = ioctl_kernel();
		assert_eq!(call(&mut kernel, 0x4400, 255).0, Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::InvalidFileHandle));
		assert_eq!(call(&mut kernel, 0x4406, 5).0, Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(call(&mut kernel, 0x44ff, 0).0, Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(call(&mut kernel, 0x4404, 0).0, Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(call(&mut kernel, 0x4408, 10).0, Err(DosErrorCode::InvalidDrive));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::InvalidDrive));
	}

	#[test] fn test_device_information() {
		let mut kernel = ioctl_kernel();
		let con = kernel.open_file(b"CON", 2).unwrap();
		let data = kernel.open_file(b"DATA.BIN", OPEN_READ).unwrap();
		let (result, regs) = call(&mut kernel, 0x4400, con);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::DX), 0x80d3);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x80d3);
		let (_, regs) = call(&mut kernel, 0x4400, data);
		assert_eq!(regs.get_reg_u16(Reg::DX), 0x0002);

		let (result, regs) = call(&mut kernel, 0x4401, con);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u8(Reg::AX, RegHalf::Low), 0xd3);
		assert_eq!(call(&mut kernel, 0x4401, data).0, Err(DosErrorCode::FunctionNumberInvalid));
		let mut regs = Registers::new();
		regs.set_reg_u16(Reg::AX, 0x4401);
		regs.set_reg_u16(Reg::BX, con);
		regs.set_reg_u16(Reg::DX, 0x0100);
		assert_eq!(kernel.ioctl(&mut regs), Err(DosErrorCode::InvalidData));
	}

	#[test] fn test_input_status() {
		let mut kernel = ioctl_kernel();
		let con = kernel.open_file(b"CON", 2).unwrap();
		let data = kernel.open_file(b"DATA.BIN", OPEN_READ).unwrap();
		assert_eq!(call(&mut kernel, 0x4406, con).1.get_reg_u8(Reg::AX, RegHalf::Low), 0x00);
		kernel.push_console_input(b"k");
		assert_eq!(call(&mut kernel, 0x4406, con).1.get_reg_u8(Reg::AX, RegHalf::Low), 0xff);

		kernel.seek_file(data, 4, 0).unwrap();
		assert_eq!(call(&mut kernel, 0x4406, data).1.get_reg_u8(Reg::AX, RegHalf::Low), 0xff);
		assert_eq!(kernel.seek_file(data, 0, 1), Ok(4));
		kernel.seek_file(data, 0, 2).unwrap();
		assert_eq!(call(&mut kernel, 0x4406, data).1.get_reg_u8(Reg::AX, RegHalf::Low), 0x00);
		assert_eq!(call(&mut kernel, 0x4407, data).1.get_reg_u8(Reg::AX, RegHalf::Low), 0xff);
	}

	#[test] fn test_input_status_keeps_position() {
		let mut kernel = ioctl_kernel();
		let data = kernel.open_file(b"DATA.BIN", OPEN_READ).unwrap();
		let index = kernel.files.iter().position(|slot| slot.as_ref().map_or(false, |file| !file.is_device())).unwrap();
		kernel.files[index].as_mut().unwrap().object = FileObject::Regular(Box::new(BrokenEndFile { position: 7 }));
		assert_eq!(call(&mut kernel, 0x4406, data).0, Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::AccessDenied));
		assert_eq!(kernel.seek_file(data, 0, 1), Ok(7));
	}

	#[test] fn test_control_channel() {
		let mut kernel = ioctl_kernel();
		kernel.install_device(Box::new(ControlDevice::default())).unwrap();
		let emm = kernel.open_file(b"EMMXXXX0", 2).unwrap();
		let con = kernel.open_file(b"CON", 2).unwrap();
		let data = kernel.open_file(b"DATA.BIN", OPEN_READ).unwrap();

		let mut regs = Registers::new();
		regs.set_reg_u16(Reg::AX, 0x4402);
		regs.set_reg_u16(Reg::BX, emm);
		regs.set_reg_u16(Reg::CX, 3);
		regs.set_reg_u16(Reg::DS, 0x3000);
		regs.set_reg_u16(Reg::DX, 0x10);
		assert_eq!(kernel.ioctl(&mut regs), Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 3);
		assert_eq!(kernel.memory().read_u16(phys_make(0x3000, 0x10)), 0x0201);
		assert_eq!(kernel.memory().read_u8(phys_make(0x3000, 0x12)), 3);

		regs.set_reg_u16(Reg::AX, 0x4403);
		assert_eq!(kernel.ioctl(&mut regs), Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x55);

		// CON has IOCTL bits but no control channel, files have neither.
		assert_eq!(call(&mut kernel, 0x4402, con).0, Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(call(&mut kernel, 0x4403, data).0, Err(DosErrorCode::FunctionNumberInvalid));
	}

	#[test] fn test_removable_and_remote() {
		let mut kernel = ioctl_kernel();
		let (result, regs) = call(&mut kernel, 0x4408, 1);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 0);
		assert_eq!(call(&mut kernel, 0x4408, 3).1.get_reg_u16(Reg::AX), 1);
		assert_eq!(call(&mut kernel, 0x4408, 0).1.get_reg_u16(Reg::AX), 1);
		let (result, regs) = call(&mut kernel, 0x4409, 3);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::DX), 0x0802);
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x0300);
	}

	#[test] fn test_sharing_retry() {
		let mut kernel = ioctl_kernel();
		let mut regs = Registers::new();
		regs.set_reg_u16(Reg::AX, 0x440b);
		assert_eq!(kernel.ioctl(&mut regs), Err(DosErrorCode::FunctionNumberInvalid));
		regs.set_reg_u16(Reg::DX, 3);
		regs.set_reg_u16(Reg::CX, 2);
		assert_eq!(kernel.ioctl(&mut regs), Ok(()));
		assert_eq!(kernel.info_block().get(kernel.memory(), DIB_SHARING_COUNT), 3);
	}

	#[test] fn test_device_parameters() {
		let mut kernel = ioctl_kernel();
		let (result, regs) = call(&mut kernel, 0x440d, 3);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 0);
		let memory = kernel.memory();
		assert_eq!(memory.read_u8(phys_make(0x3000, 1)), 0x05);
		assert_eq!(memory.read_u16(phys_make(0x3000, 2)), 0x01);
		assert_eq!(memory.read_u16(phys_make(0x3000, 4)), 0);
		assert_eq!(memory.read_u8(phys_make(0x3000, 6)), 0);
		assert_eq!(memory.read_u16(phys_make(0x3000, 7)), 0x200);

		assert_eq!(call(&mut kernel, 0x440d, 1).0, Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(call(&mut kernel, 0x440d, 2).0, Err(DosErrorCode::AccessDenied));

		kernel.mount_drive(1, Box::new(MemoryDrive::with_label(b"DISK2"))).unwrap();
		let (result, regs) = call(&mut kernel, 0x440d, 2);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 0);
		let memory = kernel.memory();
		assert_eq!(memory.read_u8(phys_make(0x3000, 1)), 0x07);
		assert_eq!(memory.read_u16(phys_make(0x3000, 2)), 0);
		assert_eq!(memory.read_u16(phys_make(0x3000, 4)), 0);
		assert_eq!(memory.read_u8(phys_make(0x3000, 6)), 0);
	}

	#[test] fn test_volume_serial() {
		let mut kernel = ioctl_kernel();
		let mut regs = Registers::new();
		regs.set_reg_u16(Reg::AX, 0x440d);
		regs.set_reg_u16(Reg::BX, 3);
		regs.set_reg_u16(Reg::CX, 0x0866);
		regs.set_reg_u16(Reg::DS, 0x3000);
		assert_eq!(kernel.ioctl(&mut regs), Ok(()));
		let mut label = [0; 11];
		kernel.memory().block_read(phys_make(0x3000, 6), &mut label);
		assert_eq!(&label, b"EMULATED   ");
		assert_eq!(kernel.memory().read_u32(phys_make(0x3000, 2)), 0x1234);
		let mut file_system = [0; 8];
		kernel.memory().block_read(phys_make(0x3000, 0x11), &mut file_system);
		assert_eq!(&file_system, b"FAT16   ");

		regs.set_reg_u16(Reg::AX, 0x440d);
		regs.set_reg_u16(Reg::BX, 1);
		assert_eq!(kernel.ioctl(&mut regs), Err(DosErrorCode::FunctionNumberInvalid));

		kernel.mount_drive(1, Box::new(MemoryDrive::with_label(b"DISK1.A"))).unwrap();
		regs.set_reg_u16(Reg::AX, 0x440d);
		regs.set_reg_u16(Reg::BX, 2);
		assert_eq!(kernel.ioctl(&mut regs), Ok(()));
		kernel.memory().block_read(phys_make(0x3000, 6), &mut label);
		assert_eq!(&label, b"DISK1   A  ");
		kernel.memory().block_read(phys_make(0x3000, 0x11), &mut file_system);
		assert_eq!(&file_system, b"FAT12   ");

		regs.set_reg_u16(Reg::AX, 0x440d);
		regs.set_reg_u16(Reg::CX, 0x0840);
		assert_eq!(kernel.ioctl(&mut regs), Err(DosErrorCode::FunctionNumberInvalid));
		regs.set_reg_u16(Reg::AX, 0x440d);
		regs.set_reg_u16(Reg::CX, 0x0766);
		assert_eq!(kernel.ioctl(&mut regs), Err(DosErrorCode::FunctionNumberInvalid));
	}

	#[test] fn test_logical_drive_map() {
		let mut kernel = ioctl_kernel();
		let (result, regs) = call(&mut kernel, 0x440e, 1);
		assert_eq!(result, Ok(()));
		assert_eq!(regs.get_reg_u16(Reg::AX), 0x0701);
		assert_eq!(call(&mut kernel, 0x440e, 2).1.get_reg_u16(Reg::AX), 0x0701);
		assert_eq!(call(&mut kernel, 0x440e, 3).1.get_reg_u16(Reg::AX), 0x0700);
		let mut removable = MemoryDrive::new();
		removable.set_removable(true);
		kernel.mount_drive(3, Box::new(removable)).unwrap();
		assert_eq!(call(&mut kernel, 0x440e, 4).0, Err(DosErrorCode::FunctionNumberInvalid));
		assert!(kernel.mounted(3).unwrap().drive.is_removable());
	}
}
