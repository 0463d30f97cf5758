use crate::dos_device::device_base_name;
use crate::dos_drive::{DirEntry, MountedDrive, DOS_DRIVES};
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DeviceInformation, DosFileSeekOrigin, FileAttributes, FileObject, OpenFile, DOS_FILES, OPEN_READ, OPEN_READWRITE, OPEN_WRITE};
use crate::dos_name::{self, split_dir};
use crate::fcb::{Fcb, FcbRecordStatus, FCB_DEFAULT_RECORD_SIZE};
use crate::guest_memory::{real_to_phys, GuestMemory, RealPt};
use crate::kernel::DosKernel;
use crate::psp::{Psp, PSP_NO_ENTRY, PSP_UNUSED_HANDLE};

use log::{debug, warn};
use num_traits::FromPrimitive;

/// A byte range locked with INT 21h AH=5Ch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLock {
	/// SFT entry that holds the lock.
	pub handle: u8,
	pub drive: Option<u8>,
	pub name: Vec<u8>,
	pub start: u32,
	pub len: u32,
}

impl FileLock {
	fn overlaps(&self, start: u32, len: u32) -> bool {
		let (lock_start, lock_end) = (self.start as u64, self.start as u64 + self.len as u64);
		let (start, end) = (start as u64, start as u64 + len as u64);
		start < lock_end && lock_start < end
	}

	fn same_file(&self, drive: Option<u8>, name: &[u8]) -> bool {
		self.drive == drive && self.name.eq_ignore_ascii_case(name)
	}
}

/// What INT 21h AX=6C00h did, as returned in CX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedOpenResult {
	Opened = 1,
	Created = 2,
	Replaced = 3,
}

impl DosKernel {
	/// Empties the file and drive tables.
	pub fn setup_files(&mut self) {
		self.files = (0..DOS_FILES).map(|_| None).collect();
		self.drives = (0..DOS_DRIVES).map(|_| None).collect();
		self.locks.clear();
	}

	/// Closes every open file and unmounts every drive.
	pub fn clear_drives_and_files(&mut self) {
		for slot in self.files.iter_mut() {
			if let Some(mut file) = slot.take() {
				file.close();
			}
		}
		for slot in self.drives.iter_mut() {
			*slot = None;
		}
		self.locks.clear();
	}

	pub fn init_file_locking(&mut self, enabled: bool) {
		self.file_locking = enabled;
	}

	/// The SFT index behind handle `entry` of the current process, 0xff if there is none.
	pub fn real_handle(&self, entry: u16) -> u8 {
		Psp::new(self.current_psp()).get_file_handle(&*self.mem, entry)
	}

	pub fn open_file_entry(&self, index: u8) -> Option<&OpenFile> {
		self.files.get(index as usize).and_then(|slot| slot.as_ref())
	}

	/// FCB calls pass the SFT index directly.
	fn sft_index(&mut self, entry: u16, fcb: bool) -> Result<usize, DosErrorCode> {
		let index = if fcb { entry as usize } else { self.real_handle(entry) as usize };
		match self.files.get(index) {
			Some(Some(file)) if file.open => Ok(index),
			_ => self.fail(DosErrorCode::InvalidFileHandle),
		}
	}

	pub(crate) fn information(&self, file: &OpenFile) -> DeviceInformation {
		match file.object {
			FileObject::Regular(ref drive_file) => drive_file.information(),
			FileObject::Device(device) => match self.devices.get(device).and_then(|slot| slot.as_ref()) {
				Some(device) => device.information(),
				None => DeviceInformation::empty(),
			},
		}
	}

	/// The information word of the file behind `entry`.
	pub fn get_file_information(&mut self, entry: u16) -> Result<DeviceInformation, DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		match self.files[index].as_ref() {
			Some(file) => Ok(self.information(file)),
			None => self.fail(DosErrorCode::InvalidFileHandle),
		}
	}

	/// Resolves `name` against the default drive and the current directories.
	pub fn make_name(&mut self, name: &[u8]) -> Result<(u8, Vec<u8>), DosErrorCode> {
		let curdirs = self.curdirs();
		let result = dos_name::make_name(name, self.get_default_drive(), |drive| curdirs.get(drive as usize).cloned().flatten());
		self.check(result)
	}

	/// Runs `op` on a mounted drive and records its error, if any.
	fn with_drive<T, F>(&mut self, drive: u8, op: F) -> Result<T, DosErrorCode>
		where F: FnOnce(&mut MountedDrive) -> Result<T, DosErrorCode>
	{
		let result = match self.mounted(drive) {
			Some(mounted) => op(mounted),
			None => Err(DosErrorCode::InvalidDrive),
		};
		self.check(result)
	}

	fn test_dir(&mut self, drive: u8, path: &[u8]) -> bool {
		self.mounted(drive).map_or(false, |mounted| mounted.drive.test_dir(path))
	}

	fn dir_entry(&mut self, drive: u8, path: &[u8]) -> Option<DirEntry> {
		let (dir, name) = split_dir(path);
		let entries = self.mounted(drive)?.drive.list_dir(dir).ok()?;
		entries.into_iter().find(|entry| entry.name == name)
	}

	/// The slot of the device `name` refers to. Directories in front of the device name have to
	/// exist and an extension is ignored.
	pub fn find_device(&mut self, name: &[u8]) -> Option<usize> {
		let name = match name.split_last() {
			Some((b':', rest)) if rest.len() > 1 => rest,
			_ => name,
		};
		let curdirs = self.curdirs();
		let base = match dos_name::make_name(name, self.get_default_drive(), |drive| curdirs.get(drive as usize).cloned().flatten()) {
			Ok((drive, fullname)) => {
				let (dir, file) = split_dir(&fullname);
				if !dir.is_empty() && !self.test_dir(drive, dir) {
					return None;
				}
				device_base_name(file)
			}
			Err(_) if !name.contains(&b'\\') && !name.contains(&b'/') => device_base_name(name),
			Err(_) => return None,
		};
		self.find_device_by_name(&base)
	}

	/// A free SFT slot and, for handle calls, a free entry in the current PSP's table.
	fn reserve_handle(&mut self, fcb: bool) -> Result<(usize, u16), DosErrorCode> {
		let index = match self.files.iter().position(|slot| slot.is_none()) {
			Some(index) => index,
			None => return self.fail(DosErrorCode::NoFileHandlesLeft),
		};
		let entry = if fcb { index as u16 } else { Psp::new(self.current_psp()).find_free_file_entry(&*self.mem) };
		if entry == PSP_NO_ENTRY {
			return self.fail(DosErrorCode::NoFileHandlesLeft);
		}
		Ok((index, entry))
	}

	fn install_open_file(&mut self, index: usize, entry: u16, fcb: bool, mut file: OpenFile) -> u16 {
		file.add_ref();
		self.files[index] = Some(file);
		if !fcb {
			Psp::new(self.current_psp()).set_file_handle(&mut *self.mem, entry, index as u8);
		}
		entry
	}

	pub fn open_file(&mut self, name: &[u8], flags: u8) -> Result<u16, DosErrorCode> {
		self.open_internal(name, flags, false)
	}

	fn open_internal(&mut self, name: &[u8], flags: u8, fcb: bool) -> Result<u16, DosErrorCode> {
		if flags > OPEN_READWRITE {
			warn!("Special file open command {:#x} file {}", flags, String::from_utf8_lossy(name));
		} else {
			debug!("File open command {:#x} file {}", flags, String::from_utf8_lossy(name));
		}
		let device = self.find_device(name);
		if device.is_none() {
			if let Ok((drive, fullname)) = self.make_name(name) {
				let attr = self.mounted(drive).and_then(|mounted| mounted.drive.get_file_attr(&fullname).ok());
				if attr.map_or(false, |attr| attr.intersects(FileAttributes::DIRECTORY | FileAttributes::VOLUME)) {
					return self.fail(DosErrorCode::AccessDenied);
				}
			}
		}

		let (drive, fullname) = self.make_name(name)?;
		let (index, entry) = self.reserve_handle(fcb)?;
		let file = match device {
			Some(device) => {
				let device_name = self.devices[device].as_ref().map(|device| device.name().to_vec()).unwrap_or_default();
				OpenFile::new(FileObject::Device(device), &device_name, flags, None)
			}
			None => {
				let drive_file = self.with_drive(drive, |mounted| mounted.drive.file_open(&fullname, flags))?;
				let mut file = OpenFile::new(FileObject::Regular(drive_file), &fullname, flags, Some(drive));
				if let Some(dir_entry) = self.dir_entry(drive, &fullname) {
					file.date = dir_entry.date;
					file.time = dir_entry.time;
					file.attr = dir_entry.attr;
				}
				file
			}
		};
		Ok(self.install_open_file(index, entry, fcb, file))
	}

	/// Creates or truncates `name`. A device name opens the device instead.
	pub fn create_file(&mut self, name: &[u8], attr: FileAttributes) -> Result<u16, DosErrorCode> {
		self.create_internal(name, attr, false)
	}

	fn create_internal(&mut self, name: &[u8], attr: FileAttributes, fcb: bool) -> Result<u16, DosErrorCode> {
		if self.find_device(name).is_some() {
			return self.open_internal(name, OPEN_READ, fcb);
		}
		debug!("File create attributes {:#x} file {}", attr.bits(), String::from_utf8_lossy(name));
		let (drive, fullname) = self.make_name(name)?;
		let (index, entry) = self.reserve_handle(fcb)?;
		if attr.contains(FileAttributes::DIRECTORY) {
			return self.fail(DosErrorCode::AccessDenied);
		}
		let drive_file = self.with_drive(drive, |mounted| mounted.drive.file_create(&fullname, attr))?;
		let mut file = OpenFile::new(FileObject::Regular(drive_file), &fullname, OPEN_READWRITE, Some(drive));
		file.attr = attr;
		if let Some(dir_entry) = self.dir_entry(drive, &fullname) {
			file.date = dir_entry.date;
			file.time = dir_entry.time;
		}
		Ok(self.install_open_file(index, entry, fcb, file))
	}

	/// INT 21h AX=6C00h. The low nibble of `action` says what to do with an existing file (fail,
	/// open, replace), the high nibble what to do with a missing one (fail, create).
	pub fn open_file_extended(&mut self, name: &[u8], flags: u16, create_attr: FileAttributes, action: u16) -> Result<(u16, ExtendedOpenResult), DosErrorCode> {
		if action == 0 || action & 0x0f > 2 || action & 0xf0 > 0x10 {
			return self.fail(DosErrorCode::FunctionNumberInvalid);
		}
		match self.open_file(name, flags as u8) {
			Ok(entry) => match action & 0x0f {
				0x01 => Ok((entry, ExtendedOpenResult::Opened)),
				0x02 => {
					self.close_file(entry)?;
					let entry = self.create_file(name, create_attr)?;
					Ok((entry, ExtendedOpenResult::Replaced))
				}
				_ => {
					self.close_file(entry)?;
					self.fail(DosErrorCode::FileAlreadyExists)
				}
			},
			Err(code) => {
				if action & 0xf0 == 0 {
					return Err(code);
				}
				let entry = self.create_file(name, create_attr)?;
				Ok((entry, ExtendedOpenResult::Created))
			}
		}
	}

	pub fn unlink_file(&mut self, name: &[u8]) -> Result<(), DosErrorCode> {
		let (drive, fullname) = self.make_name(name)?;
		self.with_drive(drive, |mounted| mounted.drive.file_unlink(&fullname))
	}

	pub fn get_file_attr(&mut self, name: &[u8]) -> Result<FileAttributes, DosErrorCode> {
		let (drive, fullname) = self.make_name(name)?;
		self.with_drive(drive, |mounted| mounted.drive.get_file_attr(&fullname))
	}

	pub fn file_exists(&mut self, name: &[u8]) -> bool {
		match self.make_name(name) {
			Ok((drive, fullname)) => self.mounted(drive).map_or(false, |mounted| mounted.drive.file_exists(&fullname)),
			Err(_) => false,
		}
	}

	/// The full "D:\PATH" form of `name`.
	pub fn canonicalize(&mut self, name: &[u8]) -> Result<Vec<u8>, DosErrorCode> {
		let (drive, fullname) = self.make_name(name)?;
		let mut canonical = vec![b'A' + drive, b':', b'\\'];
		canonical.extend_from_slice(&fullname);
		Ok(canonical)
	}

	pub fn read_file(&mut self, entry: u16, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		self.read_sft(index, destination)
	}

	pub(crate) fn read_sft(&mut self, index: usize, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		let devices = &mut self.devices;
		let result = match self.files.get_mut(index).and_then(|slot| slot.as_mut()) {
			Some(OpenFile { object: FileObject::Regular(file), flags, .. }) => {
				if *flags & 0x0f == OPEN_WRITE {
					Err(DosErrorCode::AccessDenied)
				} else {
					file.read(destination)
				}
			}
			Some(OpenFile { object: FileObject::Device(device), .. }) => match devices.get_mut(*device).and_then(|slot| slot.as_mut()) {
				Some(device) => device.read(destination),
				None => Err(DosErrorCode::InvalidFileHandle),
			},
			None => Err(DosErrorCode::InvalidFileHandle),
		};
		self.check(result)
	}

	/// Writing zero bytes to a regular file truncates it at the current position.
	pub fn write_file(&mut self, entry: u16, data: &[u8]) -> Result<usize, DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		self.write_sft(index, data)
	}

	pub(crate) fn write_sft(&mut self, index: usize, data: &[u8]) -> Result<usize, DosErrorCode> {
		let devices = &mut self.devices;
		let result = match self.files.get_mut(index).and_then(|slot| slot.as_mut()) {
			Some(OpenFile { object: FileObject::Regular(file), flags, .. }) => {
				if *flags & 0x0f == OPEN_READ {
					Err(DosErrorCode::AccessDenied)
				} else {
					file.write(data)
				}
			}
			Some(OpenFile { object: FileObject::Device(device), .. }) => match devices.get_mut(*device).and_then(|slot| slot.as_mut()) {
				Some(device) => device.write(data),
				None => Err(DosErrorCode::InvalidFileHandle),
			},
			None => Err(DosErrorCode::InvalidFileHandle),
		};
		self.check(result)
	}

	pub fn seek_file(&mut self, entry: u16, offset: i32, origin: u8) -> Result<u32, DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		let origin = match DosFileSeekOrigin::from_u8(origin) {
			Some(origin) => origin,
			None => return self.fail(DosErrorCode::FunctionNumberInvalid),
		};
		self.seek_sft(index, offset, origin)
	}

	pub(crate) fn seek_sft(&mut self, index: usize, offset: i32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
		let devices = &mut self.devices;
		let result = match self.files.get_mut(index).and_then(|slot| slot.as_mut()) {
			Some(OpenFile { object: FileObject::Regular(file), .. }) => file.seek(offset, origin),
			Some(OpenFile { object: FileObject::Device(device), .. }) => match devices.get_mut(*device).and_then(|slot| slot.as_mut()) {
				Some(device) => device.seek(offset, origin),
				None => Err(DosErrorCode::InvalidFileHandle),
			},
			None => Err(DosErrorCode::InvalidFileHandle),
		};
		self.check(result)
	}

	/// Size of a regular file, found by seeking to the end and back. Devices are empty.
	pub(crate) fn sft_size(&mut self, index: usize) -> Result<u32, DosErrorCode> {
		if self.files.get(index).and_then(|slot| slot.as_ref()).map_or(true, |file| file.is_device()) {
			return Ok(0);
		}
		let position = self.seek_sft(index, 0, DosFileSeekOrigin::Current)?;
		let size = self.seek_sft(index, 0, DosFileSeekOrigin::End);
		let restored = self.seek_sft(index, position as i32, DosFileSeekOrigin::Start);
		restored.and(size)
	}

	pub fn flush_file(&mut self, entry: u16) -> Result<(), DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		let result = match self.files[index].as_mut() {
			Some(OpenFile { object: FileObject::Regular(file), .. }) => file.flush(),
			_ => Ok(()),
		};
		self.check(result)
	}

	/// Drops one reference to the file behind `entry` and returns how many are left. The file
	/// is only really closed once none are.
	pub fn close_file(&mut self, entry: u16) -> Result<u32, DosErrorCode> {
		self.close_entry(entry, false)
	}

	pub(crate) fn close_entry(&mut self, entry: u16, fcb: bool) -> Result<u32, DosErrorCode> {
		let index = if fcb { entry as usize } else { self.real_handle(entry) as usize };
		if self.files.get(index).map_or(true, |slot| slot.is_none()) {
			return self.fail(DosErrorCode::InvalidFileHandle);
		}
		if !fcb {
			Psp::new(self.current_psp()).set_file_handle(&mut *self.mem, entry, PSP_UNUSED_HANDLE);
		}
		let refs = match self.files[index].as_mut() {
			Some(file) => file.remove_ref(),
			None => 0,
		};
		if refs == 0 {
			if let Some(mut file) = self.files[index].take() {
				file.close();
			}
			self.locks.retain(|lock| lock.handle as usize != index);
		}
		Ok(refs)
	}

	/// Points a new handle of the current process at the same SFT entry as `entry`.
	pub fn duplicate_entry(&mut self, entry: u16) -> Result<u16, DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		let psp = Psp::new(self.current_psp());
		let new_entry = psp.find_free_file_entry(&*self.mem);
		if new_entry == PSP_NO_ENTRY {
			return self.fail(DosErrorCode::NoFileHandlesLeft);
		}
		if let Some(file) = self.files[index].as_mut() {
			file.add_ref();
		}
		psp.set_file_handle(&mut *self.mem, new_entry, index as u8);
		Ok(new_entry)
	}

	/// Like `duplicate_entry`, but into `new_entry`, closing whatever was there.
	pub fn force_duplicate_entry(&mut self, entry: u16, new_entry: u16) -> Result<(), DosErrorCode> {
		if entry == new_entry {
			return self.fail(DosErrorCode::InvalidFileHandle);
		}
		let index = self.sft_index(entry, false)?;
		let psp = Psp::new(self.current_psp());
		if new_entry >= psp.get_max_files(&*self.mem) {
			return self.fail(DosErrorCode::InvalidFileHandle);
		}
		let old = self.real_handle(new_entry) as usize;
		if self.files.get(old).map_or(false, |slot| slot.is_some()) {
			self.close_file(new_entry)?;
		}
		if let Some(file) = self.files[index].as_mut() {
			file.add_ref();
		}
		psp.set_file_handle(&mut *self.mem, new_entry, index as u8);
		Ok(())
	}

	/// Mode 0 locks `len` bytes at `start`, mode 1 removes exactly such a lock again.
	pub fn lock_file(&mut self, entry: u16, mode: u8, start: u32, len: u32) -> Result<(), DosErrorCode> {
		let index = self.sft_index(entry, false)?;
		if !self.file_locking {
			return self.fail(DosErrorCode::FunctionNumberInvalid);
		}
		let (drive, name) = match self.files[index].as_ref() {
			Some(file) => (file.drive, file.name.clone()),
			None => return self.fail(DosErrorCode::InvalidFileHandle),
		};
		match mode {
			0 => {
				if self.locks.iter().any(|lock| lock.same_file(drive, &name) && lock.overlaps(start, len)) {
					return self.fail(DosErrorCode::LockViolation);
				}
				self.locks.push(FileLock { handle: index as u8, drive, name, start, len });
				Ok(())
			}
			1 => match self.locks.iter().position(|lock| lock.handle as usize == index && lock.start == start && lock.len == len) {
				Some(position) => {
					self.locks.remove(position);
					Ok(())
				}
				None => self.fail(DosErrorCode::LockViolation),
			},
			_ => self.fail(DosErrorCode::FunctionNumberInvalid),
		}
	}

	/// True when standard input has something to read.
	pub fn get_stdin_status(&self) -> bool {
		let handle = self.real_handle(0);
		if handle == PSP_UNUSED_HANDLE {
			return false;
		}
		match self.open_file_entry(handle) {
			Some(file) => !self.information(file).contains(DeviceInformation::EOF_OR_NOT_WRITTEN),
			None => true,
		}
	}

	/// Drive 0 is the default drive, 1 is A: and so on.
	pub fn get_current_dir(&mut self, drive: u8) -> Result<Vec<u8>, DosErrorCode> {
		let drive = if drive == 0 { self.get_default_drive() } else { drive - 1 };
		match self.mounted(drive) {
			Some(mounted) => Ok(mounted.curdir.clone()),
			None => self.fail(DosErrorCode::InvalidDrive),
		}
	}

	pub fn change_dir(&mut self, dir: &[u8]) -> Result<(), DosErrorCode> {
		let test = if dir.len() >= 2 && dir[1] == b':' { &dir[2..] } else { dir };
		if test.is_empty() {
			return self.fail(DosErrorCode::PathNotFound);
		}
		let (drive, fulldir) = self.make_name(dir)?;
		if !fulldir.is_empty() && test.last() == Some(&b'\\') {
			return self.fail(DosErrorCode::PathNotFound);
		}
		let changed = match self.mounted(drive) {
			Some(mounted) => {
				if mounted.drive.test_dir(&fulldir) {
					mounted.curdir = fulldir;
					true
				} else {
					false
				}
			}
			None => false,
		};
		if changed {
			Ok(())
		} else {
			self.fail(DosErrorCode::PathNotFound)
		}
	}

	pub fn make_dir(&mut self, dir: &[u8]) -> Result<(), DosErrorCode> {
		if dir.is_empty() || dir.last() == Some(&b'\\') {
			return self.fail(DosErrorCode::PathNotFound);
		}
		let (drive, fulldir) = self.make_name(dir)?;
		let made = self.mounted(drive).map_or(false, |mounted| mounted.drive.make_dir(&fulldir).is_ok());
		if made {
			Ok(())
		} else if self.test_dir(drive, &fulldir) {
			self.fail(DosErrorCode::AccessDenied)
		} else {
			self.fail(DosErrorCode::PathNotFound)
		}
	}

	pub fn remove_dir(&mut self, dir: &[u8]) -> Result<(), DosErrorCode> {
		let (drive, fulldir) = self.make_name(dir)?;
		if !self.test_dir(drive, &fulldir) {
			return self.fail(DosErrorCode::PathNotFound);
		}
		if self.mounted(drive).map_or(false, |mounted| mounted.curdir == fulldir) {
			return self.fail(DosErrorCode::RemoveCurrentDirectory);
		}
		let removed = self.mounted(drive).map_or(false, |mounted| mounted.drive.remove_dir(&fulldir).is_ok());
		if removed {
			Ok(())
		} else {
			// It exists and isn't current, so it must still have something in it.
			self.fail(DosErrorCode::AccessDenied)
		}
	}

	pub fn rename(&mut self, old_name: &[u8], new_name: &[u8]) -> Result<(), DosErrorCode> {
		let (old_drive, old_path) = self.make_name(old_name)?;
		let (new_drive, new_path) = self.make_name(new_name)?;
		if self.find_device(old_name).is_some() || self.find_device(new_name).is_some() {
			return self.fail(DosErrorCode::FileNotFound);
		}
		if old_drive != new_drive {
			return self.fail(DosErrorCode::NotSameDevice);
		}
		let (target_exists, source) = match self.mounted(old_drive) {
			Some(mounted) => (mounted.drive.get_file_attr(&new_path).is_ok(), mounted.drive.get_file_attr(&old_path)),
			None => return self.fail(DosErrorCode::InvalidDrive),
		};
		if target_exists {
			return self.fail(DosErrorCode::AccessDenied);
		}
		if let Err(code) = source {
			return self.fail(code);
		}
		let renamed = self.mounted(old_drive).map_or(false, |mounted| mounted.drive.rename(&old_path, &new_path).is_ok());
		if renamed {
			Ok(())
		} else {
			debug!("Rename of {} failed", String::from_utf8_lossy(old_name));
			self.fail(DosErrorCode::FileNotFound)
		}
	}

	/// Opens the file an FCB names, sharing the SFT entry if the file is already open.
	pub fn fcb_open(&mut self, fcb_pt: RealPt) -> Result<(), DosErrorCode> {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		let name = fcb.get_name(&*self.mem, self.get_default_drive());
		let (drive, fullname) = self.make_name(&name)?;
		let open = self.files.iter().position(|slot| match slot {
			Some(file) => file.open && file.drive == Some(drive) && file.is_name(&fullname),
			None => false,
		});
		let index = match open {
			Some(index) => {
				if let Some(file) = self.files[index].as_mut() {
					file.add_ref();
				}
				index
			}
			None => self.open_internal(&name, OPEN_READWRITE, true)? as usize,
		};
		self.attach_fcb(fcb, index)
	}

	pub fn fcb_create(&mut self, fcb_pt: RealPt) -> Result<(), DosErrorCode> {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		let name = fcb.get_name(&*self.mem, self.get_default_drive());
		let attr = match fcb.get_attr(&*self.mem) {
			Some(attr) if attr != 0 => FileAttributes::from_bits_truncate(attr),
			_ => FileAttributes::ARCHIVE,
		};
		let index = self.create_internal(&name, attr, true)? as usize;
		self.attach_fcb(fcb, index)
	}

	fn attach_fcb(&mut self, fcb: Fcb, index: usize) -> Result<(), DosErrorCode> {
		let size = self.sft_size(index)?;
		let (date, time) = self.files[index].as_ref().map_or((0, 0), |file| (file.date, file.time));
		let default_drive = self.get_default_drive();
		fcb.file_open(&mut *self.mem, index as u8, default_drive, size, date, time);
		Ok(())
	}

	pub fn fcb_close(&mut self, fcb_pt: RealPt) -> Result<(), DosErrorCode> {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		if !fcb.valid(&*self.mem) {
			return self.fail(DosErrorCode::InvalidFileHandle);
		}
		let handle = fcb.file_close(&mut *self.mem);
		self.close_entry(handle as u16, true)?;
		Ok(())
	}

	/// The SFT entry and record size of an FCB, positioned at its current record. A closed FCB
	/// that still has a record size is opened again.
	fn fcb_seek(&mut self, fcb_pt: RealPt) -> Option<(Fcb, usize, u32)> {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		let (handle, record_size) = fcb.get_seq_data(&*self.mem);
		if handle == 0xff && record_size != 0 {
			self.fcb_open(fcb_pt).ok()?;
			warn!("Reopened closed FCB");
		}
		let (handle, _) = fcb.get_seq_data(&*self.mem);
		let index = self.sft_index(handle as u16, true).ok()?;
		let position = fcb.record_position(&*self.mem);
		self.seek_sft(index, position as i32, DosFileSeekOrigin::Start).ok()?;
		Some((fcb, index, position))
	}

	fn fcb_dta_record(&self, record: u16, record_size: u16) -> u32 {
		real_to_phys(self.get_dta()) + record as u32 * record_size as u32
	}

	/// Reads the current record into slot `record` of the DTA and moves on to the next record.
	pub fn fcb_read(&mut self, fcb_pt: RealPt, record: u16) -> FcbRecordStatus {
		let (fcb, index, _) = match self.fcb_seek(fcb_pt) {
			Some(found) => found,
			None => return FcbRecordStatus::NoData,
		};
		let record_size = fcb.get_seq_data(&*self.mem).1;
		let mut buffer = vec![0; record_size as usize];
		let count = match self.read_sft(index, &mut buffer) {
			Ok(count) if count > 0 => count,
			_ => return FcbRecordStatus::NoData,
		};
		let dta = self.fcb_dta_record(record, record_size);
		self.mem.block_write(dta, &buffer);
		fcb.next_record(&mut *self.mem);
		if count == buffer.len() { FcbRecordStatus::Success } else { FcbRecordStatus::Partial }
	}

	/// Writes slot `record` of the DTA as the current record and moves on to the next record.
	pub fn fcb_write(&mut self, fcb_pt: RealPt, record: u16) -> FcbRecordStatus {
		let (fcb, index, position) = match self.fcb_seek(fcb_pt) {
			Some(found) => found,
			None => return FcbRecordStatus::NoData,
		};
		let record_size = fcb.get_seq_data(&*self.mem).1;
		let mut buffer = vec![0; record_size as usize];
		let dta = self.fcb_dta_record(record, record_size);
		self.mem.block_read(dta, &mut buffer);
		let written = match self.write_sft(index, &buffer) {
			Ok(written) => written,
			Err(_) => return FcbRecordStatus::NoData,
		};
		fcb_grow(&mut *self.mem, fcb, position + written as u32);
		fcb.next_record(&mut *self.mem);
		FcbRecordStatus::Success
	}

	/// Sets the file size to the current record's position with a zero length write.
	fn fcb_set_size(&mut self, fcb_pt: RealPt) -> FcbRecordStatus {
		let (fcb, index, position) = match self.fcb_seek(fcb_pt) {
			Some(found) => found,
			None => return FcbRecordStatus::NoData,
		};
		if self.write_sft(index, &[]).is_err() {
			return FcbRecordStatus::NoData;
		}
		fcb_grow(&mut *self.mem, fcb, position);
		FcbRecordStatus::Success
	}

	/// Reads `count` records starting at the random record. Plain random reads (`restore`) leave
	/// the current record at the random record. Block reads move the random record past the data
	/// instead. `count` comes back as the number of records read, a partial one included.
	pub fn fcb_random_read(&mut self, fcb_pt: RealPt, count: &mut u16, restore: bool) -> FcbRecordStatus {
		Fcb::new(&*self.mem, fcb_pt, true).seek_random(&mut *self.mem);
		let mut status = FcbRecordStatus::Success;
		let mut done = 0;
		while done < *count {
			status = self.fcb_read(fcb_pt, done);
			if status != FcbRecordStatus::Success {
				break;
			}
			done += 1;
		}
		if status == FcbRecordStatus::Partial {
			done += 1;
		}
		*count = done;
		self.fcb_finish_random(fcb_pt, restore);
		status
	}

	/// The write counterpart of `fcb_random_read`. Writing no records sets the file size to the
	/// random record's position.
	pub fn fcb_random_write(&mut self, fcb_pt: RealPt, count: &mut u16, restore: bool) -> FcbRecordStatus {
		Fcb::new(&*self.mem, fcb_pt, true).seek_random(&mut *self.mem);
		let status = if *count == 0 {
			self.fcb_set_size(fcb_pt)
		} else {
			let mut status = FcbRecordStatus::Success;
			let mut done = 0;
			while done < *count {
				status = self.fcb_write(fcb_pt, done);
				if status != FcbRecordStatus::Success {
					break;
				}
				done += 1;
			}
			*count = done;
			status
		};
		self.fcb_finish_random(fcb_pt, restore);
		status
	}

	fn fcb_finish_random(&mut self, fcb_pt: RealPt, restore: bool) {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		if restore {
			fcb.seek_random(&mut *self.mem);
		} else {
			fcb.random_from_record(&mut *self.mem);
		}
	}

	/// Stores the size of the named file in records, rounded up, as the random record.
	pub fn fcb_get_file_size(&mut self, fcb_pt: RealPt) -> Result<(), DosErrorCode> {
		let fcb = Fcb::new(&*self.mem, fcb_pt, true);
		let name = fcb.get_name(&*self.mem, self.get_default_drive());
		let entry = self.open_file(&name, OPEN_READ)?;
		let size = match self.sft_index(entry, false) {
			Ok(index) => self.sft_size(index),
			Err(code) => Err(code),
		};
		self.close_file(entry)?;
		let size = size?;
		let (_, record_size) = fcb.get_seq_data(&*self.mem);
		let record_size = if record_size == 0 { FCB_DEFAULT_RECORD_SIZE as u32 } else { record_size as u32 };
		fcb.set_random(&mut *self.mem, (size + record_size - 1) / record_size);
		Ok(())
	}
}

/// Raises the size an FCB reports to `end` if that is further out.
fn fcb_grow(mem: &mut dyn GuestMemory, fcb: Fcb, end: u32) {
	let (size, date, time) = fcb.get_size_date_time(mem);
	if end > size {
		fcb.set_size_date_time(mem, end, date, time);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dos_drive::DosDrive;
	use crate::dos_file::DriveFile;
	use crate::dos_tables::DOS_FIRST_SHELL;
	use crate::guest_memory::real_make;
	use crate::kernel::tests::test_kernel;
	use crate::kernel::CON_DEVICE;
	use crate::memory_drive::MemoryDrive;

	use std::cell::Cell;
	use std::rc::Rc;

	fn kernel_with_files(files: &[(&[u8], &[u8])]) -> DosKernel {
		let mut kernel = test_kernel();
		let mut drive = MemoryDrive::new();
		drive.make_dir(b"DOCS").unwrap();
		for (path, contents) in files {
			drive.add_file(path, contents).unwrap();
		}
		kernel.unmount_drive(2);
		kernel.mount_drive(2, Box::new(drive)).unwrap();
		Psp::new(DOS_FIRST_SHELL).make_new(kernel.memory_mut(), 0x100, DOS_FIRST_SHELL, 5);
		kernel
	}

	fn read_all(kernel: &mut DosKernel, name: &[u8]) -> Vec<u8> {
		let entry = kernel.open_file(name, OPEN_READ).unwrap();
		let mut buffer = vec![0; 256];
		let count = kernel.read_file(entry, &mut buffer).unwrap();
		kernel.close_file(entry).unwrap();
		buffer.truncate(count);
		buffer
	}

	#[derive(Debug)]
	struct CountingFile {
		closes: Rc<Cell<u32>>,
	}

	impl DriveFile for CountingFile {
		fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
			for byte in destination.iter_mut() {
				*byte = b'x';
			}
			Ok(destination.len())
		}
		fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
			Ok(data.len())
		}
		fn seek(&mut self, _offset: i32, _origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
			Ok(0)
		}
		fn close(&mut self) {
			self.closes.set(self.closes.get() + 1);
		}
	}

	#[test] fn test_open_read_seek() {
		let mut kernel = kernel_with_files(&[(b"README.TXT", b"hello world")]);
		let entry = kernel.open_file(b"c:\\readme.txt", OPEN_READ).unwrap();
		assert_eq!(entry, 0);
		assert_eq!(kernel.real_handle(0), 0);
		let mut buffer = [0; 5];
		assert_eq!(kernel.read_file(entry, &mut buffer), Ok(5));
		assert_eq!(&buffer, b"hello");
		assert_eq!(kernel.write_file(entry, b"no"), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.seek_file(entry, 0, 2), Ok(11));
		assert_eq!(kernel.seek_file(entry, 1, 0), Ok(1));
		assert_eq!(kernel.seek_file(entry, 0, 3), Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(kernel.open_file_entry(0).unwrap().name, b"README.TXT".to_vec());
	}

	#[test] fn test_create_and_write() {
		let mut kernel = kernel_with_files(&[]);
		let entry = kernel.create_file(b"DOCS\\NOTES.TXT", FileAttributes::ARCHIVE).unwrap();
		assert_eq!(kernel.write_file(entry, b"abcdef"), Ok(6));
		kernel.seek_file(entry, 3, 0).unwrap();
		assert_eq!(kernel.write_file(entry, b""), Ok(0));
		kernel.close_file(entry).unwrap();
		assert_eq!(read_all(&mut kernel, b"C:\\DOCS\\NOTES.TXT"), b"abc".to_vec());
		assert_eq!(kernel.create_file(b"C:\\DIR", FileAttributes::DIRECTORY), Err(DosErrorCode::AccessDenied));
	}

	#[test] fn test_open_errors() {
		let mut kernel = kernel_with_files(&[]);
		assert_eq!(kernel.open_file(b"MISSING.TXT", OPEN_READ), Err(DosErrorCode::FileNotFound));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::FileNotFound));
		assert_eq!(kernel.open_file(b"NODIR\\MISSING.TXT", OPEN_READ), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.open_file(b"DOCS", OPEN_READ), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.open_file(b"Q:\\FILE.TXT", OPEN_READ), Err(DosErrorCode::PathNotFound));
		assert!(kernel.files.iter().all(|slot| slot.is_none()));
	}

	#[test] fn test_invalid_handles() {
		let mut kernel = kernel_with_files(&[]);
		let mut buffer = [0; 4];
		assert_eq!(kernel.read_file(7, &mut buffer), Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.write_file(300, b"x"), Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.close_entry(255, true), Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.duplicate_entry(3), Err(DosErrorCode::InvalidFileHandle));
	}

	#[test] fn test_duplicate_refcounting() {
		let mut kernel = kernel_with_files(&[]);
		let closes = Rc::new(Cell::new(0));
		let (index, entry) = kernel.reserve_handle(false).unwrap();
		let file = OpenFile::new(FileObject::Regular(Box::new(CountingFile { closes: closes.clone() })), b"COUNT", OPEN_READWRITE, Some(2));
		kernel.install_open_file(index, entry, false, file);

		let alias = kernel.duplicate_entry(entry).unwrap();
		assert_ne!(alias, entry);
		assert_eq!(kernel.real_handle(alias), index as u8);
		assert_eq!(kernel.open_file_entry(index as u8).unwrap().ref_count, 2);

		assert_eq!(kernel.close_file(entry), Ok(1));
		assert_eq!(closes.get(), 0);
		let mut buffer = [0; 3];
		assert_eq!(kernel.read_file(alias, &mut buffer), Ok(3));
		assert_eq!(kernel.read_file(entry, &mut buffer), Err(DosErrorCode::InvalidFileHandle));

		assert_eq!(kernel.close_file(alias), Ok(0));
		assert_eq!(closes.get(), 1);
		assert!(kernel.open_file_entry(index as u8).is_none());
	}

	#[test] fn test_force_duplicate() {
		let mut kernel = kernel_with_files(&[(b"A.TXT", b"aaa"), (b"B.TXT", b"bbb")]);
		let a = kernel.open_file(b"A.TXT", OPEN_READ).unwrap();
		let b = kernel.open_file(b"B.TXT", OPEN_READ).unwrap();
		let b_index = kernel.real_handle(b);
		kernel.force_duplicate_entry(a, b).unwrap();
		assert_eq!(kernel.real_handle(b), kernel.real_handle(a));
		assert!(kernel.open_file_entry(b_index).is_none());
		let mut buffer = [0; 3];
		assert_eq!(kernel.read_file(b, &mut buffer), Ok(3));
		assert_eq!(&buffer, b"aaa");
		assert_eq!(kernel.force_duplicate_entry(a, a), Err(DosErrorCode::InvalidFileHandle));
		assert_eq!(kernel.force_duplicate_entry(a, 20), Err(DosErrorCode::InvalidFileHandle));
	}

	#[test] fn test_open_extended() {
		let mut kernel = kernel_with_files(&[(b"DATA.BIN", b"12345")]);
		let archive = FileAttributes::ARCHIVE;
		assert_eq!(kernel.open_file_extended(b"DATA.BIN", 2, archive, 0), Err(DosErrorCode::FunctionNumberInvalid));
		assert_eq!(kernel.open_file_extended(b"DATA.BIN", 2, archive, 0x03), Err(DosErrorCode::FunctionNumberInvalid));
		let (entry, result) = kernel.open_file_extended(b"DATA.BIN", 2, archive, 0x01).unwrap();
		assert_eq!(result, ExtendedOpenResult::Opened);
		kernel.close_file(entry).unwrap();

		assert_eq!(kernel.open_file_extended(b"DATA.BIN", 2, archive, 0x10), Err(DosErrorCode::FileAlreadyExists));
		assert!(kernel.files.iter().all(|slot| slot.is_none()));

		let (entry, result) = kernel.open_file_extended(b"DATA.BIN", 2, archive, 0x12).unwrap();
		assert_eq!(result, ExtendedOpenResult::Replaced);
		assert_eq!(kernel.seek_file(entry, 0, 2), Ok(0));
		kernel.close_file(entry).unwrap();

		assert_eq!(kernel.open_file_extended(b"NEW.BIN", 2, archive, 0x01), Err(DosErrorCode::FileNotFound));
		let (_, result) = kernel.open_file_extended(b"NEW.BIN", 2, archive, 0x11).unwrap();
		assert_eq!(result, ExtendedOpenResult::Created);
		assert!(kernel.file_exists(b"NEW.BIN"));
	}

	#[test] fn test_devices() {
		let mut kernel = kernel_with_files(&[]);
		assert_eq!(kernel.find_device(b"CON"), Some(CON_DEVICE));
		assert_eq!(kernel.find_device(b"con:"), Some(CON_DEVICE));
		assert_eq!(kernel.find_device(b"C:\\DOCS\\NUL.TXT"), Some(1));
		assert_eq!(kernel.find_device(b"C:\\NODIR\\NUL"), None);
		assert_eq!(kernel.find_device(b"CONFIG.SYS"), None);

		let entry = kernel.create_file(b"CON", FileAttributes::ARCHIVE).unwrap();
		assert!(kernel.get_file_information(entry).unwrap().is_device());
		assert_eq!(kernel.write_file(entry, b"hi"), Ok(2));
		assert_eq!(kernel.take_console_output(), b"hi".to_vec());
		assert_eq!(kernel.rename(b"CON", b"X.TXT"), Err(DosErrorCode::FileNotFound));
	}

	#[test] fn test_stdin_status() {
		let mut kernel = kernel_with_files(&[]);
		assert!(!kernel.get_stdin_status());
		assert_eq!(kernel.open_file(b"CON", OPEN_READWRITE), Ok(0));
		assert!(!kernel.get_stdin_status());
		kernel.push_console_input(b"y");
		assert!(kernel.get_stdin_status());
		let mut buffer = [0; 4];
		assert_eq!(kernel.read_file(0, &mut buffer), Ok(1));
		assert!(!kernel.get_stdin_status());
	}

	#[test] fn test_locking() {
		let mut kernel = kernel_with_files(&[(b"SHARED.DAT", &[0; 64])]);
		let first = kernel.open_file(b"SHARED.DAT", OPEN_READWRITE).unwrap();
		let second = kernel.open_file(b"SHARED.DAT", OPEN_READWRITE).unwrap();
		assert_eq!(kernel.lock_file(first, 0, 0, 10), Ok(()));
		assert_eq!(kernel.lock_file(second, 0, 5, 10), Err(DosErrorCode::LockViolation));
		assert_eq!(kernel.lock_file(second, 0, 10, 10), Ok(()));
		assert_eq!(kernel.lock_file(first, 1, 0, 5), Err(DosErrorCode::LockViolation));
		assert_eq!(kernel.lock_file(first, 1, 0, 10), Ok(()));
		assert_eq!(kernel.lock_file(second, 0, 0, 10), Ok(()));
		assert_eq!(kernel.lock_file(first, 2, 0, 10), Err(DosErrorCode::FunctionNumberInvalid));
		kernel.close_file(second).unwrap();
		assert_eq!(kernel.lock_file(first, 0, 0, 64), Ok(()));
		kernel.init_file_locking(false);
		assert_eq!(kernel.lock_file(first, 0, 0, 64), Err(DosErrorCode::FunctionNumberInvalid));
	}

	#[test] fn test_directories() {
		let mut kernel = kernel_with_files(&[]);
		assert_eq!(kernel.make_dir(b"C:\\GAMES"), Ok(()));
		assert_eq!(kernel.make_dir(b"C:\\GAMES"), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.make_dir(b"C:\\NODIR\\SUB"), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.make_dir(b"C:\\GAMES\\"), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.change_dir(b"C:\\GAMES\\"), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.change_dir(b"C:"), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.change_dir(b"games"), Ok(()));
		assert_eq!(kernel.get_current_dir(0), Ok(b"GAMES".to_vec()));
		assert_eq!(kernel.get_current_dir(3), Ok(b"GAMES".to_vec()));
		assert_eq!(kernel.get_current_dir(4), Err(DosErrorCode::InvalidDrive));

		let entry = kernel.create_file(b"SAVE.DAT", FileAttributes::ARCHIVE).unwrap();
		kernel.close_file(entry).unwrap();
		assert_eq!(kernel.canonicalize(b"save.dat"), Ok(b"C:\\GAMES\\SAVE.DAT".to_vec()));
		assert_eq!(kernel.remove_dir(b"C:\\GAMES"), Err(DosErrorCode::RemoveCurrentDirectory));
		assert_eq!(kernel.change_dir(b"\\"), Ok(()));
		assert_eq!(kernel.remove_dir(b"GAMES"), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.unlink_file(b"GAMES\\SAVE.DAT"), Ok(()));
		assert_eq!(kernel.remove_dir(b"GAMES"), Ok(()));
		assert_eq!(kernel.remove_dir(b"GAMES"), Err(DosErrorCode::PathNotFound));
		assert_eq!(kernel.unlink_file(b"GONE.DAT"), Err(DosErrorCode::FileNotFound));
	}

	#[test] fn test_rename() {
		let mut kernel = kernel_with_files(&[(b"README.TXT", b"text"), (b"OTHER.TXT", b"")]);
		kernel.mount_drive(3, Box::new(MemoryDrive::new())).unwrap();
		assert_eq!(kernel.rename(b"README.TXT", b"DOCS\\READ.ME"), Ok(()));
		assert_eq!(read_all(&mut kernel, b"DOCS\\READ.ME"), b"text".to_vec());
		assert_eq!(kernel.rename(b"OTHER.TXT", b"DOCS\\READ.ME"), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.rename(b"OTHER.TXT", b"D:\\OTHER.TXT"), Err(DosErrorCode::NotSameDevice));
		assert_eq!(kernel.rename(b"MISSING.TXT", b"NEW.TXT"), Err(DosErrorCode::FileNotFound));
		assert_eq!(kernel.get_file_attr(b"DOCS"), Ok(FileAttributes::DIRECTORY));
	}

	#[test] fn test_fcb_open_shares_entry() {
		let mut kernel = kernel_with_files(&[(b"README.TXT", b"hello world")]);
		let first = real_make(0x3000, 0);
		let second = real_make(0x3000, 0x40);
		for &pt in &[first, second] {
			let mut fcb = Fcb::new(kernel.memory(), pt, false);
			fcb.create(kernel.memory_mut(), false);
			fcb.set_name(kernel.memory_mut(), 3, *b"README  ", *b"TXT");
		}
		kernel.fcb_open(first).unwrap();
		kernel.fcb_open(second).unwrap();
		let fcb = Fcb::new(kernel.memory(), first, false);
		let (handle, record_size) = fcb.get_seq_data(kernel.memory());
		assert_eq!(record_size, 128);
		assert_eq!(fcb.get_size_date_time(kernel.memory()).0, 11);
		assert_eq!(Fcb::new(kernel.memory(), second, false).get_seq_data(kernel.memory()).0, handle);
		assert_eq!(kernel.open_file_entry(handle).unwrap().ref_count, 2);

		kernel.fcb_close(first).unwrap();
		assert_eq!(kernel.open_file_entry(handle).unwrap().ref_count, 1);
		kernel.fcb_close(second).unwrap();
		assert!(kernel.open_file_entry(handle).is_none());
		assert_eq!(Psp::new(DOS_FIRST_SHELL).find_free_file_entry(kernel.memory()), 0);
	}

	#[test] fn test_fcb_create() {
		let mut kernel = kernel_with_files(&[]);
		let pt = real_make(0x3000, 0);
		let mut fcb = Fcb::new(kernel.memory(), pt, true);
		fcb.create(kernel.memory_mut(), true);
		fcb.set_attr(kernel.memory_mut(), FileAttributes::HIDDEN.bits());
		fcb.set_name(kernel.memory_mut(), 0, *b"NEWFILE ", *b"DAT");
		kernel.fcb_create(pt).unwrap();
		assert_eq!(kernel.get_file_attr(b"NEWFILE.DAT"), Ok(FileAttributes::HIDDEN));
		assert_eq!(Fcb::new(kernel.memory(), pt, true).get_size_date_time(kernel.memory()).0, 0);
	}

	fn fcb_at(kernel: &mut DosKernel, pt: RealPt, name: [u8; 8], ext: [u8; 3]) -> Fcb {
		let mut fcb = Fcb::new(kernel.memory(), pt, false);
		fcb.create(kernel.memory_mut(), false);
		fcb.set_name(kernel.memory_mut(), 3, name, ext);
		fcb
	}

	#[test] fn test_fcb_sequential_read() {
		let mut contents = vec![b'a'; 128];
		contents.extend_from_slice(&[b'b'; 72]);
		let mut kernel = kernel_with_files(&[(b"RECORDS.DAT", &contents)]);
		let pt = real_make(0x3000, 0);
		let fcb = fcb_at(&mut kernel, pt, *b"RECORDS ", *b"DAT");
		kernel.set_dta(real_make(0x3000, 0x100));
		kernel.fcb_open(pt).unwrap();

		assert_eq!(kernel.fcb_read(pt, 0), FcbRecordStatus::Success);
		let mut record = [0; 128];
		kernel.memory().block_read(0x30100, &mut record);
		assert!(record.iter().all(|&byte| byte == b'a'));
		assert_eq!(fcb.get_record(kernel.memory()), (0, 1));

		kernel.memory_mut().fill(0x30100, 0xee, 128);
		assert_eq!(kernel.fcb_read(pt, 0), FcbRecordStatus::Partial);
		kernel.memory().block_read(0x30100, &mut record);
		assert!(record[..72].iter().all(|&byte| byte == b'b'));
		assert!(record[72..].iter().all(|&byte| byte == 0));
		assert_eq!(kernel.fcb_read(pt, 0), FcbRecordStatus::NoData);
		assert_eq!(fcb.get_record(kernel.memory()), (0, 2));
	}

	#[test] fn test_fcb_random_records() {
		let mut kernel = kernel_with_files(&[]);
		let pt = real_make(0x3000, 0);
		let fcb = fcb_at(&mut kernel, pt, *b"NEW     ", *b"DAT");
		kernel.set_dta(real_make(0x3000, 0x100));
		kernel.memory_mut().fill(0x30100, b'x', 128);
		kernel.fcb_create(pt).unwrap();
		assert_eq!(kernel.fcb_write(pt, 0), FcbRecordStatus::Success);
		assert_eq!(fcb.get_record(kernel.memory()), (0, 1));
		assert_eq!(fcb.get_size_date_time(kernel.memory()).0, 128);

		fcb.set_random(kernel.memory_mut(), 3);
		let mut count = 1;
		assert_eq!(kernel.fcb_random_write(pt, &mut count, true), FcbRecordStatus::Success);
		assert_eq!(count, 1);
		assert_eq!(fcb.get_record(kernel.memory()), (0, 3));
		assert_eq!(fcb.get_random(kernel.memory()), 3);
		assert_eq!(fcb.get_size_date_time(kernel.memory()).0, 512);
		kernel.fcb_close(pt).unwrap();

		// Closed, but the record size is still there, so a read opens it again.
		fcb.set_random(kernel.memory_mut(), 0);
		let mut count = 10;
		assert_eq!(kernel.fcb_random_read(pt, &mut count, false), FcbRecordStatus::NoData);
		assert_eq!(count, 4);
		assert_eq!(fcb.get_random(kernel.memory()), 4);
		assert_eq!(kernel.memory().read_u8(0x30100 + 3 * 128), b'x');
		assert_eq!(kernel.memory().read_u8(0x30100 + 2 * 128), 0);

		fcb.set_random(kernel.memory_mut(), 2);
		let mut count = 0;
		assert_eq!(kernel.fcb_random_write(pt, &mut count, true), FcbRecordStatus::Success);
		kernel.fcb_close(pt).unwrap();
		assert_eq!(kernel.fcb_get_file_size(pt), Ok(()));
		assert_eq!(fcb.get_random(kernel.memory()), 2);

		let missing = real_make(0x3000, 0x40);
		fcb_at(&mut kernel, missing, *b"MISSING ", *b"DAT");
		assert_eq!(kernel.fcb_get_file_size(missing), Err(DosErrorCode::FileNotFound));
	}

	#[test] fn test_clear_drives_and_files() {
		let mut kernel = kernel_with_files(&[(b"README.TXT", b"x")]);
		kernel.open_file(b"README.TXT", OPEN_READ).unwrap();
		kernel.clear_drives_and_files();
		assert!(kernel.open_file_entry(0).is_none());
		assert!(!kernel.drive_exists(2));
	}
}
