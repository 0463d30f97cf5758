use crate::dos_error_codes::DosErrorCode;

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Size of the system file table.
pub const DOS_FILES: usize = 255;

pub const OPEN_READ: u8 = 0;
pub const OPEN_WRITE: u8 = 1;
pub const OPEN_READWRITE: u8 = 2;
pub const OPEN_READ_NO_MOD: u8 = 4;
/// Children don't get a copy of a handle opened with this bit.
pub const OPEN_NOT_INHERIT: u8 = 0x80;

bitflags! {
	// http://stanislavs.org/helppc/file_attributes.html
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct FileAttributes: u8 {
		const READ_ONLY = 0x01;
		const HIDDEN = 0x02;
		const SYSTEM = 0x04;
		const VOLUME = 0x08;
		const DIRECTORY = 0x10;
		const ARCHIVE = 0x20;
		const DEVICE = 0x40;
	}
}

bitflags! {
	// INT 21h AX=4400h, http://www.ctyme.com/intr/rb-2820.htm
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct DeviceInformation: u16 {
		const STDIN = 0x0001;
		const STDOUT = 0x0002;
		const NUL = 0x0004;
		const CLOCK = 0x0008;
		const SPECIAL = 0x0010;
		const BINARY = 0x0020;
		/// For devices: no input waiting. For files: not written to (or on a read only medium).
		const EOF_OR_NOT_WRITTEN = 0x0040;
		const CHAR_DEVICE = 0x0080;
		const EXT_DEVICE = 0x0200;
		const IOCTL = 0x4000;
		const DEVICE = 0x8000;
	}
}

impl DeviceInformation {
	pub fn is_device(&self) -> bool {
		self.contains(DeviceInformation::DEVICE)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
pub enum DosFileAccessMode {
	ReadOnly = 0,
	WriteOnly = 1,
	ReadWrite = 2,
}

impl DosFileAccessMode {
	/// The access mode from the low bits of an open mode byte. Mode 3 doesn't exist.
	pub fn from_flags(flags: u8) -> Option<DosFileAccessMode> {
		FromPrimitive::from_u8(flags & 3)
	}

	pub fn can_read(&self) -> bool {
		*self != DosFileAccessMode::WriteOnly
	}

	pub fn can_write(&self) -> bool {
		*self != DosFileAccessMode::ReadOnly
	}
}

#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
pub enum DosFileSeekOrigin {
	Start = 0,
	Current = 1,
	End = 2,
}

/// An open file on some drive.
pub trait DriveFile: std::fmt::Debug {
	fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode>;
	/// Returns the byte count written. Writing nothing truncates the file at the current position.
	fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode>;
	/// Returns the new position. A target before the start of the file leaves the position at the end.
	fn seek(&mut self, offset: i32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode>;
	fn flush(&mut self) -> Result<(), DosErrorCode> {
		Ok(())
	}
	fn close(&mut self) {}
	fn information(&self) -> DeviceInformation {
		DeviceInformation::empty()
	}
}

/// What a system file table entry actually talks to. Fixed when the entry is opened.
#[derive(Debug)]
pub enum FileObject {
	Regular(Box<dyn DriveFile>),
	/// Index into the kernel's device list.
	Device(usize),
}

/// One entry of the system file table. Several PSP handles can share it.
#[derive(Debug)]
pub struct OpenFile {
	pub object: FileObject,
	pub name: Vec<u8>,
	pub flags: u8,
	/// The drive a regular file lives on.
	pub drive: Option<u8>,
	pub date: u16,
	pub time: u16,
	pub attr: FileAttributes,
	pub ref_count: u32,
	pub open: bool,
}

impl OpenFile {
	pub fn new(object: FileObject, name: &[u8], flags: u8, drive: Option<u8>) -> OpenFile {
		OpenFile {
			object,
			name: name.to_vec(),
			flags,
			drive,
			date: 0,
			time: 0,
			attr: FileAttributes::ARCHIVE,
			ref_count: 0,
			open: true,
		}
	}

	pub fn is_device(&self) -> bool {
		match self.object {
			FileObject::Device(_) => true,
			FileObject::Regular(_) => false,
		}
	}

	pub fn access_mode(&self) -> Option<DosFileAccessMode> {
		DosFileAccessMode::from_flags(self.flags)
	}

	pub fn add_ref(&mut self) -> u32 {
		self.ref_count += 1;
		self.ref_count
	}

	pub fn remove_ref(&mut self) -> u32 {
		self.ref_count = self.ref_count.saturating_sub(1);
		self.ref_count
	}

	/// Case insensitive match against the stored name, used to find FCB files that are already open.
	pub fn is_name(&self, name: &[u8]) -> bool {
		self.name.eq_ignore_ascii_case(name)
	}

	pub fn close(&mut self) {
		if let FileObject::Regular(ref mut file) = self.object {
			file.close();
		}
		self.open = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct NullFile;

	impl DriveFile for NullFile {
		fn read(&mut self, _destination: &mut [u8]) -> Result<usize, DosErrorCode> {
			Ok(0)
		}
		fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
			Ok(data.len())
		}
		fn seek(&mut self, _offset: i32, _origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
			Ok(0)
		}
	}

	#[test] fn test_access_mode() {
		assert_eq!(DosFileAccessMode::from_flags(OPEN_READ | OPEN_NOT_INHERIT), Some(DosFileAccessMode::ReadOnly));
		assert_eq!(DosFileAccessMode::from_flags(0x42), Some(DosFileAccessMode::ReadWrite));
		assert_eq!(DosFileAccessMode::from_flags(3), None);
		assert!(!DosFileAccessMode::WriteOnly.can_read());
		assert!(!DosFileAccessMode::ReadOnly.can_write());
	}

	#[test] fn test_ref_counting() {
		let mut file = OpenFile::new(FileObject::Regular(Box::new(NullFile)), b"C:\\FOO.TXT", OPEN_READWRITE, Some(2));
		assert!(!file.is_device());
		assert_eq!(file.add_ref(), 1);
		assert_eq!(file.add_ref(), 2);
		assert_eq!(file.remove_ref(), 1);
		assert_eq!(file.remove_ref(), 0);
		assert_eq!(file.remove_ref(), 0);
		assert!(file.is_name(b"c:\\foo.txt"));
		file.close();
		assert!(!file.open);
	}

	#[test] fn test_device_information() {
		let info = DeviceInformation::from_bits_retain(0x80d3);
		assert!(info.is_device());
		assert!(info.contains(DeviceInformation::STDIN | DeviceInformation::STDOUT));
		assert!(!info.contains(DeviceInformation::IOCTL));
		assert_eq!(DosFileSeekOrigin::from_u8(2), Some(DosFileSeekOrigin::End));
	}
}
