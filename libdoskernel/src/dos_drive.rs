use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DriveFile, FileAttributes};

/// Number of drive letters, A: to Z:.
pub const DOS_DRIVES: usize = 26;

/// One directory entry as a drive reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
	/// 8.3 name, eg. b"README.TXT".
	pub name: Vec<u8>,
	pub size: u32,
	pub date: u16,
	pub time: u16,
	pub attr: FileAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
	pub bytes_per_sector: u16,
	pub sectors_per_cluster: u8,
	pub total_clusters: u16,
	pub free_clusters: u16,
}

impl Default for AllocationInfo {
	fn default() -> AllocationInfo {
		AllocationInfo {
			bytes_per_sector: 512,
			sectors_per_cluster: 32,
			total_clusters: 32765,
			free_clusters: 16000,
		}
	}
}

/// A mounted drive. Paths are what `make_name` produces: upper case, backslash separated,
/// without the drive letter or a leading backslash. The root is the empty path.
pub trait DosDrive: std::fmt::Debug {
	fn file_open(&mut self, path: &[u8], flags: u8) -> Result<Box<dyn DriveFile>, DosErrorCode>;
	/// Creates or truncates.
	fn file_create(&mut self, path: &[u8], attr: FileAttributes) -> Result<Box<dyn DriveFile>, DosErrorCode>;
	fn file_unlink(&mut self, path: &[u8]) -> Result<(), DosErrorCode>;
	fn make_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode>;
	fn remove_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode>;
	fn test_dir(&mut self, path: &[u8]) -> bool;
	/// Entries of a directory, without "." and "..".
	fn list_dir(&mut self, path: &[u8]) -> Result<Vec<DirEntry>, DosErrorCode>;
	fn get_file_attr(&mut self, path: &[u8]) -> Result<FileAttributes, DosErrorCode>;
	fn rename(&mut self, old_path: &[u8], new_path: &[u8]) -> Result<(), DosErrorCode>;
	fn file_exists(&mut self, path: &[u8]) -> bool;
	fn allocation_info(&self) -> AllocationInfo {
		AllocationInfo::default()
	}
	fn media_byte(&self) -> u8 {
		0xf8
	}
	fn is_remote(&self) -> bool {
		false
	}
	fn is_removable(&self) -> bool {
		false
	}
	/// The volume label, if the drive has one.
	fn label(&self) -> Option<Vec<u8>> {
		None
	}
	/// Free text description for the MEM report.
	fn info(&self) -> String;
}

/// A drive together with the state DOS keeps about it.
#[derive(Debug)]
pub struct MountedDrive {
	pub drive: Box<dyn DosDrive>,
	/// Current directory in `make_name` form.
	pub curdir: Vec<u8>,
}

impl MountedDrive {
	pub fn new(drive: Box<dyn DosDrive>) -> MountedDrive {
		MountedDrive {
			drive,
			curdir: vec![],
		}
	}
}

// http://stanislavs.org/helppc/file_attributes.html, date and time fields
pub fn pack_dos_date(year: u16, month: u8, day: u8) -> u16 {
	(year.saturating_sub(1980) << 9) | ((month as u16 & 0x0f) << 5) | (day as u16 & 0x1f)
}

pub fn pack_dos_time(hour: u8, minute: u8, second: u8) -> u16 {
	((hour as u16 & 0x1f) << 11) | ((minute as u16 & 0x3f) << 5) | ((second as u16 / 2) & 0x1f)
}

/// 1980-01-01 00:00, the earliest time a FAT entry can hold.
pub const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// Converts seconds since 1970 to a (date, time) pair.
pub fn unix_to_dos_date_time(unix_seconds: u64) -> (u16, u16) {
	let days = (unix_seconds / 86400) as i64;
	let seconds = unix_seconds % 86400;
	// Civil from days, http://howardhinnant.github.io/date_algorithms.html
	let z = days + 719468;
	let era = z.div_euclid(146097);
	let doe = z - era * 146097;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
	let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
	let year = (yoe + era * 400 + if month <= 2 { 1 } else { 0 }) as u16;
	if year < 1980 {
		return (DOS_EPOCH_DATE, 0);
	}
	let time = pack_dos_time((seconds / 3600) as u8, ((seconds / 60) % 60) as u8, (seconds % 60) as u8);
	(pack_dos_date(year, month, day), time)
}
