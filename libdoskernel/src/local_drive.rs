use crate::dos_drive::{unix_to_dos_date_time, DirEntry, DosDrive, DOS_EPOCH_DATE};
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DeviceInformation, DosFileAccessMode, DosFileSeekOrigin, DriveFile, FileAttributes};
use crate::dos_name::{ascii_filename_to_string, real_to_dos_name, split_dir, DosFileName};

use log::warn;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Stable 8.3 names for the entries of one host directory.
#[derive(Debug)]
struct DirListingCache {
	dir_path: PathBuf,
	real_to_dos_names: HashMap<String, DosFileName>,
	dos_to_real_names: HashMap<DosFileName, String>,
}

impl DirListingCache {
	fn new(dir_path: PathBuf) -> DirListingCache {
		let mut dir_listing = DirListingCache {
			dir_path,
			real_to_dos_names: HashMap::new(),
			dos_to_real_names: HashMap::new(),
		};
		dir_listing.list_dir(&mut |_, _| {});
		dir_listing
	}

	fn get_dos_name(&mut self, real_filename: &str) -> DosFileName {
		if let Some(existing_dos_name) = self.real_to_dos_names.get(real_filename) {
			existing_dos_name.clone()
		} else {
			let mut dos_name = real_to_dos_name(real_filename, None);
			let mut name_index = 1;
			while self.dos_to_real_names.contains_key(&dos_name) {
				dos_name = real_to_dos_name(real_filename, Some(name_index));
				name_index += 1;
			}
			self.dos_to_real_names.insert(dos_name.clone(), real_filename.to_string());
			self.real_to_dos_names.insert(real_filename.to_string(), dos_name.clone());
			dos_name
		}
	}

	/// The host name of an existing entry.
	fn find_real_name(&mut self, dos_filename: &DosFileName) -> Option<String> {
		self.list_dir(&mut |_, _| {});
		self.dos_to_real_names.get(dos_filename).cloned()
	}

	/// The host name to use for an entry that may not exist yet.
	fn get_real_name(&mut self, dos_filename: &DosFileName) -> String {
		if let Some(existing_real_name) = self.find_real_name(dos_filename) {
			existing_real_name
		} else {
			let real_name = ascii_filename_to_string(&dos_filename.real_dos_name());
			self.dos_to_real_names.insert(dos_filename.clone(), real_name.clone());
			self.real_to_dos_names.insert(real_name.clone(), dos_filename.clone());
			real_name
		}
	}

	fn forget(&mut self, dos_filename: &DosFileName) {
		if let Some(real_name) = self.dos_to_real_names.remove(dos_filename) {
			self.real_to_dos_names.remove(&real_name);
		}
	}

	fn list_dir(&mut self, on_found_file: &mut dyn FnMut(DosFileName, &std::fs::Metadata)) {
		if let Ok(read_dir) = std::fs::read_dir(&self.dir_path) {
			for dir_file in read_dir {
				if let Ok(dir_file_entry) = dir_file {
					if let (Ok(dir_file_entry_name), Ok(metadata)) = (dir_file_entry.file_name().into_string(), dir_file_entry.metadata()) {
						on_found_file(self.get_dos_name(&dir_file_entry_name), &metadata);
					}
				}
			}
		}
	}
}

fn std_file_error_to_dos_error(err: std::io::Error) -> DosErrorCode {
	match err.kind() {
		std::io::ErrorKind::NotFound => DosErrorCode::FileNotFound,
		std::io::ErrorKind::PermissionDenied => DosErrorCode::AccessDenied,
		std::io::ErrorKind::AlreadyExists => DosErrorCode::FileAlreadyExists,
		_ => {
			warn!("Unexpected file error: {:?}", err);
			DosErrorCode::AccessDenied
		}
	}
}

fn metadata_date_time(metadata: &std::fs::Metadata) -> (u16, u16) {
	metadata.modified().ok()
		.and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
		.map(|since_epoch| unix_to_dos_date_time(since_epoch.as_secs()))
		.unwrap_or((DOS_EPOCH_DATE, 0))
}

fn metadata_attributes(metadata: &std::fs::Metadata) -> FileAttributes {
	if metadata.is_dir() {
		FileAttributes::DIRECTORY
	} else if metadata.permissions().readonly() {
		FileAttributes::READ_ONLY | FileAttributes::ARCHIVE
	} else {
		FileAttributes::ARCHIVE
	}
}

/// A host directory mounted as a drive.
#[derive(Debug)]
pub struct LocalDrive {
	root_path: PathBuf,
	dir_listings: HashMap<Vec<u8>, DirListingCache>,
	label: Option<Vec<u8>>,
	read_only: bool,
}

impl LocalDrive {
	pub fn new(root_path: PathBuf) -> LocalDrive {
		LocalDrive {
			root_path,
			dir_listings: HashMap::new(),
			label: None,
			read_only: false,
		}
	}

	pub fn set_label(&mut self, label: &[u8]) {
		self.label = Some(label.to_ascii_uppercase());
	}

	/// Opens for writing, creating and deleting all fail with "access denied".
	pub fn set_read_only(&mut self, read_only: bool) {
		self.read_only = read_only;
	}

	fn listing(&mut self, dos_dir: &[u8], real_dir: &Path) -> &mut DirListingCache {
		self.dir_listings.entry(dos_dir.to_vec()).or_insert_with(|| DirListingCache::new(real_dir.to_path_buf()))
	}

	fn real_dir_path(&mut self, dos_dir: &[u8]) -> Option<PathBuf> {
		let mut real_path = self.root_path.clone();
		let mut walked: Vec<u8> = vec![];
		for component in dos_dir.split(|&c| c == b'\\').filter(|c| !c.is_empty()) {
			let real_name = self.listing(&walked, &real_path).find_real_name(&DosFileName::parse(component))?;
			real_path.push(real_name);
			if !real_path.is_dir() {
				return None;
			}
			if !walked.is_empty() {
				walked.push(b'\\');
			}
			walked.extend_from_slice(component);
		}
		Some(real_path)
	}

	/// Host path of an entry. With `for_create` a name is made up for entries that don't exist.
	fn real_path(&mut self, dos_path: &[u8], for_create: bool) -> Result<PathBuf, DosErrorCode> {
		let (dir, name) = split_dir(dos_path);
		let real_dir = self.real_dir_path(dir).ok_or(DosErrorCode::PathNotFound)?;
		let dos_name = DosFileName::parse(name);
		let listing = self.listing(dir, &real_dir);
		let real_name = if for_create {
			listing.get_real_name(&dos_name)
		} else {
			listing.find_real_name(&dos_name).ok_or(DosErrorCode::FileNotFound)?
		};
		Ok(real_dir.join(real_name))
	}

	fn forget(&mut self, dos_path: &[u8]) {
		let (dir, name) = split_dir(dos_path);
		if let Some(listing) = self.dir_listings.get_mut(dir) {
			listing.forget(&DosFileName::parse(name));
		}
		self.dir_listings.retain(|cached_dir, _| !cached_dir.starts_with(dos_path) || dos_path.is_empty());
	}

	fn check_writable(&self) -> Result<(), DosErrorCode> {
		if self.read_only {
			Err(DosErrorCode::AccessDenied)
		} else {
			Ok(())
		}
	}
}

impl DosDrive for LocalDrive {
	fn file_open(&mut self, path: &[u8], flags: u8) -> Result<Box<dyn DriveFile>, DosErrorCode> {
		let mode = DosFileAccessMode::from_flags(flags).ok_or(DosErrorCode::InvalidFileAccessMode)?;
		if mode.can_write() {
			self.check_writable()?;
		}
		let real_path = self.real_path(path, false)?;
		if real_path.is_dir() {
			return Err(DosErrorCode::AccessDenied);
		}
		let file = std::fs::OpenOptions::new()
			.read(mode.can_read())
			.write(mode.can_write())
			.open(real_path)
			.map_err(std_file_error_to_dos_error)?;
		Ok(Box::new(LocalFile { file, read_only_medium: self.read_only }))
	}

	fn file_create(&mut self, path: &[u8], _attr: FileAttributes) -> Result<Box<dyn DriveFile>, DosErrorCode> {
		self.check_writable()?;
		let real_path = self.real_path(path, true)?;
		let file = std::fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(real_path)
			.map_err(std_file_error_to_dos_error)?;
		Ok(Box::new(LocalFile { file, read_only_medium: false }))
	}

	fn file_unlink(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		self.check_writable()?;
		let real_path = self.real_path(path, false).map_err(|_| DosErrorCode::FileNotFound)?;
		std::fs::remove_file(real_path).map_err(std_file_error_to_dos_error)?;
		self.forget(path);
		Ok(())
	}

	fn make_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		self.check_writable()?;
		let real_path = self.real_path(path, true)?;
		std::fs::create_dir(real_path).map_err(|err| match std_file_error_to_dos_error(err) {
			DosErrorCode::FileAlreadyExists => DosErrorCode::AccessDenied,
			other => other,
		})
	}

	fn remove_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		self.check_writable()?;
		let real_path = self.real_path(path, false).map_err(|_| DosErrorCode::PathNotFound)?;
		if !real_path.is_dir() {
			return Err(DosErrorCode::PathNotFound);
		}
		std::fs::remove_dir(real_path).map_err(|_| DosErrorCode::AccessDenied)?;
		self.forget(path);
		Ok(())
	}

	fn test_dir(&mut self, path: &[u8]) -> bool {
		self.real_dir_path(path).is_some()
	}

	fn list_dir(&mut self, path: &[u8]) -> Result<Vec<DirEntry>, DosErrorCode> {
		let real_dir = self.real_dir_path(path).ok_or(DosErrorCode::PathNotFound)?;
		let mut entries = vec![];
		self.listing(path, &real_dir).list_dir(&mut |dos_name, metadata| {
			let (date, time) = metadata_date_time(metadata);
			entries.push(DirEntry {
				name: dos_name.real_dos_name(),
				size: if metadata.is_dir() { 0 } else { metadata.len().min(u32::MAX as u64) as u32 },
				date,
				time,
				attr: metadata_attributes(metadata),
			});
		});
		Ok(entries)
	}

	fn get_file_attr(&mut self, path: &[u8]) -> Result<FileAttributes, DosErrorCode> {
		let real_path = self.real_path(path, false)?;
		let metadata = std::fs::metadata(real_path).map_err(std_file_error_to_dos_error)?;
		Ok(metadata_attributes(&metadata))
	}

	fn rename(&mut self, old_path: &[u8], new_path: &[u8]) -> Result<(), DosErrorCode> {
		self.check_writable()?;
		let old_real_path = self.real_path(old_path, false)?;
		if self.real_path(new_path, false).is_ok() {
			return Err(DosErrorCode::AccessDenied);
		}
		let new_real_path = self.real_path(new_path, true)?;
		std::fs::rename(old_real_path, new_real_path).map_err(std_file_error_to_dos_error)?;
		self.forget(old_path);
		Ok(())
	}

	fn file_exists(&mut self, path: &[u8]) -> bool {
		match self.real_path(path, false) {
			Ok(real_path) => real_path.is_file(),
			Err(_) => false,
		}
	}

	fn label(&self) -> Option<Vec<u8>> {
		self.label.clone()
	}

	fn info(&self) -> String {
		format!("local directory {}", self.root_path.display())
	}
}

#[derive(Debug)]
pub struct LocalFile {
	file: std::fs::File,
	read_only_medium: bool,
}

impl DriveFile for LocalFile {
	fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		let mut total = 0;
		while total < destination.len() {
			match self.file.read(&mut destination[total..]) {
				Ok(0) => break,
				Ok(read_count) => total += read_count,
				Err(err) => return Err(std_file_error_to_dos_error(err)),
			}
		}
		Ok(total)
	}

	fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
		if data.is_empty() {
			let pos = self.file.seek(std::io::SeekFrom::Current(0)).map_err(std_file_error_to_dos_error)?;
			self.file.set_len(pos).map_err(std_file_error_to_dos_error)?;
			return Ok(0);
		}
		self.file.write_all(data).map_err(std_file_error_to_dos_error)?;
		Ok(data.len())
	}

	fn seek(&mut self, offset: i32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
		let seek_from = match origin {
			DosFileSeekOrigin::Start => std::io::SeekFrom::Start(offset.max(0) as u64),
			DosFileSeekOrigin::Current => std::io::SeekFrom::Current(offset as i64),
			DosFileSeekOrigin::End => std::io::SeekFrom::End(offset as i64),
		};
		let file_pos = if origin == DosFileSeekOrigin::Start && offset < 0 {
			self.file.seek(std::io::SeekFrom::End(0))
		} else {
			self.file.seek(seek_from).or_else(|_| self.file.seek(std::io::SeekFrom::End(0)))
		};
		match file_pos {
			Ok(file_pos) => Ok(file_pos as u32),
			Err(err) => Err(std_file_error_to_dos_error(err)),
		}
	}

	fn flush(&mut self) -> Result<(), DosErrorCode> {
		self.file.flush().map_err(std_file_error_to_dos_error)
	}

	fn information(&self) -> DeviceInformation {
		if self.read_only_medium {
			DeviceInformation::EOF_OR_NOT_WRITTEN
		} else {
			DeviceInformation::empty()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dos_file::{OPEN_READ, OPEN_READWRITE};

	fn scratch_dir(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("libdoskernel-{}-{}", name, std::process::id()));
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}

	#[test] fn test_dir_listing_cache() {
		let dir = scratch_dir("listing");
		let mut dir_listing = DirListingCache::new(dir.clone());
		assert_eq!(String::from_utf8_lossy(&dir_listing.get_dos_name("foot.text").real_dos_name()), String::from_utf8_lossy(b"FOOT.TEX"));
		assert_eq!(String::from_utf8_lossy(&dir_listing.get_dos_name("foot.text2").real_dos_name()), String::from_utf8_lossy(b"FOOT~1.TEX"));
		assert_eq!(String::from_utf8_lossy(&dir_listing.get_dos_name("filewithlongname.txt").real_dos_name()), String::from_utf8_lossy(b"FILEWITH.TXT"));
		assert_eq!(String::from_utf8_lossy(&dir_listing.get_dos_name("filewithlongername.txt").real_dos_name()), String::from_utf8_lossy(b"FILEWI~1.TXT"));
		assert_eq!(String::from_utf8_lossy(&dir_listing.get_dos_name("filewithlongerername.txt").real_dos_name()), String::from_utf8_lossy(b"FILEWI~2.TXT"));
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test] fn test_host_files() {
		let dir = scratch_dir("files");
		std::fs::create_dir(dir.join("Games")).unwrap();
		std::fs::write(dir.join("Games").join("readme.txt"), b"hello").unwrap();
		let mut drive = LocalDrive::new(dir.clone());
		assert!(drive.test_dir(b"GAMES"));
		assert!(drive.file_exists(b"GAMES\\README.TXT"));
		let mut file = drive.file_open(b"GAMES\\README.TXT", OPEN_READ).unwrap();
		let mut buffer = [0; 8];
		assert_eq!(file.read(&mut buffer), Ok(5));
		assert_eq!(&buffer[..5], b"hello");
		let names: Vec<Vec<u8>> = drive.list_dir(b"GAMES").unwrap().into_iter().map(|e| e.name).collect();
		assert_eq!(names, vec![b"README.TXT".to_vec()]);
		assert_eq!(drive.file_open(b"NOPE\\X.TXT", OPEN_READ).err(), Some(DosErrorCode::PathNotFound));
		assert_eq!(drive.file_open(b"GAMES\\X.TXT", OPEN_READ).err(), Some(DosErrorCode::FileNotFound));
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test] fn test_create_and_truncate() {
		let dir = scratch_dir("create");
		let mut drive = LocalDrive::new(dir.clone());
		let mut file = drive.file_create(b"OUT.BIN", FileAttributes::ARCHIVE).unwrap();
		assert_eq!(file.write(b"0123456789"), Ok(10));
		assert_eq!(file.seek(4, DosFileSeekOrigin::Start), Ok(4));
		assert_eq!(file.write(&[]), Ok(0));
		file.flush().unwrap();
		assert_eq!(std::fs::read(dir.join("OUT.BIN")).unwrap(), b"0123".to_vec());
		let mut reopened = drive.file_open(b"OUT.BIN", OPEN_READWRITE).unwrap();
		assert_eq!(reopened.seek(-2, DosFileSeekOrigin::End), Ok(2));
		drive.set_read_only(true);
		assert_eq!(drive.file_open(b"OUT.BIN", OPEN_READWRITE).err(), Some(DosErrorCode::AccessDenied));
		let _ = std::fs::remove_dir_all(&dir);
	}
}
