use crate::dos_drive::{DirEntry, DosDrive, DOS_EPOCH_DATE};
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DosFileAccessMode, DosFileSeekOrigin, DriveFile, FileAttributes};
use crate::dos_name::split_dir;

use std::cell::RefCell;
use std::rc::Rc;

type FileData = Rc<RefCell<Vec<u8>>>;

#[derive(Debug)]
enum MemoryNode {
	Dir,
	File(FileData),
}

#[derive(Debug)]
struct MemoryEntry {
	path: Vec<u8>,
	node: MemoryNode,
	attr: FileAttributes,
	date: u16,
	time: u16,
}

/// A drive that lives entirely in host memory. Entries list in creation order, like a FAT
/// directory that never had anything deleted.
#[derive(Debug)]
pub struct MemoryDrive {
	entries: Vec<MemoryEntry>,
	label: Option<Vec<u8>>,
	removable: bool,
	date: u16,
	time: u16,
}

impl MemoryDrive {
	pub fn new() -> MemoryDrive {
		MemoryDrive {
			entries: vec![],
			label: None,
			removable: false,
			date: DOS_EPOCH_DATE,
			time: 0,
		}
	}

	pub fn with_label(label: &[u8]) -> MemoryDrive {
		MemoryDrive {
			label: Some(label.to_ascii_uppercase()),
			..MemoryDrive::new()
		}
	}

	pub fn set_removable(&mut self, removable: bool) {
		self.removable = removable;
	}

	/// Stamp used for everything created from now on.
	pub fn set_timestamp(&mut self, date: u16, time: u16) {
		self.date = date;
		self.time = time;
	}

	pub fn add_file(&mut self, path: &[u8], contents: &[u8]) -> Result<(), DosErrorCode> {
		let mut file = self.file_create(path, FileAttributes::ARCHIVE)?;
		file.write(contents)?;
		Ok(())
	}

	pub fn contents(&self, path: &[u8]) -> Option<Vec<u8>> {
		match self.find(path).map(|index| &self.entries[index].node) {
			Some(MemoryNode::File(data)) => Some(data.borrow().clone()),
			_ => None,
		}
	}

	fn find(&self, path: &[u8]) -> Option<usize> {
		self.entries.iter().position(|entry| entry.path == path)
	}

	fn is_dir(&self, path: &[u8]) -> bool {
		path.is_empty() || match self.find(path) {
			Some(index) => match self.entries[index].node {
				MemoryNode::Dir => true,
				MemoryNode::File(_) => false,
			},
			None => false,
		}
	}

	fn parent_exists(&self, path: &[u8]) -> bool {
		self.is_dir(split_dir(path).0)
	}

	fn missing_error(&self, path: &[u8]) -> DosErrorCode {
		if self.parent_exists(path) {
			DosErrorCode::FileNotFound
		} else {
			DosErrorCode::PathNotFound
		}
	}

	fn file_data(&self, path: &[u8]) -> Result<(FileData, FileAttributes), DosErrorCode> {
		match self.find(path) {
			Some(index) => match self.entries[index].node {
				MemoryNode::File(ref data) => Ok((data.clone(), self.entries[index].attr)),
				MemoryNode::Dir => Err(DosErrorCode::AccessDenied),
			},
			None => Err(self.missing_error(path)),
		}
	}
}

impl DosDrive for MemoryDrive {
	fn file_open(&mut self, path: &[u8], flags: u8) -> Result<Box<dyn DriveFile>, DosErrorCode> {
		let (data, attr) = self.file_data(path)?;
		let mode = DosFileAccessMode::from_flags(flags).ok_or(DosErrorCode::InvalidFileAccessMode)?;
		if mode.can_write() && attr.contains(FileAttributes::READ_ONLY) {
			return Err(DosErrorCode::AccessDenied);
		}
		Ok(Box::new(MemoryFile::new(data)))
	}

	fn file_create(&mut self, path: &[u8], attr: FileAttributes) -> Result<Box<dyn DriveFile>, DosErrorCode> {
		if path.is_empty() || !self.parent_exists(path) {
			return Err(DosErrorCode::PathNotFound);
		}
		let data = match self.find(path) {
			Some(index) => {
				let entry = &mut self.entries[index];
				match entry.node {
					MemoryNode::File(ref data) => {
						data.borrow_mut().clear();
						entry.attr = attr;
						data.clone()
					}
					MemoryNode::Dir => return Err(DosErrorCode::AccessDenied),
				}
			}
			None => {
				let data: FileData = Rc::new(RefCell::new(vec![]));
				self.entries.push(MemoryEntry {
					path: path.to_vec(),
					node: MemoryNode::File(data.clone()),
					attr,
					date: self.date,
					time: self.time,
				});
				data
			}
		};
		Ok(Box::new(MemoryFile::new(data)))
	}

	fn file_unlink(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		match self.find(path) {
			Some(index) => match self.entries[index].node {
				MemoryNode::File(_) => {
					self.entries.remove(index);
					Ok(())
				}
				MemoryNode::Dir => Err(DosErrorCode::AccessDenied),
			},
			None => Err(DosErrorCode::FileNotFound),
		}
	}

	fn make_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		if path.is_empty() || !self.parent_exists(path) {
			return Err(DosErrorCode::PathNotFound);
		}
		if self.find(path).is_some() {
			return Err(DosErrorCode::AccessDenied);
		}
		self.entries.push(MemoryEntry {
			path: path.to_vec(),
			node: MemoryNode::Dir,
			attr: FileAttributes::DIRECTORY,
			date: self.date,
			time: self.time,
		});
		Ok(())
	}

	fn remove_dir(&mut self, path: &[u8]) -> Result<(), DosErrorCode> {
		if path.is_empty() || !self.is_dir(path) {
			return Err(DosErrorCode::PathNotFound);
		}
		if self.entries.iter().any(|entry| split_dir(&entry.path).0 == path) {
			return Err(DosErrorCode::AccessDenied);
		}
		self.entries.retain(|entry| entry.path != path);
		Ok(())
	}

	fn test_dir(&mut self, path: &[u8]) -> bool {
		self.is_dir(path)
	}

	fn list_dir(&mut self, path: &[u8]) -> Result<Vec<DirEntry>, DosErrorCode> {
		if !self.is_dir(path) {
			return Err(DosErrorCode::PathNotFound);
		}
		Ok(self.entries.iter()
			.filter(|entry| split_dir(&entry.path).0 == path)
			.map(|entry| DirEntry {
				name: split_dir(&entry.path).1.to_vec(),
				size: match entry.node {
					MemoryNode::File(ref data) => data.borrow().len() as u32,
					MemoryNode::Dir => 0,
				},
				date: entry.date,
				time: entry.time,
				attr: entry.attr,
			})
			.collect())
	}

	fn get_file_attr(&mut self, path: &[u8]) -> Result<FileAttributes, DosErrorCode> {
		match self.find(path) {
			Some(index) => Ok(self.entries[index].attr),
			None => Err(self.missing_error(path)),
		}
	}

	fn rename(&mut self, old_path: &[u8], new_path: &[u8]) -> Result<(), DosErrorCode> {
		if self.find(old_path).is_none() {
			return Err(self.missing_error(old_path));
		}
		if self.find(new_path).is_some() {
			return Err(DosErrorCode::AccessDenied);
		}
		if !self.parent_exists(new_path) {
			return Err(DosErrorCode::PathNotFound);
		}
		for entry in self.entries.iter_mut() {
			if entry.path == old_path {
				entry.path = new_path.to_vec();
			} else if entry.path.starts_with(old_path) && entry.path.get(old_path.len()) == Some(&b'\\') {
				let mut moved = new_path.to_vec();
				moved.extend_from_slice(&entry.path[old_path.len()..]);
				entry.path = moved;
			}
		}
		Ok(())
	}

	fn file_exists(&mut self, path: &[u8]) -> bool {
		self.file_data(path).is_ok()
	}

	fn is_removable(&self) -> bool {
		self.removable
	}

	fn label(&self) -> Option<Vec<u8>> {
		self.label.clone()
	}

	fn info(&self) -> String {
		format!("memory drive, {} entries", self.entries.len())
	}
}

#[derive(Debug)]
pub struct MemoryFile {
	data: FileData,
	pos: u32,
}

impl MemoryFile {
	fn new(data: FileData) -> MemoryFile {
		MemoryFile { data, pos: 0 }
	}
}

impl DriveFile for MemoryFile {
	fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		let data = self.data.borrow();
		let start = (self.pos as usize).min(data.len());
		let count = destination.len().min(data.len() - start);
		destination[..count].copy_from_slice(&data[start..start + count]);
		self.pos += count as u32;
		Ok(count)
	}

	fn write(&mut self, source: &[u8]) -> Result<usize, DosErrorCode> {
		let mut data = self.data.borrow_mut();
		let start = self.pos as usize;
		if source.is_empty() {
			data.truncate(start);
			return Ok(0);
		}
		if data.len() < start + source.len() {
			data.resize(start + source.len(), 0);
		}
		data[start..start + source.len()].copy_from_slice(source);
		self.pos += source.len() as u32;
		Ok(source.len())
	}

	fn seek(&mut self, offset: i32, origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
		let len = self.data.borrow().len() as i64;
		let base = match origin {
			DosFileSeekOrigin::Start => 0,
			DosFileSeekOrigin::Current => self.pos as i64,
			DosFileSeekOrigin::End => len,
		};
		let target = base + offset as i64;
		self.pos = if target < 0 { len as u32 } else { target as u32 };
		Ok(self.pos)
	}
}
