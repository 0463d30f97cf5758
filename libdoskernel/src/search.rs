use crate::dos_drive::{DirEntry, DOS_EPOCH_DATE};
use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::FileAttributes;
use crate::dos_name::{split_dir, split_filename, wild_file_cmp};
use crate::dta::{Dta, DtaResult};
use crate::kernel::DosKernel;

use log::{error, warn};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Searches that can be in progress at once. Older ones are overwritten.
pub const MAX_OPEN_SEARCHES: usize = 2048;

/// What a DTA's search id points at: the matches `find_next` hasn't handed out yet.
#[derive(Debug)]
pub struct SearchTable {
	slots: Vec<Option<VecDeque<DirEntry>>>,
	next: usize,
}

impl SearchTable {
	pub fn new() -> SearchTable {
		SearchTable {
			slots: (0..MAX_OPEN_SEARCHES).map(|_| None).collect(),
			next: 0,
		}
	}

	fn open(&mut self, entries: VecDeque<DirEntry>) -> u16 {
		let id = self.next;
		self.slots[id] = Some(entries);
		self.next = (id + 1) % MAX_OPEN_SEARCHES;
		id as u16
	}

	fn next_entry(&mut self, id: u16) -> Option<DirEntry> {
		let slot = self.slots.get_mut(id as usize)?;
		let entry = slot.as_mut()?.pop_front();
		if entry.is_none() {
			*slot = None;
		}
		entry
	}
}

pub type SearchResult = DtaResult;

impl DtaResult {
	pub fn is_file(&self) -> bool {
		!self.is_directory() && !self.is_device()
	}

	pub fn is_directory(&self) -> bool {
		self.attr & FileAttributes::DIRECTORY.bits() != 0
	}

	/// "." or "..".
	pub fn is_dummy_directory(&self) -> bool {
		self.name == b"." || self.name == b".."
	}

	pub fn is_device(&self) -> bool {
		self.attr & FileAttributes::DEVICE.bits() != 0
	}

	pub fn is_read_only(&self) -> bool {
		self.attr & FileAttributes::READ_ONLY.bits() != 0
	}

	fn name_and_ext(&self) -> (&[u8], &[u8]) {
		if self.is_dummy_directory() {
			return (&self.name, &[]);
		}
		let (name, ext) = split_filename(&self.name);
		(name, ext.unwrap_or(&[]))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSorting {
	None,
	ByName,
	ByExtension,
	BySize,
	ByDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultGrouping {
	None,
	FilesFirst,
	NonFilesFirst,
}

/// Orders search results the way DIR's /O and /A switches do. Groups come first and are never
/// reversed. Equal entries keep their order.
pub fn dos_sort(list: &mut [SearchResult], sorting: ResultSorting, reverse: bool, grouping: ResultGrouping) {
	list.sort_by(|a, b| {
		let group = match grouping {
			ResultGrouping::None => Ordering::Equal,
			ResultGrouping::FilesFirst => b.is_file().cmp(&a.is_file()),
			ResultGrouping::NonFilesFirst => a.is_file().cmp(&b.is_file()),
		};
		group.then_with(|| {
			let key = match sorting {
				ResultSorting::None => Ordering::Equal,
				ResultSorting::ByName => a.name.cmp(&b.name),
				ResultSorting::ByExtension => {
					let (a_name, a_ext) = a.name_and_ext();
					let (b_name, b_ext) = b.name_and_ext();
					a_ext.cmp(b_ext).then_with(|| a_name.cmp(b_name))
				}
				ResultSorting::BySize => a.size.cmp(&b.size),
				ResultSorting::ByDateTime => a.date.cmp(&b.date).then(a.time.cmp(&b.time)),
			};
			if reverse { key.reverse() } else { key }
		})
	});
}

fn dummy_directory(name: &[u8]) -> DirEntry {
	DirEntry {
		name: name.to_vec(),
		size: 0,
		date: DOS_EPOCH_DATE,
		time: 0,
		attr: FileAttributes::DIRECTORY,
	}
}

/// "EMULATEDDISK" is stored as "EMULATED.DIS" in directory listings.
fn label_entry(label: &[u8]) -> DirEntry {
	let mut name = label[..label.len().min(8)].to_vec();
	if label.len() > 8 {
		name.push(b'.');
		name.extend_from_slice(&label[8..label.len().min(11)]);
	}
	DirEntry {
		name,
		size: 0,
		date: DOS_EPOCH_DATE,
		time: 0,
		attr: FileAttributes::VOLUME,
	}
}

impl DosKernel {
	/// Sets up a search in the current DTA and writes the first match into it.
	pub fn find_first(&mut self, search: &[u8], attr: u8) -> Result<(), DosErrorCode> {
		let volume_only = attr == FileAttributes::VOLUME.bits();
		if search.last() == Some(&b'\\') {
			let drive_root = search.len() > 2 && search[search.len() - 2] == b':';
			if !(drive_root && volume_only) {
				return self.fail(DosErrorCode::NoMoreFiles);
			}
		}
		let (drive, fullsearch) = self.make_name(search)?;
		let device = self.find_device(search).is_some();
		let (dir, pattern) = split_dir(&fullsearch);
		let (dir, pattern) = (dir.to_vec(), pattern.to_vec());

		let dta = Dta::new(self.get_dta());
		dta.setup_search(&mut *self.mem, drive, attr, &pattern);
		if device {
			let name = match pattern.iter().position(|&c| c == b'.') {
				Some(dot) => &pattern[..dot],
				None => &pattern[..],
			};
			warn!("Finding device {}", String::from_utf8_lossy(name));
			dta.set_result(&mut *self.mem, name, 0, 0, 0, FileAttributes::DEVICE.bits());
			return Ok(());
		}

		let entries = self.search_entries(drive, &dir, &pattern, attr)?;
		let id = self.searches.open(entries);
		dta.set_dir_id(&mut *self.mem, id);
		self.find_next()
	}

	/// Writes the next match of the search in the current DTA.
	pub fn find_next(&mut self) -> Result<(), DosErrorCode> {
		let dta = Dta::new(self.get_dta());
		let drive = dta.get_search_drive(&*self.mem);
		if !self.drive_exists(drive) {
			error!("Corrupt search on drive {}", drive);
			return self.fail(DosErrorCode::NoMoreFiles);
		}
		match self.searches.next_entry(dta.get_dir_id(&*self.mem)) {
			Some(entry) => {
				dta.set_result(&mut *self.mem, &entry.name, entry.size, entry.date, entry.time, entry.attr.bits());
				Ok(())
			}
			None => self.fail(DosErrorCode::NoMoreFiles),
		}
	}

	fn search_entries(&mut self, drive: u8, dir: &[u8], pattern: &[u8], attr: u8) -> Result<VecDeque<DirEntry>, DosErrorCode> {
		let result = match self.mounted(drive) {
			Some(mounted) => {
				if mounted.drive.test_dir(dir) {
					let label = mounted.drive.label();
					mounted.drive.list_dir(dir).map(|listing| (label, listing))
				} else {
					Err(DosErrorCode::PathNotFound)
				}
			}
			None => Err(DosErrorCode::PathNotFound),
		};
		let (label, listing) = self.check(result)?;

		let mut found = VecDeque::new();
		let volume = FileAttributes::VOLUME.bits();
		if attr == volume {
			if let Some(label) = label {
				found.push_back(label_entry(&label));
			}
			return Ok(found);
		}
		if attr & volume != 0 && dir.is_empty() {
			if let Some(label) = label {
				let entry = label_entry(&label);
				if wild_file_cmp(&entry.name, pattern) {
					found.push_back(entry);
				}
			}
		}

		let hidden_unless_asked = (FileAttributes::DIRECTORY | FileAttributes::HIDDEN | FileAttributes::SYSTEM).bits();
		let dummies = if dir.is_empty() { vec![] } else { vec![dummy_directory(b"."), dummy_directory(b"..")] };
		for entry in dummies.into_iter().chain(listing) {
			if entry.attr.contains(FileAttributes::VOLUME) {
				continue;
			}
			if !attr & entry.attr.bits() & hidden_unless_asked != 0 {
				continue;
			}
			if wild_file_cmp(&entry.name, pattern) {
				found.push_back(entry);
			}
		}
		Ok(found)
	}
}
