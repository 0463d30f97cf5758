use crate::dos_error_codes::DosErrorCode;

pub const DOS_PATHLENGTH: usize = 80;
pub const DOS_NAMELENGTH: usize = 12;

/// An 8.3 name split into its two halves, without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DosFileName {
	pub title: Vec<u8>,
	pub ext: Vec<u8>,
}

impl DosFileName {
	pub fn parse(dos_filename: &[u8]) -> DosFileName {
		let (title, ext) = split_filename(dos_filename);
		DosFileName{title: title.to_ascii_uppercase(), ext: ext.unwrap_or(&[]).to_ascii_uppercase()}
	}

	pub fn real_dos_name(&self) -> Vec<u8> {
		let mut result = self.title.clone();
		if !self.ext.is_empty() {
			result.push(b'.');
			result.extend(&self.ext);
		}
		result
	}

	/// The space padded form stored in FCBs and directory entries.
	pub fn padded(&self) -> ([u8; 8], [u8; 3]) {
		let mut title = [b' '; 8];
		let mut ext = [b' '; 3];
		let title_len = self.title.len().min(8);
		title[..title_len].copy_from_slice(&self.title[..title_len]);
		let ext_len = self.ext.len().min(3);
		ext[..ext_len].copy_from_slice(&self.ext[..ext_len]);
		(title, ext)
	}
}

pub fn ascii_filename_to_string(ascii: &[u8]) -> String {
	ascii.iter().map(|c| c.to_ascii_uppercase() as char).collect()
}

/// Squeezes a host file name into 8.3. `extra_index` adds a "~N" tail to the title so that
/// several long names sharing a prefix stay distinct.
pub fn real_to_dos_name(filename: &str, extra_index: Option<usize>) -> DosFileName {
	let mut ascii_name = vec![];
	for c in filename.chars() {
		if c.is_ascii() && c != ' ' {
			ascii_name.push((c as u8).to_ascii_uppercase());
		} else if c != ' ' {
			ascii_name.push(b'_');
		}
	}
	let (file_title, file_ext) = split_filename(&ascii_name);
	let mut short_title: Vec<u8> = file_title.iter().cloned().filter(|&c| c != b'.').collect();
	short_title.truncate(8);
	let mut short_ext = file_ext.unwrap_or(&[]).to_vec();
	short_ext.truncate(3);

	if let Some(extra_index) = extra_index {
		let index_text = format!("~{}", extra_index).into_bytes();
		let current_title_len = short_title.len() + index_text.len();
		if current_title_len > 8 {
			short_title.truncate(short_title.len().saturating_sub(current_title_len - 8));
		}
		short_title.extend(&index_text);
	}

	DosFileName {
		title: short_title,
		ext: short_ext,
	}
}

/// Splits at the last '.', truncating the extension to 3 characters.
pub fn split_filename(filename: &[u8]) -> (&[u8], Option<&[u8]>) {
	if let Some(dot_pos) = filename.iter().rposition(|c| *c == b'.') {
		let after_dot = &filename[dot_pos + 1..];
		if after_dot.len() <= 3 {
			(&filename[..dot_pos], Some(after_dot))
		} else {
			(&filename[..dot_pos], Some(&after_dot[..3]))
		}
	} else {
		(filename, None)
	}
}

fn padded_parts(name: &[u8]) -> ([u8; 8], [u8; 3]) {
	let (title, ext) = split_filename(name);
	let title = &title[..title.len().min(8)];
	DosFileName {
		title: title.to_ascii_uppercase(),
		ext: ext.unwrap_or(&[]).to_ascii_uppercase(),
	}.padded()
}

/// DOS wildcard matching on padded 8.3 names: '?' matches any one character, including the
/// padding, and '*' matches the remainder of its half.
pub fn wild_file_cmp(file: &[u8], wild: &[u8]) -> bool {
	let (file_name, file_ext) = padded_parts(file);
	let (wild_name, wild_ext) = padded_parts(wild);
	for (&w, &f) in wild_name.iter().zip(file_name.iter()) {
		if w == b'*' {
			break;
		}
		if w != b'?' && w != f {
			return false;
		}
	}
	for (&w, &f) in wild_ext.iter().zip(file_ext.iter()) {
		if w == b'*' {
			return true;
		}
		if w != b'?' && w != f {
			return false;
		}
	}
	true
}

/// Turns a guest path into a drive number and an absolute, upper case path without the drive
/// or a leading '\'. `curdir_of` yields the current directory of a drive, or `None` when the
/// drive does not exist.
pub fn make_name<F>(name: &[u8], default_drive: u8, curdir_of: F) -> Result<(u8, Vec<u8>), DosErrorCode>
	where F: Fn(u8) -> Option<Vec<u8>>
{
	if name.is_empty() || name[0] == b' ' {
		return Err(DosErrorCode::FileNotFound);
	}
	let (drive, rest) = if name.len() >= 2 && name[1] == b':' {
		((name[0] | 0x20).wrapping_sub(b'a'), &name[2..])
	} else {
		(default_drive, name)
	};
	let curdir = curdir_of(drive).ok_or(DosErrorCode::PathNotFound)?;
	if rest.len() >= DOS_PATHLENGTH {
		return Err(DosErrorCode::PathNotFound);
	}

	let upname: Vec<u8> = rest.iter().filter(|&&c| c != b' ').map(|&c| match c {
		b'a'..=b'z' => c - 32,
		b'/' => b'\\',
		c => c,
	}).collect();

	let mut components: Vec<Vec<u8>> = if upname.first() == Some(&b'\\') {
		vec![]
	} else {
		curdir.split(|&c| c == b'\\').filter(|part| !part.is_empty()).map(|part| part.to_vec()).collect()
	};

	let parts: Vec<&[u8]> = upname.split(|&c| c == b'\\').collect();
	for (index, part) in parts.iter().enumerate() {
		if part.is_empty() || *part == b"." {
			continue;
		}
		if part.len() > 1 && part.iter().all(|&c| c == b'.') {
			for _ in 1..part.len() {
				components.pop();
			}
			continue;
		}
		let component = match part.iter().position(|&c| c == b'.') {
			Some(dot) => {
				let ext = &part[dot + 1..];
				if ext.contains(&b'.') {
					let is_last = parts[index + 1..].iter().all(|rest| rest.is_empty());
					return Err(if is_last { DosErrorCode::FileNotFound } else { DosErrorCode::PathNotFound });
				}
				let mut component = part[..dot.min(8)].to_vec();
				component.push(b'.');
				component.extend_from_slice(&ext[..ext.len().min(3)]);
				component
			}
			None => part[..part.len().min(8)].to_vec(),
		};
		let joined_len: usize = components.iter().map(|c| c.len() + 1).sum::<usize>() + component.len();
		if joined_len >= DOS_PATHLENGTH {
			return Err(DosErrorCode::PathNotFound);
		}
		components.push(component);
	}
	Ok((drive, components.join(&b'\\')))
}

/// Splits a full path into its directory and its last component.
pub fn split_dir(path: &[u8]) -> (&[u8], &[u8]) {
	match path.iter().rposition(|&c| c == b'\\') {
		Some(pos) => (&path[..pos], &path[pos + 1..]),
		None => (&path[..0], path),
	}
}
