use crate::dos_error_codes::DosErrorCode;
use crate::dos_file::{DeviceInformation, DosFileSeekOrigin};

use std::collections::VecDeque;

/// Number of device slots the kernel keeps.
pub const DOS_DEVICES: usize = 10;

/// A character device that can be opened by name, like CON or NUL.
pub trait DosDevice: std::fmt::Debug {
	/// Upper case name without padding, eg. b"CON".
	fn name(&self) -> &[u8];
	fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode>;
	fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode>;
	fn seek(&mut self, _offset: i32, _origin: DosFileSeekOrigin) -> Result<u32, DosErrorCode> {
		Ok(0)
	}
	fn information(&self) -> DeviceInformation;
	/// IOCTL AX=4402h. `None` when the device has no control channel.
	fn read_from_control_channel(&mut self, _destination: &mut [u8]) -> Option<u16> {
		None
	}
	/// IOCTL AX=4403h.
	fn write_to_control_channel(&mut self, _data: &[u8]) -> Option<u16> {
		None
	}
	/// Queue input for the guest to read.
	fn push_input(&mut self, _data: &[u8]) {}
	/// Drain whatever the guest wrote.
	fn take_output(&mut self) -> Vec<u8> {
		vec![]
	}
	fn shutdown(&mut self) {}
}

#[derive(Debug, Default)]
pub struct ConsoleDevice {
	input: VecDeque<u8>,
	output: Vec<u8>,
}

impl ConsoleDevice {
	pub fn new() -> ConsoleDevice {
		ConsoleDevice::default()
	}
}

impl DosDevice for ConsoleDevice {
	fn name(&self) -> &[u8] {
		b"CON"
	}

	fn read(&mut self, destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		let mut count = 0;
		while count < destination.len() {
			match self.input.pop_front() {
				Some(c) => {
					destination[count] = c;
					count += 1;
				}
				None => break,
			}
		}
		Ok(count)
	}

	fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
		self.output.extend_from_slice(data);
		Ok(data.len())
	}

	fn information(&self) -> DeviceInformation {
		let info = DeviceInformation::from_bits_retain(0x80d3);
		if self.input.is_empty() {
			info
		} else {
			info - DeviceInformation::EOF_OR_NOT_WRITTEN
		}
	}

	fn push_input(&mut self, data: &[u8]) {
		self.input.extend(data);
	}

	fn take_output(&mut self) -> Vec<u8> {
		std::mem::replace(&mut self.output, vec![])
	}

	fn shutdown(&mut self) {
		self.input.clear();
	}
}

#[derive(Debug, Default)]
pub struct NulDevice;

impl DosDevice for NulDevice {
	fn name(&self) -> &[u8] {
		b"NUL"
	}

	fn read(&mut self, _destination: &mut [u8]) -> Result<usize, DosErrorCode> {
		Ok(0)
	}

	fn write(&mut self, data: &[u8]) -> Result<usize, DosErrorCode> {
		Ok(data.len())
	}

	fn information(&self) -> DeviceInformation {
		DeviceInformation::from_bits_retain(0x8084)
	}
}

/// Strips a drive, a directory and an extension from a path and returns what is left if it
/// names a device. "C:\DEV\CON.TXT" still opens CON.
pub fn device_base_name(name: &[u8]) -> Vec<u8> {
	let name = match name.iter().rposition(|&c| c == b'\\' || c == b'/' || c == b':') {
		Some(pos) => &name[pos + 1..],
		None => name,
	};
	let name = match name.iter().position(|&c| c == b'.') {
		Some(pos) => &name[..pos],
		None => name,
	};
	name.iter().filter(|&&c| c != b' ').map(|c| c.to_ascii_uppercase()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test] fn test_console_input_status() {
		let mut con = ConsoleDevice::new();
		assert_eq!(con.information().bits(), 0x80d3);
		con.push_input(b"ab");
		assert_eq!(con.information().bits(), 0x8093);
		let mut buffer = [0; 4];
		assert_eq!(con.read(&mut buffer), Ok(2));
		assert_eq!(&buffer[..2], b"ab");
		assert_eq!(con.information().bits(), 0x80d3);
	}

	#[test] fn test_console_output() {
		let mut con = ConsoleDevice::new();
		assert_eq!(con.write(b"hello"), Ok(5));
		assert_eq!(con.take_output(), b"hello".to_vec());
		assert!(con.take_output().is_empty());
		assert_eq!(con.read_from_control_channel(&mut [0; 2]), None);
	}

	#[test] fn test_nul() {
		let mut nul = NulDevice;
		assert_eq!(nul.information().bits(), 0x8084);
		assert_eq!(nul.write(b"gone"), Ok(4));
		assert_eq!(nul.read(&mut [0; 8]), Ok(0));
	}

	#[test] fn test_device_base_name() {
		assert_eq!(device_base_name(b"con"), b"CON".to_vec());
		assert_eq!(device_base_name(b"C:\\DEV\\NUL.TXT"), b"NUL".to_vec());
		assert_eq!(device_base_name(b"c:con"), b"CON".to_vec());
	}
}
