use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

// http://stanislavs.org/helppc/dos_error_codes.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Error)]
#[repr(u16)]
pub enum DosErrorCode {
	#[error("invalid function number")]
	FunctionNumberInvalid = 0x01,
	#[error("file not found")]
	FileNotFound = 0x02,
	#[error("path not found")]
	PathNotFound = 0x03,
	#[error("too many open files")]
	NoFileHandlesLeft = 0x04,
	#[error("access denied")]
	AccessDenied = 0x05,
	#[error("invalid handle")]
	InvalidFileHandle = 0x06,
	#[error("memory control blocks destroyed")]
	McbDestroyed = 0x07,
	#[error("insufficient memory")]
	InsufficientMemory = 0x08,
	#[error("invalid memory block address")]
	MbAddressInvalid = 0x09,
	#[error("invalid environment")]
	EnvironmentInvalid = 0x0a,
	#[error("invalid format")]
	FormatInvalid = 0x0b,
	#[error("invalid access mode")]
	InvalidFileAccessMode = 0x0c,
	#[error("invalid data")]
	InvalidData = 0x0d,
	#[error("fixup overflow")]
	FixupOverflow = 0x0e,
	#[error("invalid drive")]
	InvalidDrive = 0x0f,
	#[error("attempt to remove the current directory")]
	RemoveCurrentDirectory = 0x10,
	#[error("not same device")]
	NotSameDevice = 0x11,
	#[error("no more files")]
	NoMoreFiles = 0x12,
	#[error("disk write-protected")]
	WriteProtected = 0x13,
	#[error("unknown unit")]
	UnknownUnit = 0x14,
	#[error("drive not ready")]
	DriveNotReady = 0x15,
	#[error("unknown command")]
	UnknownCommand = 0x16,
	#[error("CRC error")]
	CrcError = 0x17,
	#[error("bad request structure length")]
	BadRequestLength = 0x18,
	#[error("seek error")]
	SeekError = 0x19,
	#[error("unknown media type")]
	UnknownMedia = 0x1a,
	#[error("sector not found")]
	SectorNotFound = 0x1b,
	#[error("printer out of paper")]
	OutOfPaper = 0x1c,
	#[error("write fault")]
	WriteFault = 0x1d,
	#[error("read fault")]
	ReadFault = 0x1e,
	#[error("general failure")]
	GeneralFailure = 0x1f,
	#[error("sharing violation")]
	SharingViolation = 0x20,
	#[error("lock violation")]
	LockViolation = 0x21,
	#[error("file already exists")]
	FileAlreadyExists = 0x50,
}

impl DosErrorCode {
	pub fn code(self) -> u16 {
		self as u16
	}

	pub fn from_code(code: u16) -> Option<DosErrorCode> {
		FromPrimitive::from_u16(code)
	}
}

/// Failure of an allocator call that also has to tell the caller how much it could have had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
	#[error("insufficient memory, {available} paragraphs available")]
	Insufficient { available: u16 },
	#[error(transparent)]
	Dos(#[from] DosErrorCode),
}

impl MemoryError {
	pub fn code(&self) -> DosErrorCode {
		match self {
			MemoryError::Insufficient { .. } => DosErrorCode::InsufficientMemory,
			MemoryError::Dos(code) => *code,
		}
	}
}

/// A condition after which the emulated session can't be trusted to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelFault {
	#[error("memory control block chain corrupted at segment {segment:#06x}")]
	McbChainCorrupted { segment: u16 },
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test] fn test_numbering_matches_dos() {
		assert_eq!(DosErrorCode::InvalidFileHandle.code(), 6);
		assert_eq!(DosErrorCode::McbDestroyed.code(), 7);
		assert_eq!(DosErrorCode::NoMoreFiles.code(), 18);
		assert_eq!(DosErrorCode::LockViolation.code(), 33);
		assert_eq!(DosErrorCode::FileAlreadyExists.code(), 80);
	}

	#[test] fn test_from_code() {
		assert_eq!(DosErrorCode::from_code(0x08), Some(DosErrorCode::InsufficientMemory));
		assert_eq!(DosErrorCode::from_code(0x50), Some(DosErrorCode::FileAlreadyExists));
		assert_eq!(DosErrorCode::from_code(0), None);
		assert_eq!(DosErrorCode::from_code(0x22), None);
	}

	#[test] fn test_memory_error_code() {
		assert_eq!(MemoryError::Insufficient { available: 3 }.code(), DosErrorCode::InsufficientMemory);
		let err: MemoryError = DosErrorCode::McbDestroyed.into();
		assert_eq!(err.code(), DosErrorCode::McbDestroyed);
		assert_eq!(format!("{}", MemoryError::Insufficient { available: 3 }), "insufficient memory, 3 paragraphs available");
	}

	#[test] fn test_kernel_fault_message() {
		let fault = KernelFault::McbChainCorrupted { segment: 0x1234 };
		assert_eq!(format!("{}", fault), "memory control block chain corrupted at segment 0x1234");
	}
}
