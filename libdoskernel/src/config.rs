use std::str::FromStr;

/// What the allocator does when it walks into an MCB whose type byte is neither 'M' nor 'Z'.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McbFaultStrategy {
	/// Fail the call and latch a kernel fault; the emulated session cannot continue.
	Fatal,
	/// Truncate the chain at the last intact block and carry on.
	Repair,
	/// Fail the call with "MCB destroyed" and leave memory untouched.
	ReportError,
}

impl Default for McbFaultStrategy {
	fn default() -> McbFaultStrategy {
		McbFaultStrategy::Fatal
	}
}

impl FromStr for McbFaultStrategy {
	type Err = String;

	fn from_str(text: &str) -> Result<McbFaultStrategy, String> {
		match text.to_ascii_lowercase().as_str() {
			"fatal" => Ok(McbFaultStrategy::Fatal),
			"repair" => Ok(McbFaultStrategy::Repair),
			"report" | "report-error" => Ok(McbFaultStrategy::ReportError),
			_ => Err(format!("Unknown MCB fault strategy: {}", text)),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct DosConfig {
	/// Total guest RAM. UMBs need at least 1MB+64KB.
	pub memory_size_mb: u32,
	/// Stored in the BIOS data area and used as the top of the conventional MCB chain.
	pub conventional_memory_kb: u16,
	pub umb: bool,
	/// With EMS the page frame takes half of the first UMB.
	pub ems: bool,
	pub file_locking: bool,
	pub fault_strategy: McbFaultStrategy,
	/// Initial value for INT 21h AX=5801h.
	pub allocation_strategy: u16,
	/// (major, minor) reported by INT 21h AH=30h and stamped into every PSP.
	pub dos_version: (u8, u8),
}

impl Default for DosConfig {
	fn default() -> DosConfig {
		DosConfig {
			memory_size_mb: 16,
			conventional_memory_kb: 640,
			umb: true,
			ems: true,
			file_locking: true,
			fault_strategy: McbFaultStrategy::default(),
			allocation_strategy: 0,
			dos_version: (5, 0),
		}
	}
}

impl DosConfig {
	/// The version as the word stored in the PSP: major in the low byte.
	pub fn version_word(&self) -> u16 {
		self.dos_version.0 as u16 | ((self.dos_version.1 as u16) << 8)
	}
}
