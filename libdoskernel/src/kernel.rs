use crate::bios_loader::initialise_bios_data_area;
use crate::config::DosConfig;
use crate::dos_device::{ConsoleDevice, DosDevice, NulDevice, DOS_DEVICES};
use crate::dos_drive::{DosDrive, MountedDrive, DOS_DRIVES};
use crate::dos_error_codes::{DosErrorCode, KernelFault};
use crate::dos_file::OpenFile;
use crate::dos_tables::{setup_tables, DosTables, PrivateSegment, DOS_FIRST_SHELL, DOS_INFOBLOCK_SEG, DOS_MEM_START, DOS_SDA_OFS, DOS_SDA_SEG};
use crate::files::FileLock;
use crate::guest_memory::{GuestMemory, RealPt};
use crate::info_block::InfoBlock;
use crate::sda::Sda;
use crate::search::SearchTable;

use log::{debug, info, warn};

/// Device slot of CON, installed by `DosKernel::new`.
pub const CON_DEVICE: usize = 0;
/// Device slot of NUL.
pub const NUL_DEVICE: usize = 1;

/// The whole of the emulated DOS: guest memory plus every table that lives outside of it.
/// Instances share nothing, so several can run side by side.
#[derive(Debug)]
pub struct DosKernel {
	pub config: DosConfig,
	pub(crate) mem: Box<dyn GuestMemory>,
	pub(crate) files: Vec<Option<OpenFile>>,
	pub(crate) drives: Vec<Option<MountedDrive>>,
	pub(crate) devices: Vec<Option<Box<dyn DosDevice>>>,
	pub(crate) sda: Sda,
	pub(crate) info_block: InfoBlock,
	pub(crate) tables: DosTables,
	pub(crate) private_segment: PrivateSegment,
	pub(crate) first_mcb: u16,
	pub(crate) mem_alloc_strategy: u16,
	pub(crate) searches: SearchTable,
	pub(crate) locks: Vec<FileLock>,
	pub(crate) file_locking: bool,
	pub(crate) fault: Option<KernelFault>,
}

impl DosKernel {
	/// Writes the kernel tables into `memory` and installs CON and NUL. Memory stays unmanaged
	/// until `boot` or `init_mcb_chain`.
	pub fn new(config: DosConfig, memory: Box<dyn GuestMemory>) -> Result<DosKernel, DosErrorCode> {
		let mut kernel = DosKernel {
			mem: memory,
			files: vec![],
			drives: vec![],
			devices: (0..DOS_DEVICES).map(|_| None).collect(),
			sda: Sda::new(DOS_SDA_SEG, DOS_SDA_OFS),
			info_block: InfoBlock::new(DOS_INFOBLOCK_SEG),
			tables: DosTables::default(),
			private_segment: PrivateSegment::default(),
			first_mcb: DOS_MEM_START,
			mem_alloc_strategy: 0,
			searches: SearchTable::new(),
			locks: vec![],
			file_locking: config.file_locking,
			fault: None,
			config,
		};
		kernel.setup_files();
		initialise_bios_data_area(&mut *kernel.mem, kernel.config.conventional_memory_kb);
		kernel.tables = setup_tables(&mut *kernel.mem, &mut kernel.private_segment, &kernel.info_block, &kernel.sda)?;
		kernel.sda.set_psp(&mut *kernel.mem, DOS_FIRST_SHELL);
		kernel.sda.set_drive(&mut *kernel.mem, 2);
		if !kernel.set_mem_alloc_strategy(kernel.config.allocation_strategy) {
			warn!("Ignoring invalid allocation strategy {:#x}", kernel.config.allocation_strategy);
		}
		kernel.install_device(Box::new(ConsoleDevice::new()))?;
		kernel.install_device(Box::new(NulDevice))?;
		Ok(kernel)
	}

	/// Builds the memory chains and the first shell process with its standard handles.
	pub fn boot(&mut self) -> Result<(), DosErrorCode> {
		self.setup_memory();
		if self.config.umb {
			self.build_umb_chain();
		} else {
			self.disable_umb_chain();
		}
		self.setup_first_shell()?;
		info!("DOS {}.{:02} booted, first MCB at {:#06x}", self.config.dos_version.0, self.config.dos_version.1, self.first_mcb);
		Ok(())
	}

	pub fn shutdown(&mut self) {
		self.clear_drives_and_files();
		self.shutdown_devices();
	}

	pub fn memory(&self) -> &dyn GuestMemory {
		&*self.mem
	}

	pub fn memory_mut(&mut self) -> &mut dyn GuestMemory {
		&mut *self.mem
	}

	pub fn info_block(&self) -> InfoBlock {
		self.info_block
	}

	pub fn sda(&self) -> Sda {
		self.sda
	}

	pub fn tables(&self) -> DosTables {
		self.tables
	}

	/// Records `code` as the one current error. Nothing ever clears it.
	pub fn set_error(&mut self, code: DosErrorCode) {
		self.sda.set_extended_error(&mut *self.mem, code.code());
	}

	pub fn last_error(&self) -> Option<DosErrorCode> {
		DosErrorCode::from_code(self.sda.get_extended_error(&*self.mem))
	}

	pub(crate) fn fail<T>(&mut self, code: DosErrorCode) -> Result<T, DosErrorCode> {
		self.set_error(code);
		Err(code)
	}

	/// Records the error of a collaborator's result.
	pub(crate) fn check<T>(&mut self, result: Result<T, DosErrorCode>) -> Result<T, DosErrorCode> {
		if let Err(code) = result {
			self.set_error(code);
		}
		result
	}

	/// Set once the session hit something it can't continue from.
	pub fn fault(&self) -> Option<KernelFault> {
		self.fault
	}

	pub fn current_psp(&self) -> u16 {
		self.sda.get_psp(&*self.mem)
	}

	pub fn set_current_psp(&mut self, psp: u16) {
		self.sda.set_psp(&mut *self.mem, psp);
	}

	pub fn get_dta(&self) -> RealPt {
		self.sda.get_dta(&*self.mem)
	}

	pub fn set_dta(&mut self, dta: RealPt) {
		self.sda.set_dta(&mut *self.mem, dta);
	}

	pub fn get_default_drive(&self) -> u8 {
		self.sda.get_drive(&*self.mem)
	}

	/// Floppy drives can always be selected, anything else has to be mounted.
	pub fn set_default_drive(&mut self, drive: u8) -> bool {
		if (drive as usize) < DOS_DRIVES && (drive < 2 || self.drive_exists(drive)) {
			self.sda.set_drive(&mut *self.mem, drive);
			true
		} else {
			false
		}
	}

	pub fn drive_exists(&self, drive: u8) -> bool {
		self.drives.get(drive as usize).map_or(false, |drive| drive.is_some())
	}

	pub fn mount_drive(&mut self, drive: u8, dos_drive: Box<dyn DosDrive>) -> Result<(), DosErrorCode> {
		match self.drives.get_mut(drive as usize) {
			Some(slot @ None) => {
				debug!("Mounting {}: {}", (b'A' + drive) as char, dos_drive.info());
				*slot = Some(MountedDrive::new(dos_drive));
				let block_devices = self.drives.iter().filter(|drive| drive.is_some()).count() as u8;
				self.info_block.set_block_devices(&mut *self.mem, block_devices);
				Ok(())
			}
			Some(Some(_)) => self.fail(DosErrorCode::AccessDenied),
			None => self.fail(DosErrorCode::InvalidDrive),
		}
	}

	pub fn unmount_drive(&mut self, drive: u8) -> Option<Box<dyn DosDrive>> {
		self.drives.get_mut(drive as usize).and_then(|slot| slot.take()).map(|mounted| mounted.drive)
	}

	pub(crate) fn mounted(&mut self, drive: u8) -> Option<&mut MountedDrive> {
		self.drives.get_mut(drive as usize).and_then(|slot| slot.as_mut())
	}

	/// The current directory of every mounted drive, as `make_name` wants them.
	pub(crate) fn curdirs(&self) -> Vec<Option<Vec<u8>>> {
		self.drives.iter().map(|slot| slot.as_ref().map(|mounted| mounted.curdir.clone())).collect()
	}

	/// Puts a device in the first free slot and returns the slot.
	pub fn install_device(&mut self, device: Box<dyn DosDevice>) -> Result<usize, DosErrorCode> {
		match self.devices.iter().position(|slot| slot.is_none()) {
			Some(index) => {
				self.devices[index] = Some(device);
				Ok(index)
			}
			None => self.fail(DosErrorCode::NoFileHandlesLeft),
		}
	}

	pub fn device(&mut self, index: usize) -> Option<&mut (dyn DosDevice + 'static)> {
		self.devices.get_mut(index).and_then(|slot| slot.as_mut()).map(|device| device.as_mut())
	}

	/// Slot of the device called `name`, ignoring case.
	pub fn find_device_by_name(&self, name: &[u8]) -> Option<usize> {
		self.devices.iter().position(|slot| match slot {
			Some(device) => device.name().eq_ignore_ascii_case(name),
			None => false,
		})
	}

	pub fn push_console_input(&mut self, data: &[u8]) {
		if let Some(console) = self.device(CON_DEVICE) {
			console.push_input(data);
		}
	}

	pub fn take_console_output(&mut self) -> Vec<u8> {
		match self.device(CON_DEVICE) {
			Some(console) => console.take_output(),
			None => vec![],
		}
	}

	pub fn shutdown_devices(&mut self) {
		for device in self.devices.iter_mut().filter_map(|slot| slot.as_mut()) {
			device.shutdown();
		}
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::guest_memory::FlatMemory;
	use crate::memory_drive::MemoryDrive;

	/// A kernel with 2MB of RAM and an empty memory drive as C:, not booted.
	pub(crate) fn test_kernel() -> DosKernel {
		let config = DosConfig { memory_size_mb: 2, ..DosConfig::default() };
		let mut kernel = DosKernel::new(config, Box::new(FlatMemory::with_megabytes(2))).unwrap();
		kernel.mount_drive(2, Box::new(MemoryDrive::with_label(b"EMULATED"))).unwrap();
		kernel
	}

	pub(crate) fn booted_kernel() -> DosKernel {
		let mut kernel = test_kernel();
		kernel.boot().unwrap();
		kernel
	}

	#[test] fn test_new_installs_devices() {
		let mut kernel = test_kernel();
		assert_eq!(kernel.find_device_by_name(b"con"), Some(CON_DEVICE));
		assert_eq!(kernel.find_device_by_name(b"NUL"), Some(NUL_DEVICE));
		assert_eq!(kernel.find_device_by_name(b"PRN"), None);
		assert_eq!(kernel.current_psp(), DOS_FIRST_SHELL);
		assert_eq!(kernel.get_default_drive(), 2);
		assert_eq!(kernel.last_error(), None);
		assert_eq!(kernel.memory().read_u16(0x413), 640);
		kernel.push_console_input(b"x");
		assert_eq!(kernel.device(CON_DEVICE).unwrap().information().bits(), 0x8093);
	}

	#[test] fn test_error_is_last_write_wins() {
		let mut kernel = test_kernel();
		kernel.set_error(DosErrorCode::FileNotFound);
		kernel.set_error(DosErrorCode::AccessDenied);
		assert_eq!(kernel.last_error(), Some(DosErrorCode::AccessDenied));
		assert!(kernel.set_default_drive(0));
		assert_eq!(kernel.last_error(), Some(DosErrorCode::AccessDenied));
	}

	#[test] fn test_drives() {
		let mut kernel = test_kernel();
		assert!(kernel.drive_exists(2));
		assert!(!kernel.set_default_drive(3));
		assert!(kernel.set_default_drive(1));
		assert_eq!(kernel.get_default_drive(), 1);
		assert_eq!(kernel.mount_drive(2, Box::new(MemoryDrive::new())), Err(DosErrorCode::AccessDenied));
		assert_eq!(kernel.mount_drive(30, Box::new(MemoryDrive::new())), Err(DosErrorCode::InvalidDrive));
		assert!(kernel.unmount_drive(2).is_some());
		assert!(!kernel.drive_exists(2));
	}

	#[test] fn test_instances_are_independent() {
		let mut first = test_kernel();
		let second = test_kernel();
		first.set_error(DosErrorCode::InvalidDrive);
		first.set_current_psp(0x2000);
		assert_eq!(second.last_error(), None);
		assert_eq!(second.current_psp(), DOS_FIRST_SHELL);
	}
}
