use crate::guest_memory::{GuestMemory, PhysPt};

pub const BIOS_START: PhysPt = 0x40 << 4;
const fn bios_off(offset: u32) -> PhysPt {
	BIOS_START + offset
}

pub const BIOS_EQUIPMENT: PhysPt = bios_off(0x10);
pub const BIOS_MEMORY_SIZE_KB: PhysPt = bios_off(0x13);

// http://www.bioscentral.com/misc/bda.htm
pub fn initialise_bios_data_area(mem: &mut dyn GuestMemory, conventional_memory_kb: u16) {
	// Equipment
	mem.write_u16(BIOS_EQUIPMENT, 0x0061);
	// Memory size in KB
	mem.write_u16(BIOS_MEMORY_SIZE_KB, conventional_memory_kb);
}

/// Conventional memory in paragraphs, as the BIOS reports it.
pub fn conventional_memory_paragraphs(mem: &dyn GuestMemory) -> u32 {
	(mem.read_u16(BIOS_MEMORY_SIZE_KB) as u32) << 6
}
