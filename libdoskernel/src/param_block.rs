use crate::guest_memory::{GuestMemory, PhysPt, RealPt};
use crate::mem_struct::{packed, Field, MemStruct};

// INT 21h AX=4B00h/4B01h parameter block, http://www.ctyme.com/intr/rb-2939.htm

pub const EXEC_ENVSEG: Field<u16> = Field::at(0x00);
pub const EXEC_CMDTAIL: Field<u32> = Field::at(0x02);
pub const EXEC_FCB1: Field<u32> = Field::at(0x06);
pub const EXEC_FCB2: Field<u32> = Field::at(0x0a);
pub const EXEC_INITSSSP: Field<u32> = Field::at(0x0e);
pub const EXEC_INITCSIP: Field<u32> = Field::at(0x12);
pub const EXEC_BYTES: u32 = 0x16;

// AX=4B03h uses the same memory for this shorter layout.
pub const OVERLAY_LOADSEG: Field<u16> = Field::at(0x00);
pub const OVERLAY_RELOCATION: Field<u16> = Field::at(0x02);

const _: () = {
	assert!(packed(&EXEC_ENVSEG, &EXEC_CMDTAIL));
	assert!(packed(&EXEC_CMDTAIL, &EXEC_FCB1));
	assert!(packed(&EXEC_FCB1, &EXEC_FCB2));
	assert!(packed(&EXEC_FCB2, &EXEC_INITSSSP));
	assert!(packed(&EXEC_INITSSSP, &EXEC_INITCSIP));
	assert!(EXEC_INITCSIP.end() == EXEC_BYTES);
	assert!(packed(&OVERLAY_LOADSEG, &OVERLAY_RELOCATION));
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecParams {
	pub envseg: u16,
	pub cmdtail: RealPt,
	pub fcb1: RealPt,
	pub fcb2: RealPt,
	pub initsssp: RealPt,
	pub initcsip: RealPt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayParams {
	pub loadseg: u16,
	pub relocation: u16,
}

/// A guest parameter block, read into host copies of both layouts with `load_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBlock {
	pt: PhysPt,
	pub exec: ExecParams,
	pub overlay: OverlayParams,
}

impl MemStruct for ParamBlock {
	const SIZE: u32 = EXEC_BYTES;
	fn pt(&self) -> PhysPt {
		self.pt
	}
}

impl ParamBlock {
	pub fn new(pt: PhysPt) -> ParamBlock {
		ParamBlock {
			pt,
			exec: ExecParams::default(),
			overlay: OverlayParams::default(),
		}
	}

	pub fn clear_data(&mut self) {
		self.exec = ExecParams::default();
		self.overlay = OverlayParams::default();
	}

	pub fn load_data(&mut self, mem: &dyn GuestMemory) {
		self.exec = ExecParams {
			envseg: self.get(mem, EXEC_ENVSEG),
			cmdtail: self.get(mem, EXEC_CMDTAIL),
			fcb1: self.get(mem, EXEC_FCB1),
			fcb2: self.get(mem, EXEC_FCB2),
			initsssp: self.get(mem, EXEC_INITSSSP),
			initcsip: self.get(mem, EXEC_INITCSIP),
		};
		self.overlay = OverlayParams {
			loadseg: self.get(mem, OVERLAY_LOADSEG),
			relocation: self.get(mem, OVERLAY_RELOCATION),
		};
	}

	/// Writes the exec layout back. The overlay layout is input only.
	pub fn save_data(&self, mem: &mut dyn GuestMemory) {
		self.set(mem, EXEC_ENVSEG, self.exec.envseg);
		self.set(mem, EXEC_CMDTAIL, self.exec.cmdtail);
		self.set(mem, EXEC_FCB1, self.exec.fcb1);
		self.set(mem, EXEC_FCB2, self.exec.fcb2);
		self.set(mem, EXEC_INITSSSP, self.exec.initsssp);
		self.set(mem, EXEC_INITCSIP, self.exec.initcsip);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::guest_memory::{real_make, FlatMemory};

	#[test] fn test_load_both_layouts() {
		let mut memory = FlatMemory::new(0x1000);
		memory.write_u16(0x100, 0x2000);
		memory.write_u32(0x102, real_make(0x1234, 0x80));
		let mut block = ParamBlock::new(0x100);
		block.load_data(&memory);
		assert_eq!(block.exec.envseg, 0x2000);
		assert_eq!(block.exec.cmdtail, real_make(0x1234, 0x80));
		assert_eq!(block.overlay.loadseg, 0x2000);
		assert_eq!(block.overlay.relocation, 0x0080);
		block.clear_data();
		assert_eq!(block.exec, ExecParams::default());
	}

	#[test] fn test_save_exec() {
		let mut memory = FlatMemory::new(0x1000);
		let mut block = ParamBlock::new(0x100);
		block.exec.initsssp = real_make(0x3000, 0xfffc);
		block.exec.initcsip = real_make(0x3000, 0x0100);
		block.save_data(&mut memory);
		assert_eq!(memory.read_u32(0x10e), real_make(0x3000, 0xfffc));
		assert_eq!(memory.read_u32(0x112), real_make(0x3000, 0x0100));
	}
}
