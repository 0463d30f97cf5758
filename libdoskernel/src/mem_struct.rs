//! Typed views over guest memory.
//!
//! Every DOS control block is described as a list of `Field` constants: an offset and a value
//! type. A view only holds the base address of the block, and each access reads or writes the
//! field's bytes little-endian through `GuestMemory`. Giving a field the wrong width is a type
//! error, and each structure module asserts at compile time that its fields are packed back to
//! back and add up to the structure size.

use crate::guest_memory::{GuestMemory, PhysPt};

use std::marker::PhantomData;

pub trait FieldValue: Copy {
	const SIZE: u32;
	fn read_from(mem: &dyn GuestMemory, addr: PhysPt) -> Self;
	fn write_to(self, mem: &mut dyn GuestMemory, addr: PhysPt);
}

impl FieldValue for u8 {
	const SIZE: u32 = 1;
	fn read_from(mem: &dyn GuestMemory, addr: PhysPt) -> u8 {
		mem.read_u8(addr)
	}
	fn write_to(self, mem: &mut dyn GuestMemory, addr: PhysPt) {
		mem.write_u8(addr, self)
	}
}

impl FieldValue for u16 {
	const SIZE: u32 = 2;
	fn read_from(mem: &dyn GuestMemory, addr: PhysPt) -> u16 {
		mem.read_u16(addr)
	}
	fn write_to(self, mem: &mut dyn GuestMemory, addr: PhysPt) {
		mem.write_u16(addr, self)
	}
}

impl FieldValue for u32 {
	const SIZE: u32 = 4;
	fn read_from(mem: &dyn GuestMemory, addr: PhysPt) -> u32 {
		mem.read_u32(addr)
	}
	fn write_to(self, mem: &mut dyn GuestMemory, addr: PhysPt) {
		mem.write_u32(addr, self)
	}
}

impl<const N: usize> FieldValue for [u8; N] {
	const SIZE: u32 = N as u32;
	fn read_from(mem: &dyn GuestMemory, addr: PhysPt) -> [u8; N] {
		let mut value = [0u8; N];
		mem.block_read(addr, &mut value);
		value
	}
	fn write_to(self, mem: &mut dyn GuestMemory, addr: PhysPt) {
		mem.block_write(addr, &self)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<T> {
	pub offset: u32,
	value: PhantomData<T>,
}

impl<T: FieldValue> Field<T> {
	pub const fn at(offset: u32) -> Field<T> {
		Field {
			offset,
			value: PhantomData,
		}
	}

	pub const fn size(&self) -> u32 {
		T::SIZE
	}

	pub const fn end(&self) -> u32 {
		self.offset + T::SIZE
	}

	pub fn get(&self, mem: &dyn GuestMemory, pt: PhysPt) -> T {
		T::read_from(mem, pt.wrapping_add(self.offset))
	}

	pub fn set(&self, mem: &mut dyn GuestMemory, pt: PhysPt, value: T) {
		value.write_to(mem, pt.wrapping_add(self.offset))
	}
}

/// True when `next` starts exactly where `prev` ends.
pub const fn packed<A: FieldValue, B: FieldValue>(prev: &Field<A>, next: &Field<B>) -> bool {
	prev.offset + A::SIZE == next.offset
}

pub trait MemStruct: Copy {
	/// Size of the structure in guest memory.
	const SIZE: u32;

	fn pt(&self) -> PhysPt;

	fn get<T: FieldValue>(&self, mem: &dyn GuestMemory, field: Field<T>) -> T {
		field.get(mem, self.pt())
	}

	fn set<T: FieldValue>(&self, mem: &mut dyn GuestMemory, field: Field<T>, value: T) {
		field.set(mem, self.pt(), value)
	}

	fn clear(&self, mem: &mut dyn GuestMemory) {
		mem.fill(self.pt(), 0, Self::SIZE);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::guest_memory::FlatMemory;

	const TEST_BYTE: Field<u8> = Field::at(0);
	const TEST_WORD: Field<u16> = Field::at(1);
	const TEST_DWORD: Field<u32> = Field::at(3);
	const TEST_NAME: Field<[u8; 4]> = Field::at(7);

	const _: () = {
		assert!(packed(&TEST_BYTE, &TEST_WORD));
		assert!(packed(&TEST_WORD, &TEST_DWORD));
		assert!(packed(&TEST_DWORD, &TEST_NAME));
		assert!(TEST_NAME.end() == 11);
	};

	#[derive(Debug, Clone, Copy)]
	struct TestStruct {
		pt: PhysPt,
	}

	impl MemStruct for TestStruct {
		const SIZE: u32 = 11;
		fn pt(&self) -> PhysPt {
			self.pt
		}
	}

	fn canary_memory() -> FlatMemory {
		let mut memory = FlatMemory::new(0x100);
		memory.fill(0, 0xaa, 0x100);
		memory
	}

	#[test] fn test_byte_write_leaves_neighbours() {
		let mut memory = canary_memory();
		let view = TestStruct { pt: 0x10 };
		view.set(&mut memory, TEST_BYTE, 0x12);
		assert_eq!(memory.read_u8(0x0f), 0xaa);
		assert_eq!(memory.read_u8(0x10), 0x12);
		assert_eq!(memory.read_u8(0x11), 0xaa);
	}

	#[test] fn test_word_write_leaves_neighbours() {
		let mut memory = canary_memory();
		let view = TestStruct { pt: 0x10 };
		view.set(&mut memory, TEST_WORD, 0x1234);
		assert_eq!(memory.read_u8(0x10), 0xaa);
		assert_eq!(memory.read_u8(0x11), 0x34);
		assert_eq!(memory.read_u8(0x12), 0x12);
		assert_eq!(memory.read_u8(0x13), 0xaa);
		assert_eq!(view.get(&memory, TEST_WORD), 0x1234);
	}

	#[test] fn test_dword_write_leaves_neighbours() {
		let mut memory = canary_memory();
		let view = TestStruct { pt: 0x10 };
		view.set(&mut memory, TEST_DWORD, 0xdeadbeef);
		assert_eq!(memory.read_u8(0x12), 0xaa);
		assert_eq!(&memory.as_slice()[0x13..0x17], &[0xef, 0xbe, 0xad, 0xde]);
		assert_eq!(memory.read_u8(0x17), 0xaa);
	}

	#[test] fn test_array_field_and_clear() {
		let mut memory = canary_memory();
		let view = TestStruct { pt: 0x10 };
		view.set(&mut memory, TEST_NAME, *b"ABCD");
		assert_eq!(view.get(&memory, TEST_NAME), *b"ABCD");
		view.clear(&mut memory);
		assert_eq!(&memory.as_slice()[0x10..0x1b], &[0u8; 11]);
		assert_eq!(memory.read_u8(0x1b), 0xaa);
	}
}
