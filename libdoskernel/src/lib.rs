// https://en.wikipedia.org/wiki/Program_Segment_Prefix
// http://www.ctyme.com/intr/int-21.htm

pub mod guest_memory;
pub mod registers;
pub mod mem_struct;
pub mod config;
pub mod dos_error_codes;

pub mod mcb;
pub mod psp;
pub mod dta;
pub mod fcb;
pub mod sda;
pub mod info_block;
pub mod param_block;
pub mod bios_loader;
pub mod dos_tables;

pub mod dos_name;
pub mod dos_file;
pub mod dos_device;
pub mod dos_drive;
pub mod memory_drive;
pub mod local_drive;

pub mod kernel;
pub mod memory;
pub mod files;
pub mod search;
pub mod ioctl;
pub mod exe_loader;
pub mod process;
pub mod dos_event_handler;
