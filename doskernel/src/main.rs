use libdoskernel::config::{DosConfig, McbFaultStrategy};
use libdoskernel::dos_event_handler::{DosEventHandler, DosInterruptResult};
use libdoskernel::guest_memory::{phys_make, real_make, FlatMemory};
use libdoskernel::kernel::DosKernel;
use libdoskernel::local_drive::LocalDrive;
use libdoskernel::memory_drive::MemoryDrive;
use libdoskernel::param_block::ParamBlock;
use libdoskernel::psp::Psp;
use libdoskernel::registers::{Reg, Registers};

use clap::Parser;
use log::{error, info, LevelFilter, Log, Metadata, Record};

use std::error::Error;
use std::path::PathBuf;

/// Boots an emulated DOS kernel and prints its memory control block chain.
#[derive(Parser, Debug)]
#[command(name = "doskernel")]
struct Args {
	/// Total guest memory in megabytes
	#[arg(long, default_value_t = 16)]
	memory: u32,

	/// Conventional memory in kilobytes
	#[arg(long, default_value_t = 640)]
	conventional: u16,

	/// Don't create upper memory blocks
	#[arg(long)]
	no_umb: bool,

	/// Leave out the EMS page frame, making the UMB twice as big
	#[arg(long)]
	no_ems: bool,

	/// Disable INT 21h AH=5Ch file locking
	#[arg(long)]
	no_file_locking: bool,

	/// What to do about a corrupted MCB chain: fatal, repair or report
	#[arg(long, default_value = "fatal")]
	fault_strategy: McbFaultStrategy,

	/// DOS version reported to programs, like 5.0 or 6.22
	#[arg(long, default_value = "5.0", value_parser = parse_version)]
	dos_version: (u8, u8),

	/// Host directory to mount as C:. An empty memory drive is used otherwise.
	#[arg(short = 'c', long)]
	drive_c: Option<PathBuf>,

	/// More logging, repeat for even more
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,

	/// Program on C: to load, followed by its command tail
	program: Option<String>,

	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	program_args: Vec<String>,
}

fn parse_version(text: &str) -> Result<(u8, u8), String> {
	let mut parts = text.splitn(2, '.');
	let major = parts.next().unwrap_or("").parse::<u8>().map_err(|e| format!("Bad major version: {}", e))?;
	let minor = match parts.next() {
		Some(minor) => minor.parse::<u8>().map_err(|e| format!("Bad minor version: {}", e))?,
		None => 0,
	};
	Ok((major, minor))
}

struct StderrLogger;

impl Log for StderrLogger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &Record) {
		if self.enabled(record.metadata()) {
			eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
		}
	}

	fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
	let level = match verbose {
		0 => LevelFilter::Warn,
		1 => LevelFilter::Info,
		2 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	};
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}

fn print_mem(kernel: &DosKernel) {
	println!("Segment  Type  Owner   Size     Name");
	let mut free = 0u32;
	for mcb in kernel.mcb_chain() {
		let owner = if mcb.is_free() { "free".to_string() } else { format!("{:04X}", mcb.psp_segment) };
		println!("{:04X}     {}     {:<7} {:>7}  {}", mcb.segment, mcb.mcb_type as char, owner, mcb.size as u32 * 16, mcb.name);
		if mcb.is_free() {
			free += mcb.size as u32 * 16;
		}
	}
	println!("{} bytes free", free);
}

/// Runs INT 21h AX=4B00h from the first shell, the way COMMAND.COM would.
fn load_program(handler: &mut DosEventHandler, name: &str, args: &[String]) -> Result<Registers, Box<dyn Error>> {
	let scratch = handler.kernel.get_memory(0x10)?;
	let name_pt = phys_make(scratch, 0);
	let tail_pt = phys_make(scratch, 0x60);
	let block_pt = phys_make(scratch, 0xe0);

	let mut tail = args.iter().fold(String::new(), |tail, arg| tail + " " + arg).into_bytes();
	tail.truncate(126);
	let mem = handler.kernel.memory_mut();
	mem.block_write(name_pt, name.as_bytes());
	mem.write_u8(name_pt + name.len() as u32, 0);
	mem.write_u8(tail_pt, tail.len() as u8);
	mem.block_write(tail_pt + 1, &tail);
	mem.write_u8(tail_pt + 1 + tail.len() as u32, 0x0d);
	let mut block = ParamBlock::new(block_pt);
	block.exec.cmdtail = real_make(scratch, 0x60);
	block.save_data(mem);

	let mut regs = handler.kernel.shell_registers();
	handler.kernel.push_interrupt_frame(&mut regs);
	regs.set_reg_u16(Reg::AX, 0x4b00);
	regs.set_reg_u16(Reg::DS, scratch);
	regs.set_reg_u16(Reg::DX, 0);
	regs.set_reg_u16(Reg::ES, scratch);
	regs.set_reg_u16(Reg::BX, 0xe0);
	match handler.handle_interrupt(&mut regs, 0x21) {
		DosInterruptResult::ShouldJump => Ok(regs),
		_ => {
			let error = handler.kernel.last_error().map_or_else(|| "unknown error".to_string(), |code| code.to_string());
			Err(format!("Couldn't load {}: {}", name, error).into())
		}
	}
}

fn main() -> Result<(), Box<dyn Error>> {
	let args = Args::parse();
	init_logging(args.verbose);

	let config = DosConfig {
		memory_size_mb: args.memory,
		conventional_memory_kb: args.conventional,
		umb: !args.no_umb,
		ems: !args.no_ems,
		file_locking: !args.no_file_locking,
		fault_strategy: args.fault_strategy,
		dos_version: args.dos_version,
		..DosConfig::default()
	};
	let memory = FlatMemory::with_megabytes(config.memory_size_mb);
	let mut kernel = DosKernel::new(config, Box::new(memory))?;
	match &args.drive_c {
		Some(path) => {
			info!("Mounting {} as C:", path.display());
			kernel.mount_drive(2, Box::new(LocalDrive::new(path.clone())))?;
		}
		None => kernel.mount_drive(2, Box::new(MemoryDrive::with_label(b"EMULATED")))?,
	}
	kernel.boot()?;

	let mut handler = DosEventHandler::new(kernel);
	if let Some(program) = &args.program {
		let regs = load_program(&mut handler, program, &args.program_args)?;
		let psp = handler.kernel.current_psp();
		let env = Psp::new(psp).get_environment(handler.kernel.memory());
		println!("Loaded {} at PSP {:04X}, environment {:04X}", program, psp, env);
		println!("CS:IP {:04X}:{:04X}  SS:SP {:04X}:{:04X}",
			regs.get_reg_u16(Reg::CS), regs.get_reg_u16(Reg::IP),
			regs.get_reg_u16(Reg::SS), regs.get_reg_u16(Reg::SP));
		let tail = Psp::new(psp).get_command_tail(handler.kernel.memory());
		println!("Command tail: {:?}", String::from_utf8_lossy(&tail));
		println!();
	}
	print_mem(&handler.kernel);
	if let Some(fault) = handler.kernel.fault() {
		error!("Kernel fault: {}", fault);
	}
	handler.kernel.shutdown();
	Ok(())
}
