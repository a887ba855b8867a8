use clap::Parser;
use clap_num::maybe_hex;
use itertools::Itertools;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::process::ExitCode;

use rvsim::asm::{parse_assembly, ProgramImage};
use rvsim::disasm::disassemble;
use rvsim::hart::{Hart, DEFAULT_MAX_CYCLES, DEFAULT_MEM_SIZE};
use rvsim::opcodes::abi_name;

/// Simulate a 32-bit RISC-V processor running RV32I assembly
///
/// Assembles the given source file and either runs it to completion
/// (--run) or drops into an interactive prompt where the processor
/// can be stepped and inspected cycle by cycle.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to an assembly source file to load on startup
    input: Option<String>,

    /// Memory size in bytes (use 0x prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u32>)]
    mem_size: Option<u32>,

    /// Assemble, run until the program halts, print the final state
    /// and exit instead of entering the interactive prompt
    #[arg(short, long)]
    run: bool,

    /// Cycle bound for run
    #[arg(long, default_value_t = DEFAULT_MAX_CYCLES)]
    max_cycles: u64,
}

fn assemble_file(path: &str) -> Result<ProgramImage, String> {
    let text =
        fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    let image =
        parse_assembly(&text).map_err(|e| format!("assembly of {path} failed: {e}"))?;
    println!(
        "Assembled {path}: {} word(s), {} pseudo-instruction expansion(s)",
        image.machine_code.len(),
        image.expansion_log.len()
    );
    Ok(image)
}

/// Print pc, cycle count and the non-zero registers
fn print_state(hart: &Hart) {
    println!("pc=0x{:08x}  cycles={}", hart.pc(), hart.cycles());
    let non_zero: Vec<(usize, u32)> = hart
        .registers()
        .iter()
        .enumerate()
        .filter(|(_, &value)| value != 0)
        .map(|(n, &value)| (n, value))
        .collect();
    if non_zero.is_empty() {
        println!("all registers zero");
        return;
    }
    for (n, value) in non_zero {
        let name = abi_name(n as u8);
        println!("  x{n:<2} ({name:>4}) = 0x{value:08x} ({})", value as i32);
    }
}

/// List every loaded word with its disassembly and source line
fn print_disassembly(image: &ProgramImage) {
    for (index, &word) in image.machine_code.iter().enumerate() {
        let addr = 4 * index as u32;
        let asm = disassemble(word, addr);
        match image.source_map.get(&addr) {
            Some(source) => println!("{addr:>4x}  {word:08x}  {asm:<28} # {source}"),
            None => println!("{addr:>4x}  {word:08x}  {asm}"),
        }
    }
}

fn print_memory(hart: &Hart, base: u32, words: u64) {
    for n in 0..words {
        let addr = base.wrapping_add(4 * n as u32) as usize;
        if addr + 4 > hart.memory().len() {
            println!("{addr:>4x}  (outside memory)");
            break;
        }
        let bytes: [u8; 4] = hart.memory()[addr..addr + 4]
            .try_into()
            .expect("slice is four bytes long");
        println!("{addr:>4x}  {:08x}", u32::from_le_bytes(bytes));
    }
}

fn print_help() {
    println!(
        "\
Commands:
  load <file>      assemble a source file and load it
  step [n]         execute n instructions (default 1)
  run [n]          run until halt or n cycles (default {DEFAULT_MAX_CYCLES})
  regs             show pc, cycles and non-zero registers
  mem <addr> [n]   show n memory words from addr (default 8)
  dis              list the loaded program with disassembly
  log              show the pseudo-instruction expansion log
  reset            restore registers, pc and the program image
  help             this text
  quit             leave"
    );
}

fn repl(mut hart: Hart, mut image: Option<ProgramImage>) -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("cannot start line editor: {e}");
            return ExitCode::FAILURE;
        }
    };
    loop {
        let line = match editor.readline("rvsim> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("input error: {e}");
                return ExitCode::FAILURE;
            }
        };
        let _ = editor.add_history_entry(line.as_str());
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["help"] => print_help(),
            ["quit"] | ["exit"] => break,
            ["load", path] => match assemble_file(path) {
                Ok(new_image) => {
                    hart.load_program(&new_image.machine_code);
                    image = Some(new_image);
                }
                Err(e) => eprintln!("{e}"),
            },
            ["step", rest @ ..] => {
                let count = parse_count(rest, 1);
                for _ in 0..count {
                    if !hart.step() {
                        println!("halted");
                        break;
                    }
                }
                print_state(&hart);
            }
            ["run", rest @ ..] => {
                let bound = parse_count(rest, DEFAULT_MAX_CYCLES);
                hart.run(bound);
                print_state(&hart);
            }
            ["regs"] => print_state(&hart),
            ["mem", addr, rest @ ..] => match maybe_hex::<u32>(addr) {
                Ok(base) => print_memory(&hart, base, parse_count(rest, 8)),
                Err(e) => eprintln!("bad address '{addr}': {e}"),
            },
            ["dis"] => match &image {
                Some(image) => print_disassembly(image),
                None => println!("no program loaded"),
            },
            ["log"] => match &image {
                Some(image) if !image.expansion_log.is_empty() => {
                    for entry in &image.expansion_log {
                        println!("{entry}");
                    }
                }
                Some(_) => println!("no pseudo-instructions were expanded"),
                None => println!("no program loaded"),
            },
            ["reset"] => {
                hart.reset();
                println!("reset");
            }
            _ => println!("unrecognised command: {}", words.iter().join(" ")),
        }
    }
    ExitCode::SUCCESS
}

/// First token of rest as a count, falling back to a default
fn parse_count(rest: &[&str], default: u64) -> u64 {
    rest.first()
        .and_then(|token| token.parse().ok())
        .unwrap_or(default)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mem_size = args
        .mem_size
        .map(|size| size as usize)
        .unwrap_or(DEFAULT_MEM_SIZE);
    let mut hart = Hart::with_memory_size(mem_size);

    let mut image = None;
    if let Some(path) = &args.input {
        match assemble_file(path) {
            Ok(loaded) => {
                hart.load_program(&loaded.machine_code);
                image = Some(loaded);
            }
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.run {
        hart.run(args.max_cycles);
        print_state(&hart);
        return ExitCode::SUCCESS;
    }

    println!("RV32I simulator ({mem_size} bytes of memory); type 'help' for commands");
    repl(hart, image)
}
