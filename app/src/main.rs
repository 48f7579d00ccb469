use std::env;
use std::error::Error;
use std::fs;

use sim::{Cpu, Ram};
use ucode::ROM;

const RUN_TICK_LIMIT: u64 = 10_000_000;

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("  app ucode [rom-file]      print opcode metadata, or write the rom cache");
    eprintln!("  app asm <in.asm> <out>    assemble a source file");
    eprintln!("  app dis <binary>          disassemble a binary");
    eprintln!("  app run <in>              run a binary (or assemble and run a .asm)");
    std::process::exit(1);
}

fn load_binary(path: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    if path.ends_with(".asm") {
        let source = fs::read_to_string(path)?;
        Ok(assemble::assemble(&source, &ROM)?)
    } else {
        Ok(fs::read(path)?)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("ucode") => match args.get(2) {
            Some(path) => {
                let mut file = fs::File::create(path)?;
                ucode::save_rom(&ROM, &mut file)?;
                println!("wrote revision {} to {}", ROM.revision, path);
            }
            None => {
                println!("revision {}", ROM.revision);
                for opcode in ROM.opcodes.values() {
                    println!(
                        "  0x{:02x} {:<5} {} operand(s), {} form(s)",
                        opcode.index,
                        opcode.name.to_ascii_lowercase(),
                        opcode.operand_count,
                        opcode.combinations.len()
                    );
                }
            }
        },
        Some("asm") => {
            let (input, output) = match (args.get(2), args.get(3)) {
                (Some(i), Some(o)) => (i, o),
                _ => usage(),
            };
            let source = fs::read_to_string(input)?;
            let bytes = assemble::assemble(&source, &ROM)?;
            fs::write(output, &bytes)?;
            println!("wrote {} bytes to {}", bytes.len(), output);
        }
        Some("dis") => {
            let input = args.get(2).unwrap_or_else(|| usage());
            let bytes = load_binary(input)?;
            let mut ram = Ram::new();
            ram.load(0, 0, &bytes);
            let mut offset = 0u16;
            while (offset as usize) < bytes.len() {
                let d = assemble::disassemble_one(&ROM, &mut ram, 0, offset);
                println!("{:04x}  {}", offset, d.text);
                offset = offset.wrapping_add(d.len);
            }
        }
        Some("run") => {
            let input = args.get(2).unwrap_or_else(|| usage());
            let bytes = load_binary(input)?;
            let mut ram = Ram::new();
            ram.load(0, 0, &bytes);
            let mut cpu = Cpu::new(&ROM);
            let ticks = cpu.run(&mut ram, RUN_TICK_LIMIT);
            if !cpu.halted {
                eprintln!("tick limit reached");
            }
            println!("{} ticks", ticks);
            println!("{:?}", cpu);
        }
        _ => usage(),
    }
    Ok(())
}
