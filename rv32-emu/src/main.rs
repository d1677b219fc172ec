use std::cell::Cell;
use std::env::Args;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::rc::Rc;

use rv32_emu_cpu::Machine;
use rv32_emu_regs::RvReg;

fn load_file(path: &str) -> io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("could not open {}: {}", path, e)))?;
    let mut binary = Vec::new();
    file.read_to_end(&mut binary)?;
    Ok(binary)
}

fn syscall_write(m: &mut Machine) -> u32 {
    let fd = m.cpu.regs.get(RvReg::a0) as i32;
    let address = m.cpu.regs.get(RvReg::a1);
    let len = m.cpu.regs.get(RvReg::a2) as usize;
    log::debug!("write called, addr = {:#x} len = {}", address, len);
    // only the standard pipes, for now
    if (0..3).contains(&fd) {
        return m.memory.memview(address, len, |buffer| {
            let result = if fd == 2 {
                io::stderr().write_all(buffer)
            } else {
                io::stdout().write_all(buffer)
            };
            match result {
                Ok(()) => len as u32,
                Err(_) => (-1i32) as u32,
            }
        });
    }
    (-1i32) as u32
}

fn syscall_sendint(m: &mut Machine) -> u32 {
    let arg0 = m.cpu.regs.get(RvReg::a0);
    println!(">>> Received integer {} (0x{:X})", arg0 as i32, arg0);
    0
}

fn syscall_ebreak(m: &mut Machine) -> u32 {
    println!("\n>>> EBREAK at {:#x}", m.cpu.regs.pc);
    m.cpu.break_now();
    0
}

fn real_main(args: Args) -> io::Result<ExitCode> {
    let mut filename = None;
    let mut verbose = false;
    let mut debug = false;

    for arg in args {
        match arg.as_str() {
            "--verbose" => verbose = true,
            "--debug" => debug = true,
            flag if flag.starts_with("--") => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Unrecognized argument {}", flag),
                ));
            }
            path => {
                if filename.replace(path.to_string()).is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Expected exactly one guest binary",
                    ));
                }
            }
        }
    }

    let filename = filename.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "Provide binary filename!")
    })?;

    let binary = load_file(&filename)?;
    let mut machine = Machine::new(binary, verbose);

    let exit_code = Rc::new(Cell::new(0u32));
    let exit_code2 = exit_code.clone();
    machine.install_syscall_handler(0, syscall_ebreak);
    machine.install_syscall_handler(64, syscall_write);
    machine.install_syscall_handler(93, move |m: &mut Machine| {
        let code = m.cpu.regs.get(RvReg::a0);
        println!(">>> Program exited, exit code = {}", code as i32);
        exit_code2.set(code);
        m.stop();
        0
    });
    machine.install_syscall_handler(666, syscall_sendint);

    if verbose {
        machine.verbose_instructions = true;
    }
    if debug {
        machine.cpu.break_now();
    }

    while !machine.stopped() {
        machine.simulate();
    }

    Ok(ExitCode::from(exit_code.get() as u8))
}

fn main() -> ExitCode {
    env_logger::init();
    let mut args = std::env::args();
    let prg_name = args.next().unwrap_or_else(|| "rv32-emu".to_string());

    match real_main(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", prg_name, e);
            ExitCode::FAILURE
        }
    }
}
