//! The interactive debugger: a line-oriented REPL sharing the CPU state.

use std::io::{self, BufRead, Write};

use rv32_emu_decode::Instruction;
use rv32_emu_errors::CpuException;

use crate::machine::Machine;
use crate::rv32i;

fn print_help() {
    println!(
        r#"
  usage: command [options]
    commands:
      ?, help               Show this informational text
      c, continue           Continue execution, disable stepping
      s, step [steps=1]     Run [steps] instructions, then break
      v, verbose            Toggle verbose instruction execution
      b, break [addr]       Breakpoint on executing [addr]
      clear                 Clear all breakpoints
      reset                 Reset the machine
      read [addr] (len=1)   Read from [addr] (len) bytes and print
      write [addr] [value]  Write [value] to memory location [addr]
      debug                 Trigger the debug interrupt handler
      r, run                Continue execution without instruction tracing
      q, quit               Stop the machine
"#
    );
}

/// Prints the instruction at PC and the register file, then reads commands
/// until one resumes execution.
pub fn print_and_pause(m: &mut Machine) {
    let word = Instruction(m.memory.read::<u32>(m.cpu.regs.pc).unwrap_or(0));
    let entry = rv32i::decode(word);
    println!("\n>>> Breakpoint \t{}\n", (entry.format)(m, word));
    print!("{}", m.cpu.regs);
    let stdin = io::stdin();
    loop {
        print!("Enter = cont, help, quit: ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF resumes
            Ok(_) => {}
        }
        if !execute_command(m, line.trim()) {
            break;
        }
    }
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

/// Applies one debugger command. Returns true to prompt again, false to
/// resume execution.
pub fn execute_command(m: &mut Machine, line: &str) -> bool {
    let mut params = line.split_whitespace();
    let cmd = match params.next() {
        Some(cmd) => cmd,
        None => return false,
    };
    match cmd {
        "c" | "continue" => {
            m.cpu.break_on_steps(0);
            false
        }
        "s" | "step" => {
            m.verbose_instructions = true;
            let steps = params
                .next()
                .and_then(|text| text.parse::<i64>().ok())
                .unwrap_or(1);
            println!("Pressing Enter will now execute {} steps", steps);
            m.cpu.break_on_steps(steps.max(0));
            false
        }
        "b" | "break" => {
            match params.next().and_then(parse_hex) {
                Some(addr) => m.cpu.breakpoint(addr),
                None => println!(">>> Not enough parameters: break [addr]"),
            }
            true
        }
        "clear" => {
            m.cpu.breakpoints_mut().clear();
            true
        }
        "v" | "verbose" => {
            m.verbose_instructions = !m.verbose_instructions;
            println!(
                "Verbose instructions are now {}",
                if m.verbose_instructions { "ON" } else { "OFF" }
            );
            true
        }
        "r" | "run" => {
            m.verbose_instructions = false;
            m.cpu.break_on_steps(0);
            false
        }
        "q" | "quit" | "exit" => {
            m.stop();
            false
        }
        "reset" => {
            m.reset();
            m.cpu.break_now();
            false
        }
        "ld" | "read" => {
            let addr = match params.next().and_then(parse_hex) {
                Some(addr) => addr,
                None => {
                    println!(">>> Not enough parameters: read [addr] (length=1)");
                    return true;
                }
            };
            let bytes = params
                .next()
                .and_then(|text| text.parse::<usize>().ok())
                .unwrap_or(1);
            let mut col = 0;
            for i in 0..bytes {
                if col == 0 {
                    print!("0x{:04x}: ", addr as u64 + i as u64);
                }
                let value = m.memory.read::<u8>(addr.wrapping_add(i as u32)).unwrap_or(0);
                print!("0x{:02x} ", value);
                col += 1;
                if col == 4 {
                    println!();
                    col = 0;
                }
            }
            if col != 0 {
                println!();
            }
            true
        }
        "write" => {
            let addr = params.next().and_then(parse_hex);
            let value = params.next().and_then(|text| text.parse::<u32>().ok());
            match (addr, value) {
                (Some(addr), Some(value)) => {
                    let value = (value & 0xff) as u8;
                    println!("0x{:04x} -> 0x{:02x}", addr, value);
                    let _ = m.memory.write::<u8>(addr, value);
                }
                _ => println!(">>> Not enough parameters: write [addr] [value]"),
            }
            true
        }
        "debug" => {
            m.trigger_exception(CpuException::DebugInterrupt);
            true
        }
        "help" | "?" => {
            print_help();
            true
        }
        _ => {
            println!(">>> Unknown command: '{}'", cmd);
            print_help();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::new(vec![0u8; 16], false)
    }

    #[test]
    fn empty_input_resumes() {
        let mut m = machine();
        assert!(!execute_command(&mut m, ""));
        assert!(!execute_command(&mut m, "   "));
    }

    #[test]
    fn break_installs_a_breakpoint() {
        let mut m = machine();
        assert!(execute_command(&mut m, "b 10142"));
        assert!(m.cpu.breakpoints().contains_key(&0x10142));
        assert!(execute_command(&mut m, "break 0x200"));
        assert!(m.cpu.breakpoints().contains_key(&0x200));
        assert!(execute_command(&mut m, "clear"));
        assert!(m.cpu.breakpoints().is_empty());
    }

    #[test]
    fn break_without_address_reprompts() {
        let mut m = machine();
        assert!(execute_command(&mut m, "break"));
        assert!(m.cpu.breakpoints().is_empty());
    }

    #[test]
    fn verbose_toggles() {
        let mut m = machine();
        assert!(execute_command(&mut m, "v"));
        assert!(m.verbose_instructions);
        assert!(execute_command(&mut m, "verbose"));
        assert!(!m.verbose_instructions);
    }

    #[test]
    fn quit_stops_the_machine() {
        let mut m = machine();
        assert!(!execute_command(&mut m, "quit"));
        assert!(m.stopped());
    }

    #[test]
    fn write_pokes_a_byte() {
        let mut m = machine();
        assert!(execute_command(&mut m, "write 2000 65"));
        assert_eq!(m.memory.read::<u8>(0x2000).unwrap(), 65);
    }

    #[test]
    fn step_arms_the_counter() {
        let mut m = machine();
        assert!(!execute_command(&mut m, "s 5"));
        assert!(m.verbose_instructions);
    }

    #[test]
    fn unknown_commands_reprompt() {
        let mut m = machine();
        assert!(execute_command(&mut m, "bogus"));
        assert!(!m.stopped());
    }
}
