use std::rc::Rc;

use hashbrown::HashMap;
use rv32_emu_decode::Instruction;
use rv32_emu_errors::CpuException;
use rv32_emu_mem::Memory;
use rv32_emu_regs::{Regs, RvReg};

use crate::cpu::Cpu;
use crate::{debug, rv32i, DEBUGGING_ENABLED};

/// A host-registered system call handler. Arguments are read from a0..a6,
/// the returned value lands in a0. Handlers must not call
/// [`Machine::simulate`] reentrantly.
pub type SyscallHandler = Rc<dyn Fn(&mut Machine) -> u32>;

#[derive(Copy, Clone, Debug)]
pub struct MachineOptions {
    /// Log machine lifecycle information.
    pub verbose: bool,
    /// Materialized pages beyond this limit abort the process.
    pub page_limit: usize,
    /// Executing from this address halts the loop; 0 disables the check.
    pub exit_address: u32,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            page_limit: usize::MAX,
            exit_address: 0,
        }
    }
}

/// One guest: a CPU, an address space, and the host's syscall bindings.
pub struct Machine {
    pub cpu: Cpu,
    pub memory: Memory,
    pub verbose_instructions: bool,
    pub verbose_jumps: bool,
    pub verbose_registers: bool,
    stopped: bool,
    syscall_handlers: HashMap<u32, SyscallHandler>,
    initial_image: Vec<u8>,
}

impl Machine {
    /// Builds a machine with `image` loaded at address zero.
    pub fn new(image: Vec<u8>, verbose: bool) -> Self {
        Self::with_options(
            image,
            MachineOptions {
                verbose,
                ..Default::default()
            },
        )
    }

    pub fn with_options(image: Vec<u8>, options: MachineOptions) -> Self {
        let mut memory = Memory::new(options.page_limit);
        memory.set_exit_address(options.exit_address);
        memory.memcpy(0, &image);
        if options.verbose {
            log::info!(
                "machine created: {} byte image across {} pages",
                image.len(),
                memory.store().page_count()
            );
        }
        Self {
            cpu: Cpu::new(),
            memory,
            verbose_instructions: false,
            verbose_jumps: false,
            verbose_registers: false,
            stopped: false,
            syscall_handlers: HashMap::new(),
            initial_image: image,
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Zeroes the register file and instruction counter and rebuilds the
    /// page store from the construction image.
    pub fn reset(&mut self) {
        self.cpu.regs = Regs::new();
        self.memory.reset();
        let image = core::mem::take(&mut self.initial_image);
        self.memory.memcpy(0, &image);
        self.initial_image = image;
        log::info!("machine reset");
    }

    pub fn install_syscall_handler<F>(&mut self, number: u32, handler: F)
    where
        F: Fn(&mut Machine) -> u32 + 'static,
    {
        self.syscall_handlers.insert(number, Rc::new(handler));
    }

    /// Invokes the handler bound to `number`, storing its return value in
    /// a0. A missing handler is fatal: the machine stops with a message.
    pub fn system_call(&mut self, number: u32) {
        match self.syscall_handlers.get(&number).cloned() {
            Some(handler) => {
                let ret = handler(self);
                self.cpu.regs.set(RvReg::a0, ret);
            }
            None => {
                eprintln!(
                    ">>> Unhandled system call: {} at PC {:#010x}",
                    number, self.cpu.regs.pc
                );
                self.stop();
            }
        }
    }

    /// Routes a guest fault into the syscall table. Without a handler for
    /// the fault's reserved number the machine stops.
    pub fn trigger_exception(&mut self, exception: CpuException) {
        log::debug!(
            "guest fault: {} at pc {:#010x}",
            exception,
            self.cpu.regs.pc
        );
        if self.syscall_handlers.contains_key(&exception.number()) {
            self.system_call(exception.number());
        } else {
            eprintln!(
                ">>> Unhandled exception: {} at PC {:#010x}",
                exception, self.cpu.regs.pc
            );
            self.stop();
        }
    }

    /// Runs until the machine stops or reaches the exit address.
    pub fn simulate(&mut self) {
        while !self.stopped {
            let pc = self.cpu.regs.pc;
            if self.memory.exit_address() != 0 && pc == self.memory.exit_address() {
                log::debug!("reached exit address {:#010x}", pc);
                self.stop();
                break;
            }
            if DEBUGGING_ENABLED {
                self.break_checks();
                if self.stopped {
                    break;
                }
            }
            self.step();
        }
    }

    /// One fetch/decode/execute round. A fault dispatches through the
    /// exception path; PC then advances past the faulting instruction.
    fn step(&mut self) {
        let pc = self.cpu.regs.pc;
        let word = match self.memory.read::<u32>(pc) {
            Ok(word) => Instruction(word),
            Err(exception) => {
                self.trigger_exception(exception);
                self.cpu.regs.pc = pc.wrapping_add(4);
                self.cpu.regs.counter += 1;
                return;
            }
        };
        let length = word.length();
        let entry = rv32i::decode(word);
        if self.verbose_instructions {
            println!(">>> {}", (entry.format)(self, word));
        }
        if let Err(exception) = (entry.execute)(self, word) {
            self.trigger_exception(exception);
        }
        self.cpu.regs.pc = self.cpu.regs.pc.wrapping_add(length);
        self.cpu.regs.counter += 1;
        if self.verbose_registers {
            print!("{}", self.cpu.regs);
        }
    }

    fn break_checks(&mut self) {
        if self.cpu.break_time() {
            self.cpu.clear_break();
            debug::print_and_pause(self);
        }
        if let Some(callback) = self.cpu.breakpoint_at(self.cpu.regs.pc) {
            callback(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn syscall_return_value_lands_in_a0() {
        let mut m = Machine::new(Vec::new(), false);
        m.install_syscall_handler(17, |_: &mut Machine| 0xabcd);
        m.system_call(17);
        assert_eq!(m.cpu.regs.get(RvReg::a0), 0xabcd);
        assert!(!m.stopped());
    }

    #[test]
    fn missing_handler_is_fatal() {
        let mut m = Machine::new(Vec::new(), false);
        m.system_call(1234);
        assert!(m.stopped());
    }

    #[test]
    fn exceptions_route_through_the_syscall_table() {
        let mut m = Machine::new(Vec::new(), false);
        let hit = std::rc::Rc::new(Cell::new(false));
        let hit2 = hit.clone();
        m.install_syscall_handler(
            CpuException::DebugInterrupt.number(),
            move |_: &mut Machine| {
                hit2.set(true);
                0
            },
        );
        m.trigger_exception(CpuException::DebugInterrupt);
        assert!(hit.get());
        assert!(!m.stopped());

        // without a handler the machine stops
        m.trigger_exception(CpuException::IllegalOperation);
        assert!(m.stopped());
    }

    #[test]
    fn image_is_loaded_at_address_zero() {
        let mut m = Machine::new(vec![0x13, 0x00, 0x00, 0x00], false);
        assert_eq!(m.memory.read::<u32>(0).unwrap(), 0x13);
    }
}
