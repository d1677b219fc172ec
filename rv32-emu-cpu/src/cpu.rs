use std::rc::Rc;

use hashbrown::HashMap;
use rv32_emu_regs::Regs;

use crate::machine::Machine;

/// Invoked when the PC hits an installed breakpoint. The callback may mutate
/// any machine state, including stopping it; it must not call
/// [`Machine::simulate`] reentrantly.
pub type BreakpointCallback = Rc<dyn Fn(&mut Machine)>;

/// One hart: the register file plus the debugger's break state.
pub struct Cpu {
    pub regs: Regs,
    break_requested: bool,
    break_steps: i64,
    break_steps_cnt: i64,
    breakpoints: HashMap<u32, BreakpointCallback>,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: Regs::new(),
            break_requested: false,
            break_steps: 0,
            break_steps_cnt: 0,
            breakpoints: HashMap::new(),
        }
    }

    pub fn pc(&self) -> u32 {
        self.regs.pc
    }

    /// Enter the interactive debugger before the next instruction.
    pub fn break_now(&mut self) {
        self.break_requested = true;
    }

    pub(crate) fn clear_break(&mut self) {
        self.break_requested = false;
    }

    /// Break after every `steps` retired instructions; 0 disables stepping.
    pub fn break_on_steps(&mut self, steps: i64) {
        assert!(steps >= 0);
        self.break_steps_cnt = steps;
        self.break_steps = steps;
    }

    pub(crate) fn break_time(&mut self) -> bool {
        if self.break_requested {
            return true;
        }
        if self.break_steps_cnt != 0 {
            self.break_steps -= 1;
            if self.break_steps <= 0 {
                self.break_steps = self.break_steps_cnt;
                return true;
            }
        }
        false
    }

    /// Installs the default breakpoint: enter the interactive debugger when
    /// execution reaches `address`.
    pub fn breakpoint(&mut self, address: u32) {
        self.set_breakpoint(address, Rc::new(crate::debug::print_and_pause));
    }

    pub fn set_breakpoint(&mut self, address: u32, callback: BreakpointCallback) {
        self.breakpoints.insert(address, callback);
    }

    pub(crate) fn breakpoint_at(&self, pc: u32) -> Option<BreakpointCallback> {
        if self.breakpoints.is_empty() {
            return None;
        }
        self.breakpoints.get(&pc).cloned()
    }

    pub fn breakpoints(&self) -> &HashMap<u32, BreakpointCallback> {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut HashMap<u32, BreakpointCallback> {
        &mut self.breakpoints
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
