//! The execution core: fetch/decode/execute over the RV32IM instruction
//! table, the host syscall and exception upcall protocol, and the
//! interactive debugger.

pub mod cpu;
pub mod debug;
pub mod machine;
pub mod rv32i;
pub mod snapshot;

pub use cpu::Cpu;
pub use machine::{Machine, MachineOptions, SyscallHandler};
pub use snapshot::SerializedMachine;

/// Whether the simulate loop runs break checks each iteration.
pub const DEBUGGING_ENABLED: bool = cfg!(feature = "debugging");

/// The syscall number EBREAK dispatches to.
pub const SYSCALL_EBREAK: u32 = 0;
