use bytemuck::{Pod, Zeroable};

/// Guest faults raised by the execution core.
///
/// A fault never unwinds out of the simulate loop; it is translated into a
/// dispatcher call so the embedder can log, mutate state or stop the machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CpuException {
    /// Unknown encoding, or a form the ISA forbids (e.g. a destination of x0
    /// where the base ISA requires a real register).
    IllegalOperation,
    /// A known encoding that this machine does not implement (compressed
    /// forms, the RV64-only opcode slots, the gated extensions).
    UnimplementedInstruction,
    /// The page backing the access lacks the required permission.
    ProtectionFault,
    /// Raised only when the alignment check is compiled in.
    MisalignedAccess,
    /// Explicit trap requested from the debugger.
    DebugInterrupt,
}

/// Exceptions dispatch through the same table as ordinary system calls,
/// offset into a range no sane guest ABI occupies.
pub const EXCEPTION_BASE: u32 = 0x8000_0000;

impl CpuException {
    /// The syscall-table slot this exception dispatches to.
    pub const fn number(self) -> u32 {
        EXCEPTION_BASE
            + match self {
                CpuException::IllegalOperation => 0,
                CpuException::UnimplementedInstruction => 1,
                CpuException::ProtectionFault => 2,
                CpuException::MisalignedAccess => 3,
                CpuException::DebugInterrupt => 4,
            }
    }
}

impl core::fmt::Display for CpuException {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            CpuException::IllegalOperation => "illegal operation",
            CpuException::UnimplementedInstruction => "unimplemented instruction",
            CpuException::ProtectionFault => "protection fault",
            CpuException::MisalignedAccess => "misaligned access",
            CpuException::DebugInterrupt => "debug interrupt",
        };
        f.write_str(name)
    }
}

fake_enum::fake_enum! {
    #[repr(u8)]
    #[derive(Pod, Zeroable, Hash)]
    pub enum struct AccessKind {
        Read = 0,
        Write = 1,
        Execute = 2,
    }
}

pub type CpuResult<T> = core::result::Result<T, CpuException>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_numbers_are_distinct_and_reserved() {
        let all = [
            CpuException::IllegalOperation,
            CpuException::UnimplementedInstruction,
            CpuException::ProtectionFault,
            CpuException::MisalignedAccess,
            CpuException::DebugInterrupt,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.number() >= EXCEPTION_BASE);
            for b in &all[i + 1..] {
                assert_ne!(a.number(), b.number());
            }
        }
    }
}
