//! The RV32IM instruction table: one slot per major opcode, each pairing an
//! execute function with a disassembly function.

use rv32_emu_decode::{opcodes, Instruction};
use rv32_emu_errors::{CpuException, CpuResult};
use rv32_emu_regs::RvReg;

use crate::machine::Machine;
use crate::SYSCALL_EBREAK;

pub type ExecuteFn = fn(&mut Machine, Instruction) -> CpuResult<()>;
pub type FormatFn = fn(&Machine, Instruction) -> String;

pub struct InstrEntry {
    pub execute: ExecuteFn,
    pub format: FormatFn,
}

/// Routes a fetched word to its slot. Compressed forms (low bits != 0b11)
/// have no handlers on this machine and fall into UNIMPLEMENTED.
pub fn decode(instr: Instruction) -> &'static InstrEntry {
    if instr.is_compressed() {
        return &UNIMPLEMENTED;
    }
    match instr.opcode() {
        opcodes::LOAD => &LOAD,
        opcodes::STORE => &STORE,
        opcodes::BRANCH => &BRANCH,
        opcodes::JALR => &JALR,
        opcodes::JAL => &JAL,
        opcodes::OP_IMM => &OP_IMM,
        opcodes::OP => &OP,
        opcodes::SYSTEM => &SYSTEM,
        opcodes::LUI => &LUI,
        opcodes::AUIPC => &AUIPC,
        opcodes::OP_IMM32 => &OP_IMM32,
        opcodes::OP32 => &OP32,
        opcodes::FENCE => &FENCE,
        _ => &UNIMPLEMENTED,
    }
}

// The quotient of i32::MIN / -1 does not exist in 32 bits; the comparison is
// on the unsigned register values.
const DIV_OVERFLOW_DIVIDEND: u32 = 0x8000_0000;
const DIV_OVERFLOW_DIVISOR: u32 = 0xffff_ffff;

pub static UNIMPLEMENTED: InstrEntry = InstrEntry {
    execute: execute_unimplemented,
    format: format_unimplemented,
};

fn execute_unimplemented(_m: &mut Machine, _instr: Instruction) -> CpuResult<()> {
    Err(CpuException::UnimplementedInstruction)
}

fn format_unimplemented(_m: &Machine, instr: Instruction) -> String {
    if instr.length() == 4 {
        format!(
            "UNIMPLEMENTED: 4-byte {:#x} ({:#010x})",
            instr.opcode(),
            instr.0
        )
    } else {
        format!("UNIMPLEMENTED: 2-byte ({:#06x})", instr.0 & 0xffff)
    }
}

pub static LOAD: InstrEntry = InstrEntry {
    execute: execute_load,
    format: format_load,
};

fn execute_load(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() != 0 {
        let addr = m
            .cpu
            .regs
            .get(RvReg(instr.rs1()))
            .wrapping_add(instr.imm_i() as u32);
        let value = match instr.funct3() {
            0 => m.memory.read::<u8>(addr)? as i8 as i32 as u32,
            1 => m.memory.read::<u16>(addr)? as i16 as i32 as u32,
            2 => m.memory.read::<u32>(addr)?,
            4 => m.memory.read::<u8>(addr)? as u32,
            5 => m.memory.read::<u16>(addr)? as u32,
            _ => return Err(CpuException::IllegalOperation),
        };
        m.cpu.regs.set(rd, value);
        return Ok(());
    }
    Err(CpuException::IllegalOperation)
}

fn format_load(m: &Machine, instr: Instruction) -> String {
    const F3: [&str; 8] = ["LB", "LH", "LW", "???", "LBU", "LHU", "???", "???"];
    let rs1 = RvReg(instr.rs1());
    format!(
        "{} {}, [{}{:+} = 0x{:X}]",
        F3[instr.funct3() as usize],
        RvReg(instr.rd()),
        rs1,
        instr.imm_i(),
        m.cpu.regs.get(rs1).wrapping_add(instr.imm_i() as u32)
    )
}

pub static STORE: InstrEntry = InstrEntry {
    execute: execute_store,
    format: format_store,
};

fn execute_store(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let value = m.cpu.regs.get(RvReg(instr.rs2()));
    let addr = m
        .cpu
        .regs
        .get(RvReg(instr.rs1()))
        .wrapping_add(instr.imm_s() as u32);
    match instr.funct3() {
        0 => m.memory.write::<u8>(addr, value as u8),
        1 => m.memory.write::<u16>(addr, value as u16),
        2 => m.memory.write::<u32>(addr, value),
        _ => Err(CpuException::IllegalOperation),
    }
}

fn format_store(m: &Machine, instr: Instruction) -> String {
    const F3: [&str; 8] = ["SB", "SH", "SW", "S??", "S??", "S??", "S??", "S??"];
    let rs1 = RvReg(instr.rs1());
    format!(
        "{} {}, [{}{:+}] (0x{:X})",
        F3[instr.funct3() as usize],
        RvReg(instr.rs2()),
        rs1,
        instr.imm_s(),
        m.cpu.regs.get(rs1).wrapping_add(instr.imm_s() as u32)
    )
}

pub static BRANCH: InstrEntry = InstrEntry {
    execute: execute_branch,
    format: format_branch,
};

fn execute_branch(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let reg1 = m.cpu.regs.get(RvReg(instr.rs1()));
    let reg2 = m.cpu.regs.get(RvReg(instr.rs2()));
    let comparison = match instr.funct3() {
        0 => reg1 == reg2,                       // BEQ
        1 => reg1 != reg2,                       // BNE
        4 => (reg1 as i32) < (reg2 as i32),      // BLT
        5 => (reg1 as i32) >= (reg2 as i32),     // BGE
        6 => reg1 < reg2,                        // BLTU
        7 => reg1 >= reg2,                       // BGEU
        _ => return Err(CpuException::IllegalOperation),
    };
    if comparison {
        let target = m.cpu.regs.pc.wrapping_add(instr.imm_b() as u32);
        m.cpu.regs.jump(target.wrapping_sub(4));
        if m.verbose_jumps {
            println!(">>> BRANCH jump to 0x{:X}", target);
        }
    }
    Ok(())
}

fn format_branch(m: &Machine, instr: Instruction) -> String {
    const F3: [&str; 8] = ["BEQ", "BNE", "???", "???", "BLT", "BGE", "BLTU", "BGEU"];
    const F3Z: [&str; 8] = ["BEQZ", "BNEZ", "???", "???", "BLTZ", "BGEZ", "BLTU", "BGEU"];
    let target = m.cpu.regs.pc.wrapping_add(instr.imm_b() as u32);
    if instr.rs2() == 0 && instr.funct3() < 2 {
        format!(
            "{} {} => PC{:+} (0x{:X})",
            F3Z[instr.funct3() as usize],
            RvReg(instr.rs1()),
            instr.imm_b(),
            target
        )
    } else {
        format!(
            "{} {}, {} => PC{:+} (0x{:X})",
            F3[instr.funct3() as usize],
            RvReg(instr.rs1()),
            RvReg(instr.rs2()),
            instr.imm_b(),
            target
        )
    }
}

pub static JALR: InstrEntry = InstrEntry {
    execute: execute_jalr,
    format: format_jalr,
};

fn execute_jalr(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rs1 = RvReg(instr.rs1());
    let address = m.cpu.regs.get(rs1).wrapping_add(instr.imm_i() as u32);
    // link the *next* instruction
    let rd = RvReg(instr.rd());
    if rd.index() != 0 {
        let link = m.cpu.regs.pc.wrapping_add(4);
        m.cpu.regs.set(rd, link);
    }
    m.cpu.regs.jump(address.wrapping_sub(4));
    if m.verbose_jumps {
        println!(
            ">>> JMP 0x{:X} <-- {} = 0x{:X}{:+}",
            address,
            rs1,
            m.cpu.regs.get(rs1),
            instr.imm_i()
        );
    }
    Ok(())
}

fn format_jalr(m: &Machine, instr: Instruction) -> String {
    let rs1 = RvReg(instr.rs1());
    let address = m.cpu.regs.get(rs1).wrapping_add(instr.imm_i() as u32);
    if instr.rd() == 0 && rs1 == RvReg::ra && instr.imm_i() == 0 {
        format!("RET (0x{:X})", address)
    } else {
        format!(
            "JALR {}, {}{:+} (0x{:X})",
            RvReg(instr.rd()),
            rs1,
            instr.imm_i(),
            address
        )
    }
}

pub static JAL: InstrEntry = InstrEntry {
    execute: execute_jal,
    format: format_jal,
};

fn execute_jal(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() != 0 {
        let link = m.cpu.regs.pc.wrapping_add(4);
        m.cpu.regs.set(rd, link);
    }
    let target = m.cpu.regs.pc.wrapping_add(instr.imm_j() as u32);
    m.cpu.regs.jump(target.wrapping_sub(4));
    if m.verbose_jumps {
        println!(">>> CALL 0x{:X} <-- {}", target, rd);
    }
    Ok(())
}

fn format_jal(m: &Machine, instr: Instruction) -> String {
    let target = m.cpu.regs.pc.wrapping_add(instr.imm_j() as u32);
    if instr.rd() != 0 {
        format!(
            "JAL {}, PC{:+} (0x{:X})",
            RvReg(instr.rd()),
            instr.imm_j(),
            target
        )
    } else {
        format!("JMP PC{:+} (0x{:X})", instr.imm_j(), target)
    }
}

pub static OP_IMM: InstrEntry = InstrEntry {
    execute: execute_op_imm,
    format: format_op_imm,
};

fn execute_op_imm(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() == 0 {
        return Err(CpuException::IllegalOperation);
    }
    let src = m.cpu.regs.get(RvReg(instr.rs1()));
    let imm = instr.imm_i();
    let value = match instr.funct3() {
        0 => src.wrapping_add(imm as u32), // ADDI
        1 => src << instr.shift_imm(),     // SLLI
        2 => ((src as i32) < imm) as u32,  // SLTI
        3 => (src < imm as u32) as u32,    // SLTIU
        4 => src ^ imm as u32,             // XORI
        5 => {
            if !instr.is_funct7_bit() {
                src >> instr.shift_imm() // SRLI
            } else {
                ((src as i32) >> instr.shift_imm()) as u32 // SRAI
            }
        }
        6 => src | imm as u32, // ORI
        _ => src & imm as u32, // ANDI
    };
    m.cpu.regs.set(rd, value);
    Ok(())
}

fn format_op_imm(m: &Machine, instr: Instruction) -> String {
    const F3: [&str; 8] = [
        "ADDI", "SLLI", "SLTI", "SLTIU", "XORI", "SRLI", "ORI", "ANDI",
    ];
    let rd = RvReg(instr.rd());
    let rs1 = RvReg(instr.rs1());
    let imm = instr.imm_i();
    let funct3 = instr.funct3();
    if funct3 == 0 && imm == 0 {
        if instr.rd() == 0 && instr.rs1() == 0 {
            return "NOP".to_string();
        }
        return format!("MV {}, {}", rd, rs1);
    }
    if funct3 == 4 && imm == -1 {
        return format!("NOT {}, {}", rd, rs1);
    }
    if funct3 == 1 || funct3 == 5 {
        let mnemonic = if funct3 == 1 {
            "SLLI"
        } else if instr.is_funct7_bit() {
            "SRAI"
        } else {
            "SRLI"
        };
        return format!(
            "{} {}, {} by {} (0x{:X})",
            mnemonic,
            rd,
            rs1,
            instr.shift_imm(),
            m.cpu.regs.get(rs1)
        );
    }
    format!("{} {}, {}, {}", F3[funct3 as usize], rd, rs1, imm)
}

pub static OP: InstrEntry = InstrEntry {
    execute: execute_op,
    format: format_op,
};

fn execute_op(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() == 0 {
        return Err(CpuException::IllegalOperation);
    }
    let src1 = m.cpu.regs.get(RvReg(instr.rs1()));
    let src2 = m.cpu.regs.get(RvReg(instr.rs2()));
    let value = if !instr.is_m_extension() {
        match instr.funct3() {
            0 => {
                if !instr.is_funct7_bit() {
                    src1.wrapping_add(src2) // ADD
                } else {
                    src1.wrapping_sub(src2) // SUB
                }
            }
            1 => src1 << (src2 & 0x1f),                  // SLL
            2 => ((src1 as i32) < (src2 as i32)) as u32, // SLT
            3 => (src1 < src2) as u32,                   // SLTU
            4 => src1 ^ src2,                            // XOR
            5 => {
                if !instr.is_funct7_bit() {
                    src1 >> (src2 & 0x1f) // SRL
                } else {
                    ((src1 as i32) >> (src2 & 0x1f)) as u32 // SRA
                }
            }
            6 => src1 | src2, // OR
            _ => src1 & src2, // AND
        }
    } else {
        match instr.funct3() {
            0 => (src1 as i32).wrapping_mul(src2 as i32) as u32, // MUL
            1 => (((src1 as i32 as i64) * (src2 as i32 as i64)) >> 32) as u32, // MULH
            2 => (((src1 as i32 as i64) * (src2 as i64)) >> 32) as u32, // MULHSU
            3 => (((src1 as u64) * (src2 as u64)) >> 32) as u32, // MULHU
            4 => {
                // DIV: division by zero and the overflow case are not
                // exceptions; the destination is left untouched.
                if src2 == 0
                    || (src1 == DIV_OVERFLOW_DIVIDEND && src2 == DIV_OVERFLOW_DIVISOR)
                {
                    return Ok(());
                }
                ((src1 as i32) / (src2 as i32)) as u32
            }
            5 => {
                // DIVU
                if src2 == 0 {
                    return Ok(());
                }
                src1 / src2
            }
            6 => {
                // REM
                if src2 == 0
                    || (src1 == DIV_OVERFLOW_DIVIDEND && src2 == DIV_OVERFLOW_DIVISOR)
                {
                    return Ok(());
                }
                ((src1 as i32) % (src2 as i32)) as u32
            }
            _ => {
                // REMU
                if src2 == 0 {
                    return Ok(());
                }
                src1 % src2
            }
        }
    };
    m.cpu.regs.set(rd, value);
    Ok(())
}

fn format_op(_m: &Machine, instr: Instruction) -> String {
    const F3: [&str; 16] = [
        "ADD", "SLL", "SLT", "SLTU", "XOR", "SRL", "OR", "AND", "SUB", "SLL", "SLT", "SLTU",
        "XOR", "SRA", "OR", "AND",
    ];
    const F3M: [&str; 8] = [
        "MUL", "MULH", "MULHSU", "MULHU", "DIV", "DIVU", "REM", "REMU",
    ];
    let mnemonic = if instr.is_m_extension() {
        F3M[instr.funct3() as usize]
    } else {
        F3[(instr.funct3() + if instr.is_funct7_bit() { 8 } else { 0 }) as usize]
    };
    format!(
        "{} {}, {}, {}",
        mnemonic,
        RvReg(instr.rd()),
        RvReg(instr.rs1()),
        RvReg(instr.rs2())
    )
}

pub static SYSTEM: InstrEntry = InstrEntry {
    execute: execute_system,
    format: format_system,
};

fn u64_monotonic_time() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

fn execute_system(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    match instr.funct3() {
        0 => match instr.imm_raw() {
            0 => {
                // ECALL
                m.system_call(m.cpu.regs.get(RvReg::ecall_nr));
                Ok(())
            }
            1 => {
                // EBREAK
                m.system_call(SYSCALL_EBREAK);
                Ok(())
            }
            _ => Err(CpuException::IllegalOperation),
        },
        // CSRRW and CSRRS share one behavior here: the destination is read
        // only when rd != x0, the source is written only when rs1 != x0.
        1 | 2 => {
            let rd = RvReg(instr.rd());
            let rs1 = RvReg(instr.rs1());
            let do_read = rd.index() != 0;
            let do_write = rs1.index() != 0;
            match instr.imm_raw() {
                0x001 => {
                    // fflags (accrued exceptions)
                    if do_read {
                        let value = m.cpu.regs.fcsr.fflags();
                        m.cpu.regs.set(rd, value);
                    }
                    if do_write {
                        let value = m.cpu.regs.get(rs1);
                        m.cpu.regs.fcsr.set_fflags(value);
                    }
                }
                0x002 => {
                    // frm (rounding mode)
                    if do_read {
                        let value = m.cpu.regs.fcsr.frm();
                        m.cpu.regs.set(rd, value);
                    }
                    if do_write {
                        let value = m.cpu.regs.get(rs1);
                        m.cpu.regs.fcsr.set_frm(value);
                    }
                }
                0x003 => {
                    // fcsr, whole-value view
                    if do_read {
                        let value = m.cpu.regs.fcsr.whole();
                        m.cpu.regs.set(rd, value);
                    }
                    if do_write {
                        let value = m.cpu.regs.get(rs1);
                        m.cpu.regs.fcsr.set_whole(value);
                    }
                }
                // RDCYCLE and RDINSTRET both read the retired-instruction
                // counter on this machine.
                0xc00 | 0xc02 => {
                    if do_read {
                        let value = m.cpu.regs.counter as u32;
                        m.cpu.regs.set(rd, value);
                    }
                }
                0xc80 | 0xc82 => {
                    if do_read {
                        let value = (m.cpu.regs.counter >> 32) as u32;
                        m.cpu.regs.set(rd, value);
                    }
                }
                0xc01 => {
                    if do_read {
                        let value = u64_monotonic_time() as u32;
                        m.cpu.regs.set(rd, value);
                    }
                }
                0xc81 => {
                    if do_read {
                        let value = (u64_monotonic_time() >> 32) as u32;
                        m.cpu.regs.set(rd, value);
                    }
                }
                _ => return Err(CpuException::IllegalOperation),
            }
            Ok(())
        }
        _ => Err(CpuException::IllegalOperation),
    }
}

fn format_system(_m: &Machine, instr: Instruction) -> String {
    if instr.funct3() == 0 {
        return match instr.imm_raw() {
            0 => "ECALL".to_string(),
            1 => "EBREAK".to_string(),
            _ => "SYS ???".to_string(),
        };
    }
    let op = if instr.funct3() == 1 { "CSRRW" } else { "CSRRS" };
    let csr = match instr.imm_raw() {
        0x001 => "fflags",
        0x002 => "frm",
        0x003 => "fcsr",
        0xc00 => "cycle",
        0xc02 => "instret",
        0xc80 => "cycleh",
        0xc82 => "instreth",
        0xc01 => "time",
        0xc81 => "timeh",
        _ => "csr?",
    };
    format!(
        "{} {}, {}, {}",
        op,
        RvReg(instr.rd()),
        csr,
        RvReg(instr.rs1())
    )
}

pub static LUI: InstrEntry = InstrEntry {
    execute: execute_lui,
    format: format_lui,
};

fn execute_lui(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() != 0 {
        m.cpu.regs.set(rd, instr.imm_u());
        return Ok(());
    }
    Err(CpuException::IllegalOperation)
}

fn format_lui(_m: &Machine, instr: Instruction) -> String {
    format!("LUI {}, 0x{:X}", RvReg(instr.rd()), instr.imm_u())
}

pub static AUIPC: InstrEntry = InstrEntry {
    execute: execute_auipc,
    format: format_auipc,
};

fn execute_auipc(m: &mut Machine, instr: Instruction) -> CpuResult<()> {
    let rd = RvReg(instr.rd());
    if rd.index() != 0 {
        let value = m.cpu.regs.pc.wrapping_add(instr.imm_u());
        m.cpu.regs.set(rd, value);
        return Ok(());
    }
    Err(CpuException::IllegalOperation)
}

fn format_auipc(m: &Machine, instr: Instruction) -> String {
    format!(
        "AUIPC {}, PC+0x{:X} (0x{:X})",
        RvReg(instr.rd()),
        instr.imm_u(),
        m.cpu.regs.pc.wrapping_add(instr.imm_u())
    )
}

// The 32-bit-on-64 opcode slots exist only on RV64.
pub static OP_IMM32: InstrEntry = InstrEntry {
    execute: execute_unimplemented,
    format: format_op_imm32,
};

fn format_op_imm32(_m: &Machine, _instr: Instruction) -> String {
    "OP_IMM32".to_string()
}

pub static OP32: InstrEntry = InstrEntry {
    execute: execute_unimplemented,
    format: format_op32,
};

fn format_op32(_m: &Machine, _instr: Instruction) -> String {
    "OP_32".to_string()
}

pub static FENCE: InstrEntry = InstrEntry {
    execute: execute_fence,
    format: format_fence,
};

fn execute_fence(_m: &mut Machine, _instr: Instruction) -> CpuResult<()> {
    // single hart, strongly ordered: nothing to do
    Ok(())
}

fn format_fence(_m: &Machine, _instr: Instruction) -> String {
    "FENCE".to_string()
}
