//! Hand-rolled RV32IM encoders and machine builders shared by the
//! integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use rv32_emu_cpu::Machine;

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const T0: u32 = 5;
pub const T1: u32 = 6;
pub const T2: u32 = 7;
pub const A0: u32 = 10;
pub const A1: u32 = 11;
pub const A2: u32 = 12;
pub const A3: u32 = 13;
pub const A4: u32 = 14;
pub const A5: u32 = 15;
pub const A6: u32 = 16;
pub const A7: u32 = 17;

pub fn rtype(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

pub fn itype(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (imm as u32 & 0xfff) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

pub fn stype(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 5 & 0x7f) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1f) << 7 | 0x23
}

pub fn btype(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = imm as u32;
    (imm >> 12 & 1) << 31
        | (imm >> 5 & 0x3f) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | (imm >> 1 & 0xf) << 8
        | (imm >> 11 & 1) << 7
        | 0x63
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 0, rd, 0x13)
}

pub fn slli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    itype(shamt as i32, rs1, 1, rd, 0x13)
}

pub fn srli(rd: u32, rs1: u32, shamt: u32) -> u32 {
    itype(shamt as i32, rs1, 5, rd, 0x13)
}

pub fn srai(rd: u32, rs1: u32, shamt: u32) -> u32 {
    itype((0x400 | shamt) as i32, rs1, 5, rd, 0x13)
}

pub fn xori(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 4, rd, 0x13)
}

pub fn lui(rd: u32, imm20: u32) -> u32 {
    imm20 << 12 | rd << 7 | 0x37
}

pub fn auipc(rd: u32, imm20: u32) -> u32 {
    imm20 << 12 | rd << 7 | 0x17
}

pub fn lb(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 0, rd, 0x03)
}

pub fn lh(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 1, rd, 0x03)
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 2, rd, 0x03)
}

pub fn lbu(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 4, rd, 0x03)
}

pub fn lhu(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 5, rd, 0x03)
}

pub fn sb(rs2: u32, rs1: u32, imm: i32) -> u32 {
    stype(imm, rs2, rs1, 0)
}

pub fn sh(rs2: u32, rs1: u32, imm: i32) -> u32 {
    stype(imm, rs2, rs1, 1)
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    stype(imm, rs2, rs1, 2)
}

pub fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    btype(imm, rs2, rs1, 0)
}

pub fn bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    btype(imm, rs2, rs1, 1)
}

pub fn blt(rs1: u32, rs2: u32, imm: i32) -> u32 {
    btype(imm, rs2, rs1, 4)
}

pub fn bge(rs1: u32, rs2: u32, imm: i32) -> u32 {
    btype(imm, rs2, rs1, 5)
}

pub fn bltu(rs1: u32, rs2: u32, imm: i32) -> u32 {
    btype(imm, rs2, rs1, 6)
}

pub fn jal(rd: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    (imm >> 20 & 1) << 31
        | (imm >> 1 & 0x3ff) << 21
        | (imm >> 11 & 1) << 20
        | (imm >> 12 & 0xff) << 12
        | rd << 7
        | 0x6f
}

pub fn jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    itype(imm, rs1, 0, rd, 0x67)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0, rs2, rs1, 0, rd, 0x33)
}

pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0x20, rs2, rs1, 0, rd, 0x33)
}

pub fn sll(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0, rs2, rs1, 1, rd, 0x33)
}

pub fn srl(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0, rs2, rs1, 5, rd, 0x33)
}

pub fn sra(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0x20, rs2, rs1, 5, rd, 0x33)
}

pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0, rs2, rs1, 2, rd, 0x33)
}

pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(0, rs2, rs1, 3, rd, 0x33)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 0, rd, 0x33)
}

pub fn mulh(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 1, rd, 0x33)
}

pub fn mulhsu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 2, rd, 0x33)
}

pub fn mulhu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 3, rd, 0x33)
}

pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 4, rd, 0x33)
}

pub fn divu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 5, rd, 0x33)
}

pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 6, rd, 0x33)
}

pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rtype(1, rs2, rs1, 7, rd, 0x33)
}

pub fn ecall() -> u32 {
    0x0000_0073
}

pub fn ebreak() -> u32 {
    0x0010_0073
}

pub fn fence() -> u32 {
    0x0ff0_000f
}

pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    csr << 20 | rs1 << 15 | 1 << 12 | rd << 7 | 0x73
}

pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
    csr << 20 | rs1 << 15 | 2 << 12 | rd << 7 | 0x73
}

pub fn image(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// A machine with the standard exit binding: syscall 93 records a0 and
/// stops.
pub fn machine(words: &[u32]) -> (Machine, Rc<Cell<Option<u32>>>) {
    machine_from_image(image(words))
}

pub fn machine_from_image(image: Vec<u8>) -> (Machine, Rc<Cell<Option<u32>>>) {
    let mut m = Machine::new(image, false);
    let exit_code = Rc::new(Cell::new(None));
    let exit_code2 = exit_code.clone();
    m.install_syscall_handler(93, move |m: &mut Machine| {
        exit_code2.set(Some(m.cpu.regs.get(rv32_emu_regs::RvReg::a0)));
        m.stop();
        0
    });
    (m, exit_code)
}

/// The two-instruction exit epilogue: a7 = 93, ecall.
pub fn exit_seq() -> [u32; 2] {
    [addi(A7, ZERO, 93), ecall()]
}
