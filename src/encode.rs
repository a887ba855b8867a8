//! Instruction word construction
//!
//! The lower half of this file contains the pure packing functions
//! for the six RV32I encoding formats; the checked encode_* entry
//! points validate the immediate against the format's legal range
//! first, so an error can name the instruction and the range that
//! was violated. Register and funct arguments are masked to their
//! field widths rather than checked; the assembler validates
//! register indices when it parses them.

use thiserror::Error;

use crate::opcodes::{
    IMM_B_MAX, IMM_B_MIN, IMM_I_MAX, IMM_I_MIN, IMM_J_MAX, IMM_J_MIN,
    IMM_S_MAX, IMM_S_MIN, IMM_U_MAX, IMM_U_MIN, OP_IMM, OP_JAL,
};
use crate::utils::{extract_field, mask};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("immediate {imm} out of range for {mnemonic} (expected [{min}, {max}])")]
    ImmediateOutOfRange {
        mnemonic: &'static str,
        imm: i64,
        min: i64,
        max: i64,
    },
    #[error("displacement {imm} for {mnemonic} must be even")]
    OddDisplacement { mnemonic: &'static str, imm: i64 },
}

fn check_imm(
    mnemonic: &'static str,
    imm: i64,
    min: i64,
    max: i64,
) -> Result<(), EncodeError> {
    if imm < min || imm > max {
        Err(EncodeError::ImmediateOutOfRange {
            mnemonic,
            imm,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

fn check_even(mnemonic: &'static str, imm: i64) -> Result<(), EncodeError> {
    if imm % 2 != 0 {
        Err(EncodeError::OddDisplacement { mnemonic, imm })
    } else {
        Ok(())
    }
}

/// Pack an R-type word
pub fn rtype(funct7: u32, rs2: u8, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    (mask::<u32>(7) & funct7) << 25
        | u32::from(rs2 & 0x1f) << 20
        | u32::from(rs1 & 0x1f) << 15
        | (mask::<u32>(3) & funct3) << 12
        | u32::from(rd & 0x1f) << 7
        | (mask::<u32>(7) & opcode)
}

/// Pack an I-type word (imm is the low 12 bits of the value)
pub fn itype(imm: u32, rs1: u8, funct3: u32, rd: u8, opcode: u32) -> u32 {
    (mask::<u32>(12) & imm) << 20
        | u32::from(rs1 & 0x1f) << 15
        | (mask::<u32>(3) & funct3) << 12
        | u32::from(rd & 0x1f) << 7
        | (mask::<u32>(7) & opcode)
}

/// Pack an S-type word, splitting imm[11:5] and imm[4:0]
pub fn stype(imm: u32, rs2: u8, rs1: u8, funct3: u32, opcode: u32) -> u32 {
    let imm11_5 = extract_field(imm, 11, 5);
    let imm4_0 = extract_field(imm, 4, 0);
    imm11_5 << 25
        | u32::from(rs2 & 0x1f) << 20
        | u32::from(rs1 & 0x1f) << 15
        | (mask::<u32>(3) & funct3) << 12
        | imm4_0 << 7
        | (mask::<u32>(7) & opcode)
}

/// Pack a B-type word, permuting the 13-bit displacement (bit 0 is
/// discarded; the checked encoder rejects odd values first)
pub fn btype(imm: u32, rs2: u8, rs1: u8, funct3: u32, opcode: u32) -> u32 {
    let imm12 = extract_field(imm, 12, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_5 = extract_field(imm, 10, 5);
    let imm4_1 = extract_field(imm, 4, 1);
    imm12 << 31
        | imm10_5 << 25
        | u32::from(rs2 & 0x1f) << 20
        | u32::from(rs1 & 0x1f) << 15
        | (mask::<u32>(3) & funct3) << 12
        | imm4_1 << 8
        | imm11 << 7
        | (mask::<u32>(7) & opcode)
}

/// Pack a U-type word (imm is the upper-20 value, placed at 31:12)
pub fn utype(imm: u32, rd: u8, opcode: u32) -> u32 {
    (mask::<u32>(20) & imm) << 12
        | u32::from(rd & 0x1f) << 7
        | (mask::<u32>(7) & opcode)
}

/// Pack a J-type word, permuting the 21-bit displacement
pub fn jtype(imm: u32, rd: u8, opcode: u32) -> u32 {
    let imm20 = extract_field(imm, 20, 20);
    let imm19_12 = extract_field(imm, 19, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_1 = extract_field(imm, 10, 1);
    imm20 << 31
        | imm10_1 << 21
        | imm11 << 20
        | imm19_12 << 12
        | u32::from(rd & 0x1f) << 7
        | (mask::<u32>(7) & opcode)
}

/// Encode an I-type instruction, checking the immediate range
pub fn encode_i(
    mnemonic: &'static str,
    imm: i64,
    rs1: u8,
    funct3: u32,
    rd: u8,
    opcode: u32,
) -> Result<u32, EncodeError> {
    check_imm(mnemonic, imm, IMM_I_MIN, IMM_I_MAX)?;
    Ok(itype(imm as u32, rs1, funct3, rd, opcode))
}

/// Encode a shift-by-immediate instruction. The shift amount sits in
/// the low five immediate bits; funct7 distinguishes srai from srli.
pub fn encode_shamt(
    mnemonic: &'static str,
    shamt: i64,
    rs1: u8,
    funct3: u32,
    funct7: u32,
    rd: u8,
) -> Result<u32, EncodeError> {
    check_imm(mnemonic, shamt, 0, 31)?;
    Ok(rtype(funct7, shamt as u8, rs1, funct3, rd, OP_IMM))
}

/// Encode an S-type instruction, checking the immediate range
pub fn encode_s(
    mnemonic: &'static str,
    imm: i64,
    rs2: u8,
    rs1: u8,
    funct3: u32,
    opcode: u32,
) -> Result<u32, EncodeError> {
    check_imm(mnemonic, imm, IMM_S_MIN, IMM_S_MAX)?;
    Ok(stype(imm as u32, rs2, rs1, funct3, opcode))
}

/// Encode a conditional branch, checking range and evenness
pub fn encode_b(
    mnemonic: &'static str,
    imm: i64,
    rs2: u8,
    rs1: u8,
    funct3: u32,
    opcode: u32,
) -> Result<u32, EncodeError> {
    check_imm(mnemonic, imm, IMM_B_MIN, IMM_B_MAX)?;
    check_even(mnemonic, imm)?;
    Ok(btype(imm as u32, rs2, rs1, funct3, opcode))
}

/// Encode a U-type instruction (lui/auipc); imm is the upper-20 value
pub fn encode_u(
    mnemonic: &'static str,
    imm: i64,
    rd: u8,
    opcode: u32,
) -> Result<u32, EncodeError> {
    check_imm(mnemonic, imm, IMM_U_MIN, IMM_U_MAX)?;
    Ok(utype(imm as u32, rd, opcode))
}

/// Encode jal, checking range and evenness
pub fn encode_j(mnemonic: &'static str, imm: i64, rd: u8) -> Result<u32, EncodeError> {
    check_imm(mnemonic, imm, IMM_J_MIN, IMM_J_MAX)?;
    check_even(mnemonic, imm)?;
    Ok(jtype(imm as u32, rd, OP_JAL))
}
