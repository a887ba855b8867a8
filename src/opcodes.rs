//! RV32I base instruction set definitions
//!
//! The opcode, funct3 and funct7 values below follow chapter 19 of
//! the RISC-V unprivileged specification. The instruction table at
//! the bottom of the file is the single data source shared by the
//! encoder, the disassembler and the interpreter's decode step.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const OP_LUI: u32 = 0b0110111;
pub const OP_AUIPC: u32 = 0b0010111;
pub const OP_JAL: u32 = 0b1101111;
pub const OP_JALR: u32 = 0b1100111;
pub const OP_BRANCH: u32 = 0b1100011;
pub const OP_LOAD: u32 = 0b0000011;
pub const OP_STORE: u32 = 0b0100011;
pub const OP_IMM: u32 = 0b0010011;
pub const OP: u32 = 0b0110011;

// Conditional branches
pub const FUNCT3_BEQ: u32 = 0b000;
pub const FUNCT3_BNE: u32 = 0b001;
pub const FUNCT3_BLT: u32 = 0b100;
pub const FUNCT3_BGE: u32 = 0b101;
pub const FUNCT3_BLTU: u32 = 0b110;
pub const FUNCT3_BGEU: u32 = 0b111;

// Load and store widths
pub const FUNCT3_B: u32 = 0b000;
pub const FUNCT3_H: u32 = 0b001;
pub const FUNCT3_W: u32 = 0b010;
pub const FUNCT3_BU: u32 = 0b100;
pub const FUNCT3_HU: u32 = 0b101;

// Register-immediate and register-register operations share this set
pub const FUNCT3_ADD_SUB: u32 = 0b000;
pub const FUNCT3_SLL: u32 = 0b001;
pub const FUNCT3_SLT: u32 = 0b010;
pub const FUNCT3_SLTU: u32 = 0b011;
pub const FUNCT3_XOR: u32 = 0b100;
pub const FUNCT3_SRL_SRA: u32 = 0b101;
pub const FUNCT3_OR: u32 = 0b110;
pub const FUNCT3_AND: u32 = 0b111;

pub const FUNCT7_BASE: u32 = 0b0000000;
pub const FUNCT7_SUB: u32 = 0b0100000;
pub const FUNCT7_SRA: u32 = 0b0100000;

// Immediate value limits per encoding format. B- and J-type
// displacements must also be even.
pub const IMM_I_MIN: i64 = -2048;
pub const IMM_I_MAX: i64 = 2047;
pub const IMM_S_MIN: i64 = -2048;
pub const IMM_S_MAX: i64 = 2047;
pub const IMM_B_MIN: i64 = -4096;
pub const IMM_B_MAX: i64 = 4094;
pub const IMM_U_MIN: i64 = 0;
pub const IMM_U_MAX: i64 = (1 << 20) - 1;
pub const IMM_J_MIN: i64 = -1048576;
pub const IMM_J_MAX: i64 = 1048574;

/// ABI names for the registers x0-x31, in index order
pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1",
    "a2", "a3", "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

/// ABI name of the register xn
pub fn abi_name(n: u8) -> &'static str {
    ABI_NAMES[usize::from(n & 0x1f)]
}

/// Convert a register name to its index. Accepts ABI names, the
/// frame-pointer alias fp (a second name for s0), and the plain
/// x0-x31 forms.
pub fn reg_index(name: &str) -> Option<u8> {
    if let Some(index) = ABI_NAMES.iter().position(|&abi| abi == name) {
        return Some(index as u8);
    }
    if name == "fp" {
        return Some(8);
    }
    let digits = name.strip_prefix('x')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u8>() {
        Ok(n) if n < 32 => Some(n),
        _ => None,
    }
}

/// The 37 instructions of the RV32I base integer instruction set
///
/// Pseudo-instructions are not members; the assembler rewrites them
/// into these before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Lui,
    Auipc,
    Jal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
}

impl Mnemonic {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lui => "lui",
            Self::Auipc => "auipc",
            Self::Jal => "jal",
            Self::Jalr => "jalr",
            Self::Beq => "beq",
            Self::Bne => "bne",
            Self::Blt => "blt",
            Self::Bge => "bge",
            Self::Bltu => "bltu",
            Self::Bgeu => "bgeu",
            Self::Lb => "lb",
            Self::Lh => "lh",
            Self::Lw => "lw",
            Self::Lbu => "lbu",
            Self::Lhu => "lhu",
            Self::Sb => "sb",
            Self::Sh => "sh",
            Self::Sw => "sw",
            Self::Addi => "addi",
            Self::Slti => "slti",
            Self::Sltiu => "sltiu",
            Self::Xori => "xori",
            Self::Ori => "ori",
            Self::Andi => "andi",
            Self::Slli => "slli",
            Self::Srli => "srli",
            Self::Srai => "srai",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Sll => "sll",
            Self::Slt => "slt",
            Self::Sltu => "sltu",
            Self::Xor => "xor",
            Self::Srl => "srl",
            Self::Sra => "sra",
            Self::Or => "or",
            Self::And => "and",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("'{0}' is not an RV32I instruction")]
pub struct UnknownMnemonic(pub String);

impl FromStr for Mnemonic {
    type Err = UnknownMnemonic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mnemonic = match s {
            "lui" => Self::Lui,
            "auipc" => Self::Auipc,
            "jal" => Self::Jal,
            "jalr" => Self::Jalr,
            "beq" => Self::Beq,
            "bne" => Self::Bne,
            "blt" => Self::Blt,
            "bge" => Self::Bge,
            "bltu" => Self::Bltu,
            "bgeu" => Self::Bgeu,
            "lb" => Self::Lb,
            "lh" => Self::Lh,
            "lw" => Self::Lw,
            "lbu" => Self::Lbu,
            "lhu" => Self::Lhu,
            "sb" => Self::Sb,
            "sh" => Self::Sh,
            "sw" => Self::Sw,
            "addi" => Self::Addi,
            "slti" => Self::Slti,
            "sltiu" => Self::Sltiu,
            "xori" => Self::Xori,
            "ori" => Self::Ori,
            "andi" => Self::Andi,
            "slli" => Self::Slli,
            "srli" => Self::Srli,
            "srai" => Self::Srai,
            "add" => Self::Add,
            "sub" => Self::Sub,
            "sll" => Self::Sll,
            "slt" => Self::Slt,
            "sltu" => Self::Sltu,
            "xor" => Self::Xor,
            "srl" => Self::Srl,
            "sra" => Self::Sra,
            "or" => Self::Or,
            "and" => Self::And,
            _ => return Err(UnknownMnemonic(s.to_string())),
        };
        Ok(mnemonic)
    }
}

/// The six RV32I encoding formats, plus the I-format specialisation
/// for the shift-by-immediate instructions (5-bit shamt in the low
/// immediate bits, funct7 0100000 marking the arithmetic shift).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrFormat {
    R,
    I,
    Ishamt,
    S,
    B,
    U,
    J,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrSpec {
    pub mnemonic: Mnemonic,
    pub format: InstrFormat,
    pub opcode: u32,
    pub funct3: u32,
    pub funct7: u32,
}

const fn spec(
    mnemonic: Mnemonic,
    format: InstrFormat,
    opcode: u32,
    funct3: u32,
    funct7: u32,
) -> InstrSpec {
    InstrSpec {
        mnemonic,
        format,
        opcode,
        funct3,
        funct7,
    }
}

/// One row per RV32I base instruction. funct3 is meaningful for every
/// format except U and J; funct7 only for R and Ishamt.
pub static INSTR_TABLE: [InstrSpec; 37] = [
    spec(Mnemonic::Lui, InstrFormat::U, OP_LUI, 0, 0),
    spec(Mnemonic::Auipc, InstrFormat::U, OP_AUIPC, 0, 0),
    spec(Mnemonic::Jal, InstrFormat::J, OP_JAL, 0, 0),
    spec(Mnemonic::Jalr, InstrFormat::I, OP_JALR, FUNCT3_ADD_SUB, 0),
    spec(Mnemonic::Beq, InstrFormat::B, OP_BRANCH, FUNCT3_BEQ, 0),
    spec(Mnemonic::Bne, InstrFormat::B, OP_BRANCH, FUNCT3_BNE, 0),
    spec(Mnemonic::Blt, InstrFormat::B, OP_BRANCH, FUNCT3_BLT, 0),
    spec(Mnemonic::Bge, InstrFormat::B, OP_BRANCH, FUNCT3_BGE, 0),
    spec(Mnemonic::Bltu, InstrFormat::B, OP_BRANCH, FUNCT3_BLTU, 0),
    spec(Mnemonic::Bgeu, InstrFormat::B, OP_BRANCH, FUNCT3_BGEU, 0),
    spec(Mnemonic::Lb, InstrFormat::I, OP_LOAD, FUNCT3_B, 0),
    spec(Mnemonic::Lh, InstrFormat::I, OP_LOAD, FUNCT3_H, 0),
    spec(Mnemonic::Lw, InstrFormat::I, OP_LOAD, FUNCT3_W, 0),
    spec(Mnemonic::Lbu, InstrFormat::I, OP_LOAD, FUNCT3_BU, 0),
    spec(Mnemonic::Lhu, InstrFormat::I, OP_LOAD, FUNCT3_HU, 0),
    spec(Mnemonic::Sb, InstrFormat::S, OP_STORE, FUNCT3_B, 0),
    spec(Mnemonic::Sh, InstrFormat::S, OP_STORE, FUNCT3_H, 0),
    spec(Mnemonic::Sw, InstrFormat::S, OP_STORE, FUNCT3_W, 0),
    spec(Mnemonic::Addi, InstrFormat::I, OP_IMM, FUNCT3_ADD_SUB, 0),
    spec(Mnemonic::Slti, InstrFormat::I, OP_IMM, FUNCT3_SLT, 0),
    spec(Mnemonic::Sltiu, InstrFormat::I, OP_IMM, FUNCT3_SLTU, 0),
    spec(Mnemonic::Xori, InstrFormat::I, OP_IMM, FUNCT3_XOR, 0),
    spec(Mnemonic::Ori, InstrFormat::I, OP_IMM, FUNCT3_OR, 0),
    spec(Mnemonic::Andi, InstrFormat::I, OP_IMM, FUNCT3_AND, 0),
    spec(Mnemonic::Slli, InstrFormat::Ishamt, OP_IMM, FUNCT3_SLL, FUNCT7_BASE),
    spec(Mnemonic::Srli, InstrFormat::Ishamt, OP_IMM, FUNCT3_SRL_SRA, FUNCT7_BASE),
    spec(Mnemonic::Srai, InstrFormat::Ishamt, OP_IMM, FUNCT3_SRL_SRA, FUNCT7_SRA),
    spec(Mnemonic::Add, InstrFormat::R, OP, FUNCT3_ADD_SUB, FUNCT7_BASE),
    spec(Mnemonic::Sub, InstrFormat::R, OP, FUNCT3_ADD_SUB, FUNCT7_SUB),
    spec(Mnemonic::Sll, InstrFormat::R, OP, FUNCT3_SLL, FUNCT7_BASE),
    spec(Mnemonic::Slt, InstrFormat::R, OP, FUNCT3_SLT, FUNCT7_BASE),
    spec(Mnemonic::Sltu, InstrFormat::R, OP, FUNCT3_SLTU, FUNCT7_BASE),
    spec(Mnemonic::Xor, InstrFormat::R, OP, FUNCT3_XOR, FUNCT7_BASE),
    spec(Mnemonic::Srl, InstrFormat::R, OP, FUNCT3_SRL_SRA, FUNCT7_BASE),
    spec(Mnemonic::Sra, InstrFormat::R, OP, FUNCT3_SRL_SRA, FUNCT7_SRA),
    spec(Mnemonic::Or, InstrFormat::R, OP, FUNCT3_OR, FUNCT7_BASE),
    spec(Mnemonic::And, InstrFormat::R, OP, FUNCT3_AND, FUNCT7_BASE),
];

/// The table entry for a mnemonic
pub fn spec_for(mnemonic: Mnemonic) -> &'static InstrSpec {
    INSTR_TABLE
        .iter()
        .find(|spec| spec.mnemonic == mnemonic)
        .expect("every mnemonic has a table entry")
}

/// Find the table entry matching decoded fields, or None if the word
/// does not correspond to an RV32I instruction. How much of the word
/// takes part in the comparison depends on the format: U and J are
/// identified by opcode alone, R and the shift-by-immediate forms
/// need funct7 as well, everything else needs funct3.
pub fn spec_for_fields(opcode: u32, funct3: u32, funct7: u32) -> Option<&'static InstrSpec> {
    INSTR_TABLE.iter().find(|spec| {
        if spec.opcode != opcode {
            return false;
        }
        match spec.format {
            InstrFormat::U | InstrFormat::J => true,
            InstrFormat::R | InstrFormat::Ishamt => {
                spec.funct3 == funct3 && spec.funct7 == funct7
            }
            _ => spec.funct3 == funct3,
        }
    })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_abi_names() {
        assert_eq!(abi_name(0), "zero");
        assert_eq!(abi_name(2), "sp");
        assert_eq!(abi_name(8), "s0");
        assert_eq!(abi_name(10), "a0");
        assert_eq!(abi_name(31), "t6");
    }

    #[test]
    fn check_reg_index_abi() {
        assert_eq!(reg_index("zero"), Some(0));
        assert_eq!(reg_index("ra"), Some(1));
        assert_eq!(reg_index("t0"), Some(5));
        assert_eq!(reg_index("s11"), Some(27));
        assert_eq!(reg_index("t6"), Some(31));
    }

    #[test]
    fn check_reg_index_fp_alias() {
        assert_eq!(reg_index("fp"), Some(8));
        assert_eq!(reg_index("s0"), Some(8));
    }

    #[test]
    fn check_reg_index_x_form() {
        assert_eq!(reg_index("x0"), Some(0));
        assert_eq!(reg_index("x31"), Some(31));
        assert_eq!(reg_index("x32"), None);
        assert_eq!(reg_index("x"), None);
        assert_eq!(reg_index("x-1"), None);
        assert_eq!(reg_index("y3"), None);
    }

    #[test]
    fn check_mnemonic_round_trip() {
        for spec in &INSTR_TABLE {
            let parsed: Mnemonic = spec.mnemonic.name().parse().unwrap();
            assert_eq!(parsed, spec.mnemonic);
        }
        assert!("li".parse::<Mnemonic>().is_err());
        assert!("mul".parse::<Mnemonic>().is_err());
    }

    #[test]
    fn check_field_lookup() {
        let spec = spec_for_fields(OP, FUNCT3_ADD_SUB, FUNCT7_SUB).unwrap();
        assert_eq!(spec.mnemonic, Mnemonic::Sub);
        let spec = spec_for_fields(OP_IMM, FUNCT3_SRL_SRA, FUNCT7_SRA).unwrap();
        assert_eq!(spec.mnemonic, Mnemonic::Srai);
        // addi is identified without consulting funct7
        let spec = spec_for_fields(OP_IMM, FUNCT3_ADD_SUB, 0x7f).unwrap();
        assert_eq!(spec.mnemonic, Mnemonic::Addi);
        assert!(spec_for_fields(0, 0, 0).is_none());
    }
}
