//! Two-pass RV32I assembler
//!
//! Pass 1 walks the source assigning a byte address to every
//! instruction and recording label addresses; pass 2 expands
//! pseudo-instructions and encodes each line into a machine word.
//! Two passes are needed because a branch may name a label that is
//! only defined further down the file.
//!
//! The surface is deliberately small: `#` starts a comment, commas
//! and whitespace separate tokens, everything is case-insensitive,
//! and a label is an identifier ending in `:` on its own line.

use std::collections::HashMap;
use std::str::FromStr;

use log::debug;
use thiserror::Error;

use crate::encode::{
    encode_b, encode_i, encode_j, encode_s, encode_shamt, encode_u, rtype,
    EncodeError,
};
use crate::opcodes::{
    reg_index, spec_for, InstrFormat, Mnemonic, IMM_I_MAX, IMM_I_MIN, OP_LOAD,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: usize, mnemonic: String },
    #[error("line {line}: {mnemonic} expects {expected} operands, found {found}")]
    WrongOperandCount {
        line: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: unknown register name '{name}'")]
    UnknownRegister { line: usize, name: String },
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
    #[error("line {line}: malformed immediate '{token}'")]
    MalformedImmediate { line: usize, token: String },
    #[error("line {line}: malformed memory operand '{operand}' (expected offset(reg))")]
    MalformedMemoryOperand { line: usize, operand: String },
    #[error("line {line}: {source}")]
    Encode { line: usize, source: EncodeError },
}

/// The assembled program as one owned bundle
///
/// machine_code is the ordered word list; source_map takes a byte
/// address back to the source line it came from (both words of a
/// two-word li map to the same line); expansion_log records every
/// pseudo-instruction rewrite in a human-readable form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    pub machine_code: Vec<u32>,
    pub source_map: HashMap<u32, String>,
    pub expansion_log: Vec<String>,
}

/// Strip the comment and surrounding whitespace, lowercase the rest
fn clean_line(line: &str) -> String {
    let without_comment = &line[0..line.find('#').unwrap_or(line.len())];
    without_comment.trim().to_lowercase()
}

fn tokenize(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Parse a decimal, 0x-hex or 0b-binary integer with an optional
/// leading minus. i64 so that u32-sized constants like 0xdeadbeef
/// survive; the encoders range-check per format.
fn parse_int(token: &str) -> Option<i64> {
    let (negative, magnitude) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = magnitude.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = magnitude.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        magnitude.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Format an upper-20 lui operand for the expansion log
fn hex_imm(value: i64) -> String {
    format!("0x{value:x}")
}

/// Bytes of machine code this source line will occupy. Only the
/// large form of li emits two words; everything else emits one.
fn instruction_size(line: &str) -> u32 {
    let tokens = tokenize(line);
    if tokens.first() == Some(&"li") && tokens.len() >= 3 {
        if let Some(imm) = parse_int(tokens[2]) {
            if imm < IMM_I_MIN || imm > IMM_I_MAX {
                return 8;
            }
        }
    }
    4
}

fn expect_operands(
    line: usize,
    mnemonic: &str,
    args: &[String],
    expected: usize,
) -> Result<(), AsmError> {
    if args.len() != expected {
        Err(AsmError::WrongOperandCount {
            line,
            mnemonic: mnemonic.to_string(),
            expected,
            found: args.len(),
        })
    } else {
        Ok(())
    }
}

fn parse_reg(line: usize, token: &str) -> Result<u8, AsmError> {
    reg_index(token).ok_or_else(|| AsmError::UnknownRegister {
        line,
        name: token.to_string(),
    })
}

fn parse_imm(line: usize, token: &str) -> Result<i64, AsmError> {
    parse_int(token).ok_or_else(|| AsmError::MalformedImmediate {
        line,
        token: token.to_string(),
    })
}

/// Split an offset(reg) memory operand
fn parse_mem_operand(line: usize, operand: &str) -> Result<(i64, u8), AsmError> {
    let malformed = || AsmError::MalformedMemoryOperand {
        line,
        operand: operand.to_string(),
    };
    let (offset_str, rest) = operand.split_once('(').ok_or_else(malformed)?;
    let reg_str = rest.strip_suffix(')').ok_or_else(malformed)?;
    let offset = parse_int(offset_str).ok_or_else(malformed)?;
    let reg = parse_reg(line, reg_str)?;
    Ok((offset, reg))
}

/// Rewrite a pseudo-instruction into its real form(s), appending a
/// log entry for each rewrite. Real instructions pass through as a
/// single (mnemonic, operands) pair.
fn expand_pseudo(
    line_num: usize,
    line: &str,
    log: &mut Vec<String>,
) -> Result<Vec<(Mnemonic, Vec<String>)>, AsmError> {
    let tokens = tokenize(line);
    let op = tokens[0];
    let args: Vec<String> = tokens[1..].iter().map(|t| t.to_string()).collect();
    match op {
        "j" => {
            expect_operands(line_num, op, &args, 1)?;
            log.push(format!("L{line_num}: `{line}` -> `jal zero, {}`", args[0]));
            Ok(vec![(Mnemonic::Jal, vec!["zero".to_string(), args[0].clone()])])
        }
        "mv" => {
            expect_operands(line_num, op, &args, 2)?;
            log.push(format!(
                "L{line_num}: `{line}` -> `addi {}, {}, 0`",
                args[0], args[1]
            ));
            Ok(vec![(
                Mnemonic::Addi,
                vec![args[0].clone(), args[1].clone(), "0".to_string()],
            )])
        }
        "nop" => {
            expect_operands(line_num, op, &args, 0)?;
            log.push(format!("L{line_num}: `{line}` -> `addi zero, zero, 0`"));
            Ok(vec![(
                Mnemonic::Addi,
                vec!["zero".to_string(), "zero".to_string(), "0".to_string()],
            )])
        }
        "ret" => {
            expect_operands(line_num, op, &args, 0)?;
            log.push(format!("L{line_num}: `{line}` -> `jalr zero, ra, 0`"));
            Ok(vec![(
                Mnemonic::Jalr,
                vec!["zero".to_string(), "ra".to_string(), "0".to_string()],
            )])
        }
        "li" => expand_li(line_num, line, &args, log),
        _ => {
            let mnemonic = Mnemonic::from_str(op).map_err(|_| {
                AsmError::UnknownMnemonic {
                    line: line_num,
                    mnemonic: op.to_string(),
                }
            })?;
            Ok(vec![(mnemonic, args)])
        }
    }
}

/// li loads a constant. A value in the I-range becomes a single
/// addi from zero; anything wider becomes lui + addi, where the
/// +0x800 rounding compensates for the sign-extension the addi
/// applies to its low half.
fn expand_li(
    line_num: usize,
    line: &str,
    args: &[String],
    log: &mut Vec<String>,
) -> Result<Vec<(Mnemonic, Vec<String>)>, AsmError> {
    expect_operands(line_num, "li", args, 2)?;
    let rd = args[0].clone();
    let imm = parse_imm(line_num, &args[1])?;
    if (IMM_I_MIN..=IMM_I_MAX).contains(&imm) {
        log.push(format!("L{line_num}: `{line}` -> `addi {rd}, zero, {imm}`"));
        Ok(vec![(
            Mnemonic::Addi,
            vec![rd, "zero".to_string(), imm.to_string()],
        )])
    } else {
        let upper = (imm + 0x800) >> 12;
        let lower = imm - (upper << 12);
        // Wrap the upper part into the 20-bit field so negative
        // constants assemble; lui only ever sees the bit pattern.
        let upper_field = (upper as u64) & 0xfffff;
        log.push(format!(
            "L{line_num}: `{line}` -> `lui {rd}, {}`; `addi {rd}, {rd}, {lower}`",
            hex_imm(upper_field as i64)
        ));
        Ok(vec![
            (Mnemonic::Lui, vec![rd.clone(), upper_field.to_string()]),
            (Mnemonic::Addi, vec![rd.clone(), rd, lower.to_string()]),
        ])
    }
}

/// Resolve a branch or jump target to a pc-relative displacement: a
/// known label, or a numeric absolute address (which is what the
/// disassembler prints, so its output re-assembles).
fn branch_offset(
    line: usize,
    symbol_table: &HashMap<String, u32>,
    address: u32,
    token: &str,
) -> Result<i64, AsmError> {
    if let Some(&target) = symbol_table.get(token) {
        return Ok(i64::from(target) - i64::from(address));
    }
    if let Some(target) = parse_int(token) {
        return Ok(target - i64::from(address));
    }
    Err(AsmError::UndefinedLabel {
        line,
        label: token.to_string(),
    })
}

/// Encode one post-expansion instruction at the given address
fn encode_line(
    line_num: usize,
    symbol_table: &HashMap<String, u32>,
    address: u32,
    mnemonic: Mnemonic,
    args: &[String],
) -> Result<u32, AsmError> {
    let spec = spec_for(mnemonic);
    let name = mnemonic.name();
    let wrap = |source: EncodeError| AsmError::Encode {
        line: line_num,
        source,
    };
    match spec.format {
        InstrFormat::R => {
            expect_operands(line_num, name, args, 3)?;
            let rd = parse_reg(line_num, &args[0])?;
            let rs1 = parse_reg(line_num, &args[1])?;
            let rs2 = parse_reg(line_num, &args[2])?;
            Ok(rtype(spec.funct7, rs2, rs1, spec.funct3, rd, spec.opcode))
        }
        InstrFormat::Ishamt => {
            expect_operands(line_num, name, args, 3)?;
            let rd = parse_reg(line_num, &args[0])?;
            let rs1 = parse_reg(line_num, &args[1])?;
            let shamt = parse_imm(line_num, &args[2])?;
            encode_shamt(name, shamt, rs1, spec.funct3, spec.funct7, rd).map_err(wrap)
        }
        InstrFormat::I => {
            // Loads take rd, offset(rs1); jalr accepts that form too
            // (it is what the disassembler prints) as well as the
            // three-operand rd, rs1, imm form.
            let mem_form = spec.opcode == OP_LOAD
                || (mnemonic == Mnemonic::Jalr
                    && args.len() == 2
                    && args[1].contains('('));
            if mem_form {
                expect_operands(line_num, name, args, 2)?;
                let rd = parse_reg(line_num, &args[0])?;
                let (imm, rs1) = parse_mem_operand(line_num, &args[1])?;
                encode_i(name, imm, rs1, spec.funct3, rd, spec.opcode).map_err(wrap)
            } else {
                expect_operands(line_num, name, args, 3)?;
                let rd = parse_reg(line_num, &args[0])?;
                let rs1 = parse_reg(line_num, &args[1])?;
                let imm = parse_imm(line_num, &args[2])?;
                encode_i(name, imm, rs1, spec.funct3, rd, spec.opcode).map_err(wrap)
            }
        }
        InstrFormat::S => {
            expect_operands(line_num, name, args, 2)?;
            let rs2 = parse_reg(line_num, &args[0])?;
            let (imm, rs1) = parse_mem_operand(line_num, &args[1])?;
            encode_s(name, imm, rs2, rs1, spec.funct3, spec.opcode).map_err(wrap)
        }
        InstrFormat::B => {
            expect_operands(line_num, name, args, 3)?;
            let rs1 = parse_reg(line_num, &args[0])?;
            let rs2 = parse_reg(line_num, &args[1])?;
            let offset = branch_offset(line_num, symbol_table, address, &args[2])?;
            encode_b(name, offset, rs2, rs1, spec.funct3, spec.opcode).map_err(wrap)
        }
        InstrFormat::U => {
            expect_operands(line_num, name, args, 2)?;
            let rd = parse_reg(line_num, &args[0])?;
            let imm = parse_imm(line_num, &args[1])?;
            encode_u(name, imm, rd, spec.opcode).map_err(wrap)
        }
        InstrFormat::J => {
            expect_operands(line_num, name, args, 2)?;
            let rd = parse_reg(line_num, &args[0])?;
            let offset = branch_offset(line_num, symbol_table, address, &args[1])?;
            encode_j(name, offset, rd).map_err(wrap)
        }
    }
}

/// Assemble a source text into a ProgramImage
pub fn parse_assembly(text: &str) -> Result<ProgramImage, AsmError> {
    let lines: Vec<String> = text.lines().map(clean_line).collect();

    // Pass 1: assign addresses, collect label definitions
    let mut symbol_table: HashMap<String, u32> = HashMap::new();
    let mut address: u32 = 0;
    for line in &lines {
        if line.is_empty() {
            continue;
        }
        if let Some(label) = line.strip_suffix(':') {
            symbol_table.insert(label.to_string(), address);
        } else {
            address += instruction_size(line);
        }
    }
    debug!(
        "pass 1: {} label(s), program ends at byte {address}",
        symbol_table.len()
    );

    // Pass 2: expand and encode
    let mut image = ProgramImage::default();
    let mut address: u32 = 0;
    for (index, line) in lines.iter().enumerate() {
        let line_num = index + 1;
        if line.is_empty() || line.ends_with(':') {
            continue;
        }
        let expanded = expand_pseudo(line_num, line, &mut image.expansion_log)?;
        for (mnemonic, args) in &expanded {
            let word = encode_line(line_num, &symbol_table, address, *mnemonic, args)?;
            image.machine_code.push(word);
            image.source_map.insert(address, line.clone());
            address += 4;
        }
    }
    debug!("pass 2: emitted {} word(s)", image.machine_code.len());
    Ok(image)
}
