//! Textual disassembly
//!
//! Renders a machine word as the canonical assembly line, using ABI
//! register names. Branch and jal targets are shown as the absolute
//! hex address computed from the word's own address, which is why
//! disassembly is a function of (word, address) and not the word
//! alone.

use crate::fields;
use crate::opcodes::{self, abi_name, InstrFormat, Mnemonic};

/// Disassemble the machine word stored at addr
pub fn disassemble(instr: u32, addr: u32) -> String {
    let opcode = fields::opcode(instr);
    let funct3 = fields::funct3(instr);
    let funct7 = fields::funct7(instr);
    let Some(spec) = opcodes::spec_for_fields(opcode, funct3, funct7) else {
        return format!("; unknown (0x{instr:08x})");
    };

    let name = spec.mnemonic;
    let rd = abi_name(fields::rd(instr));
    let rs1 = abi_name(fields::rs1(instr));
    let rs2 = abi_name(fields::rs2(instr));
    match spec.format {
        InstrFormat::R => format!("{name} {rd}, {rs1}, {rs2}"),
        InstrFormat::Ishamt => {
            format!("{name} {rd}, {rs1}, {}", fields::shamt(instr))
        }
        InstrFormat::I => {
            let imm = fields::imm_itype(instr);
            if spec.opcode == opcodes::OP_LOAD || spec.mnemonic == Mnemonic::Jalr {
                format!("{name} {rd}, {imm}({rs1})")
            } else {
                format!("{name} {rd}, {rs1}, {imm}")
            }
        }
        InstrFormat::S => {
            format!("{name} {rs2}, {}({rs1})", fields::imm_stype(instr))
        }
        InstrFormat::B => {
            let target = addr.wrapping_add(fields::imm_btype(instr) as u32);
            format!("{name} {rs1}, {rs2}, 0x{target:x}")
        }
        InstrFormat::U => format!("{name} {rd}, {}", fields::imm_utype(instr)),
        InstrFormat::J => {
            let target = addr.wrapping_add(fields::imm_jtype(instr) as u32);
            format!("{name} {rd}, 0x{target:x}")
        }
    }
}
