//! RV32I hardware thread
//!
//! The simplest possible execution environment: a single hart with a
//! register file, a program counter, a cycle counter and a flat
//! little-endian byte memory that holds instructions and data with
//! no segmentation. Programs are loaded as a word list starting at
//! address 0, and a backup of that list is kept so reset() can
//! restore the initial memory image.
//!
//! The member function step() controls execution. Each call fetches
//! the word at the current pc, executes it, and returns whether
//! execution can continue. Halting is an ordinary outcome, not an
//! error: a pc outside memory, a misaligned pc, or a fetched zero
//! word (the end-of-program sentinel) all make step() return false
//! without changing any state.

use log::debug;

use crate::fields;
use crate::opcodes::{
    FUNCT3_ADD_SUB, FUNCT3_AND, FUNCT3_B, FUNCT3_BEQ, FUNCT3_BGE, FUNCT3_BGEU,
    FUNCT3_BLT, FUNCT3_BLTU, FUNCT3_BNE, FUNCT3_BU, FUNCT3_H, FUNCT3_HU,
    FUNCT3_OR, FUNCT3_SLL, FUNCT3_SLT, FUNCT3_SLTU, FUNCT3_SRL_SRA, FUNCT3_W,
    FUNCT3_XOR, FUNCT7_SRA, FUNCT7_SUB, OP, OP_AUIPC, OP_BRANCH, OP_IMM,
    OP_JAL, OP_JALR, OP_LOAD, OP_LUI, OP_STORE,
};
use crate::utils::sign_extend;

pub const DEFAULT_MEM_SIZE: usize = 4096;
pub const DEFAULT_MAX_CYCLES: u64 = 5000;

#[derive(Debug)]
pub struct Hart {
    pc: u32,
    cycles: u64,
    registers: [u32; 32],
    memory: Vec<u8>,
    program: Vec<u32>,
}

impl Default for Hart {
    fn default() -> Self {
        Self::new()
    }
}

impl Hart {
    pub fn new() -> Self {
        Self::with_memory_size(DEFAULT_MEM_SIZE)
    }

    pub fn with_memory_size(mem_size: usize) -> Self {
        Self {
            pc: 0,
            cycles: 0,
            registers: [0; 32],
            memory: vec![0; mem_size],
            program: Vec::new(),
        }
    }

    /// Load machine words into memory starting at address 0, keeping
    /// a backup of the word list so reset() can restore it. Words
    /// beyond the end of memory are dropped.
    pub fn load_program(&mut self, machine_code: &[u32]) {
        self.program = machine_code.to_vec();
        self.write_program_image();
        debug!(
            "loaded {} word(s) into {} bytes of memory",
            self.program.len(),
            self.memory.len()
        );
    }

    /// Zero the registers, pc and cycle counter, and rewrite memory
    /// from the backup of the last loaded program. The memory buffer
    /// itself is reused, not reallocated.
    pub fn reset(&mut self) {
        self.registers = [0; 32];
        self.pc = 0;
        self.cycles = 0;
        self.write_program_image();
    }

    fn write_program_image(&mut self) {
        self.memory.fill(0);
        let capacity = self.memory.len() / 4;
        for (index, word) in self.program.iter().enumerate().take(capacity) {
            self.memory[4 * index..4 * index + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    /// The value of the register xn
    pub fn x(&self, n: u8) -> u32 {
        self.registers[usize::from(n & 0x1f)]
    }

    fn set_x(&mut self, n: u8, value: u32) {
        if n != 0 {
            self.registers[usize::from(n & 0x1f)] = value;
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn registers(&self) -> &[u32; 32] {
        &self.registers
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Fetch, execute and retire one instruction. Returns false if
    /// execution has halted: pc outside memory, pc misaligned, or a
    /// zero word at pc (the end-of-program sentinel).
    pub fn step(&mut self) -> bool {
        let pc = self.pc as usize;
        if pc % 4 != 0 || pc + 4 > self.memory.len() {
            return false;
        }
        let instr = u32::from_le_bytes(
            self.memory[pc..pc + 4]
                .try_into()
                .expect("slice is four bytes long"),
        );
        if instr == 0 {
            return false;
        }

        let next_pc = self.execute(instr);

        // x0 is hard-wired to zero: any write this cycle is undone
        // before the next fetch.
        self.registers[0] = 0;
        self.pc = next_pc;
        self.cycles += 1;
        true
    }

    /// Repeatedly step until the program halts or max_cycles steps
    /// have been taken since this call began. The bound keeps an
    /// accidental infinite loop from hanging the caller; it is not
    /// part of the machine model.
    pub fn run(&mut self, max_cycles: u64) {
        let start_cycles = self.cycles;
        while self.cycles - start_cycles < max_cycles {
            if !self.step() {
                break;
            }
        }
    }

    /// Execute one instruction word and return the next pc. A word
    /// whose opcode is not part of RV32I retires as a no-op.
    fn execute(&mut self, instr: u32) -> u32 {
        match fields::opcode(instr) {
            OP_LUI => self.execute_lui(instr),
            OP_AUIPC => self.execute_auipc(instr),
            OP_JAL => self.execute_jal(instr),
            OP_JALR => self.execute_jalr(instr),
            OP_BRANCH => self.execute_branch(instr),
            OP_LOAD => self.execute_load(instr),
            OP_STORE => self.execute_store(instr),
            OP_IMM => self.execute_reg_imm(instr),
            OP => self.execute_reg_reg(instr),
            _ => self.pc.wrapping_add(4),
        }
    }

    /// Load the upper-20 immediate into the top of rd, zeroing the
    /// low 12 bits
    fn execute_lui(&mut self, instr: u32) -> u32 {
        self.set_x(fields::rd(instr), instr & 0xffff_f000);
        self.pc.wrapping_add(4)
    }

    /// Like lui, but the shifted immediate is added to the pc first
    fn execute_auipc(&mut self, instr: u32) -> u32 {
        let value = self.pc.wrapping_add(instr & 0xffff_f000);
        self.set_x(fields::rd(instr), value);
        self.pc.wrapping_add(4)
    }

    fn execute_jal(&mut self, instr: u32) -> u32 {
        self.set_x(fields::rd(instr), self.pc.wrapping_add(4));
        self.pc.wrapping_add(fields::imm_jtype(instr) as u32)
    }

    /// Jump to rs1 + imm with the least significant bit cleared,
    /// leaving the return address in rd
    fn execute_jalr(&mut self, instr: u32) -> u32 {
        self.set_x(fields::rd(instr), self.pc.wrapping_add(4));
        let base = self.x(fields::rs1(instr));
        let target = base.wrapping_add(fields::imm_itype(instr) as u32);
        target & 0xffff_fffe
    }

    fn execute_branch(&mut self, instr: u32) -> u32 {
        let src1 = self.x(fields::rs1(instr));
        let src2 = self.x(fields::rs2(instr));
        let taken = match fields::funct3(instr) {
            FUNCT3_BEQ => src1 == src2,
            FUNCT3_BNE => src1 != src2,
            FUNCT3_BLT => (src1 as i32) < (src2 as i32),
            FUNCT3_BGE => (src1 as i32) >= (src2 as i32),
            FUNCT3_BLTU => src1 < src2,
            FUNCT3_BGEU => src1 >= src2,
            _ => false,
        };
        if taken {
            self.pc.wrapping_add(fields::imm_btype(instr) as u32)
        } else {
            self.pc.wrapping_add(4)
        }
    }

    /// Loads narrower than a word sign- or zero-extend per the
    /// mnemonic. An access that does not fit inside memory is
    /// skipped: rd keeps its value and execution carries on.
    fn execute_load(&mut self, instr: u32) -> u32 {
        let base = self.x(fields::rs1(instr));
        let addr = base.wrapping_add(fields::imm_itype(instr) as u32);
        let rd = fields::rd(instr);
        match fields::funct3(instr) {
            FUNCT3_B => {
                if let Some(value) = self.load_bytes(addr, 1) {
                    self.set_x(rd, sign_extend(value, 7));
                }
            }
            FUNCT3_H => {
                if let Some(value) = self.load_bytes(addr, 2) {
                    self.set_x(rd, sign_extend(value, 15));
                }
            }
            FUNCT3_W => {
                if let Some(value) = self.load_bytes(addr, 4) {
                    self.set_x(rd, value);
                }
            }
            FUNCT3_BU => {
                if let Some(value) = self.load_bytes(addr, 1) {
                    self.set_x(rd, value);
                }
            }
            FUNCT3_HU => {
                if let Some(value) = self.load_bytes(addr, 2) {
                    self.set_x(rd, value);
                }
            }
            _ => {}
        }
        self.pc.wrapping_add(4)
    }

    /// Stores write the low 8, 16 or 32 bits of rs2 little-endian.
    /// Out-of-bounds accesses are skipped like loads.
    fn execute_store(&mut self, instr: u32) -> u32 {
        let base = self.x(fields::rs1(instr));
        let addr = base.wrapping_add(fields::imm_stype(instr) as u32);
        let value = self.x(fields::rs2(instr));
        match fields::funct3(instr) {
            FUNCT3_B => self.store_bytes(addr, 1, value),
            FUNCT3_H => self.store_bytes(addr, 2, value),
            FUNCT3_W => self.store_bytes(addr, 4, value),
            _ => {}
        }
        self.pc.wrapping_add(4)
    }

    fn execute_reg_imm(&mut self, instr: u32) -> u32 {
        let src = self.x(fields::rs1(instr));
        let imm = fields::imm_itype(instr) as u32;
        let shamt = fields::shamt(instr);
        let value = match fields::funct3(instr) {
            FUNCT3_ADD_SUB => src.wrapping_add(imm),
            FUNCT3_SLT => u32::from((src as i32) < (imm as i32)),
            FUNCT3_SLTU => u32::from(src < imm),
            FUNCT3_XOR => src ^ imm,
            FUNCT3_OR => src | imm,
            FUNCT3_AND => src & imm,
            FUNCT3_SLL => src << shamt,
            FUNCT3_SRL_SRA => {
                if fields::funct7(instr) == FUNCT7_SRA {
                    ((src as i32) >> shamt) as u32
                } else {
                    src >> shamt
                }
            }
            _ => unreachable!("funct3 is a 3-bit field"),
        };
        self.set_x(fields::rd(instr), value);
        self.pc.wrapping_add(4)
    }

    fn execute_reg_reg(&mut self, instr: u32) -> u32 {
        let src1 = self.x(fields::rs1(instr));
        let src2 = self.x(fields::rs2(instr));
        // Register-form shifts use only the low five bits of rs2
        let shift = src2 & 0x1f;
        let value = match fields::funct3(instr) {
            FUNCT3_ADD_SUB => {
                if fields::funct7(instr) == FUNCT7_SUB {
                    src1.wrapping_sub(src2)
                } else {
                    src1.wrapping_add(src2)
                }
            }
            FUNCT3_SLT => u32::from((src1 as i32) < (src2 as i32)),
            FUNCT3_SLTU => u32::from(src1 < src2),
            FUNCT3_XOR => src1 ^ src2,
            FUNCT3_OR => src1 | src2,
            FUNCT3_AND => src1 & src2,
            FUNCT3_SLL => src1 << shift,
            FUNCT3_SRL_SRA => {
                if fields::funct7(instr) == FUNCT7_SRA {
                    ((src1 as i32) >> shift) as u32
                } else {
                    src1 >> shift
                }
            }
            _ => unreachable!("funct3 is a 3-bit field"),
        };
        self.set_x(fields::rd(instr), value);
        self.pc.wrapping_add(4)
    }

    /// Read width little-endian bytes starting at addr, or None if
    /// the access does not fit entirely inside memory
    fn load_bytes(&self, addr: u32, width: usize) -> Option<u32> {
        let start = addr as usize;
        let end = start.checked_add(width)?;
        if end > self.memory.len() {
            return None;
        }
        let mut value = 0;
        for (i, byte) in self.memory[start..end].iter().enumerate() {
            value |= u32::from(*byte) << (8 * i);
        }
        Some(value)
    }

    fn store_bytes(&mut self, addr: u32, width: usize, value: u32) {
        let start = addr as usize;
        let Some(end) = start.checked_add(width) else {
            return;
        };
        if end > self.memory.len() {
            return;
        }
        for (i, slot) in self.memory[start..end].iter_mut().enumerate() {
            *slot = (value >> (8 * i)) as u8;
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::asm::parse_assembly;

    fn run_program(text: &str) -> Hart {
        let image = parse_assembly(text).unwrap();
        let mut hart = Hart::new();
        hart.load_program(&image.machine_code);
        hart.run(DEFAULT_MAX_CYCLES);
        hart
    }

    #[test]
    fn check_single_addi() {
        let hart = run_program("addi t0, x0, 10");
        assert_eq!(hart.x(5), 10);
        // halted on the zero word after the program
        assert_eq!(hart.pc(), 4);
        assert_eq!(hart.cycles(), 1);
    }

    #[test]
    fn check_li_small_and_large() {
        let hart = run_program("li t0, 0x12345\nli t1, 65536");
        assert_eq!(hart.x(5), 0x12345);
        assert_eq!(hart.x(6), 65536);
        // the first li took two instructions, the second two as well
        assert_eq!(hart.cycles(), 4);
    }

    #[test]
    fn check_rtype_arithmetic() {
        let hart = run_program("li t0, 7\nli t1, 3\nsub t2, t0, t1\nand t3, t0, t1");
        assert_eq!(hart.x(7), 4);
        assert_eq!(hart.x(28), 3);
    }

    #[test]
    fn check_store_then_narrow_loads() {
        let hart = run_program(
            "li s0, 100\nli s1, 0xdeadbeef\nsw s1, 0(s0)\nlb t0, 0(s0)\nlbu t1, 0(s0)",
        );
        // 0xef sign-extends to -17 and zero-extends to 239
        assert_eq!(hart.x(5), 0xffff_ffef);
        assert_eq!(hart.x(6), 239);
    }

    #[test]
    fn check_branch_taken_skips_fallthrough() {
        let hart = run_program(
            "li s0, 10\nli s1, 10\nbeq s0, s1, l\naddi a0, zero, 1\nl:\naddi a0, zero, 42",
        );
        assert_eq!(hart.x(10), 42);
        // the taken branch skips the addi at address 12
        assert_eq!(hart.cycles(), 4);
    }

    #[test]
    fn check_function_call_saves_and_restores() {
        let hart = run_program(
            "\
li sp, 1000
li s0, 50
jal ra, func
j end
func:
addi sp, sp, -4
sw s0, 0(sp)
li s0, 99
li a0, 5
lw s0, 0(sp)
addi sp, sp, 4
ret
end:
nop",
        );
        assert_eq!(hart.x(8), 50, "callee should restore s0");
        assert_eq!(hart.x(10), 5);
        assert_eq!(hart.x(2), 1000, "stack pointer should be balanced");
    }

    #[test]
    fn check_x0_is_never_written() {
        let hart = run_program("addi zero, zero, 5\nadd x0, x0, x0\nli t0, 3");
        assert_eq!(hart.x(0), 0);
        assert_eq!(hart.x(5), 3);
    }

    #[test]
    fn check_add_wraps_modulo_32_bits() {
        let hart = run_program("li t0, -1\nli t1, 5\nadd t2, t0, t1");
        assert_eq!(hart.x(7), 4);
    }

    #[test]
    fn check_signed_and_unsigned_comparisons() {
        let hart = run_program(
            "\
li t0, -1
li t1, 5
slt t2, t0, t1
sltu t3, t0, t1
slti t4, t0, 0
sltiu t5, t0, 0",
        );
        assert_eq!(hart.x(7), 1, "-1 < 5 signed");
        assert_eq!(hart.x(28), 0, "0xffffffff is not below 5 unsigned");
        assert_eq!(hart.x(29), 1);
        assert_eq!(hart.x(30), 0);
    }

    #[test]
    fn check_shift_semantics() {
        let hart = run_program(
            "\
li t0, -16
srai t1, t0, 2
srli t2, t0, 2
li t3, 34
li t4, 1
sll t5, t4, t3",
        );
        assert_eq!(hart.x(6), 0xffff_fffc);
        assert_eq!(hart.x(7), 0x3fff_fffc);
        // register-form shift amount is masked to five bits: 34 & 0x1f = 2
        assert_eq!(hart.x(30), 4);
    }

    #[test]
    fn check_sra_register_form() {
        let hart = run_program("li t0, -64\nli t1, 3\nsra t2, t0, t1\nsrl t3, t0, t1");
        assert_eq!(hart.x(7), 0xffff_fff8);
        assert_eq!(hart.x(28), 0x1fff_fff8);
    }

    #[test]
    fn check_halfword_store_and_load() {
        let hart = run_program(
            "li s0, 200\nli s1, 0x12345678\nsh s1, 0(s0)\nlh t0, 0(s0)\nlhu t1, 0(s0)",
        );
        assert_eq!(hart.x(5), 0x5678);
        assert_eq!(hart.x(6), 0x5678);
        // the upper half was not stored
        assert_eq!(hart.memory()[202], 0);
        assert_eq!(hart.memory()[203], 0);
    }

    #[test]
    fn check_little_endian_store() {
        let hart = run_program("li s0, 100\nli s1, 0x12345678\nsw s1, 0(s0)");
        assert_eq!(&hart.memory()[100..104], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn check_out_of_bounds_load_is_skipped() {
        // 4093 + 4 exceeds the 4096-byte memory
        let hart = run_program("li t0, 7\nli s0, 4093\nlw t0, 0(s0)\nli t1, 1");
        assert_eq!(hart.x(5), 7, "destination should be untouched");
        assert_eq!(hart.x(6), 1, "execution should continue past the access");
    }

    #[test]
    fn check_out_of_bounds_store_is_skipped() {
        let hart = run_program("li s0, 4095\nli s1, 0xff\nsh s1, 0(s0)\nli t0, 1");
        assert_eq!(hart.memory()[4095], 0);
        assert_eq!(hart.x(5), 1);
    }

    #[test]
    fn check_boundary_loads_accepted() {
        // a word load at mem_len - 4 is the last valid one
        let hart = run_program("li s0, 4092\nli s1, -1\nsw s1, 0(s0)\nlw t0, 0(s0)");
        assert_eq!(hart.x(5), 0xffff_ffff);
        // and a byte access at address 0 works (it reads program text)
        let hart = run_program("lbu t0, 0(zero)");
        assert_eq!(hart.x(5), 0x83, "low byte of the lbu word itself");
    }

    #[test]
    fn check_jalr_clears_low_bit() {
        let hart = run_program("li t0, 13\njalr ra, t0, 0");
        // 13 & ~1 = 12, which is out of the loaded program, so the
        // zero word there halts execution
        assert_eq!(hart.pc(), 12);
        assert_eq!(hart.x(1), 8);
    }

    #[test]
    fn check_misaligned_jump_target_halts() {
        let mut hart = Hart::new();
        let image = parse_assembly("li t0, 2\njalr zero, t0, 1").unwrap();
        hart.load_program(&image.machine_code);
        hart.run(DEFAULT_MAX_CYCLES);
        // (2 + 1) & ~1 = 2: misaligned, so the next step halts
        assert_eq!(hart.pc(), 2);
        assert_eq!(hart.cycles(), 2);
    }

    #[test]
    fn check_auipc_adds_pc() {
        let hart = run_program("nop\nauipc t0, 1");
        assert_eq!(hart.x(5), 4 + (1 << 12));
    }

    #[test]
    fn check_run_respects_cycle_bound() {
        let image = parse_assembly("loop:\nj loop").unwrap();
        let mut hart = Hart::new();
        hart.load_program(&image.machine_code);
        hart.run(100);
        assert_eq!(hart.cycles(), 100);
        // the bound is per-call, not cumulative
        hart.run(50);
        assert_eq!(hart.cycles(), 150);
    }

    #[test]
    fn check_reset_restores_initial_state() {
        let image = parse_assembly("li s0, 100\nli s1, 55\nsw s1, 0(s0)").unwrap();
        let mut hart = Hart::new();
        hart.load_program(&image.machine_code);
        hart.run(DEFAULT_MAX_CYCLES);
        assert_eq!(hart.memory()[100], 55);
        hart.reset();
        assert_eq!(hart.pc(), 0);
        assert_eq!(hart.cycles(), 0);
        assert!(hart.registers().iter().all(|&r| r == 0));
        assert_eq!(hart.memory()[100], 0, "data writes should be wiped");
        // program text is back in place
        let expected: Vec<u8> = image
            .machine_code
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        assert_eq!(&hart.memory()[..expected.len()], &expected[..]);
        // and the program runs again identically
        hart.run(DEFAULT_MAX_CYCLES);
        assert_eq!(hart.memory()[100], 55);
    }

    #[test]
    fn check_load_program_replaces_backup() {
        let first = parse_assembly("li t0, 1").unwrap();
        let second = parse_assembly("li t0, 2").unwrap();
        let mut hart = Hart::new();
        hart.load_program(&first.machine_code);
        hart.load_program(&second.machine_code);
        hart.reset();
        hart.run(DEFAULT_MAX_CYCLES);
        assert_eq!(hart.x(5), 2);
    }

    #[test]
    fn check_unknown_word_retires_as_nop() {
        let mut hart = Hart::new();
        // 0x0000001f has an opcode outside the RV32I table
        hart.load_program(&[0x0000001f, 0x00a00293]);
        hart.run(DEFAULT_MAX_CYCLES);
        assert_eq!(hart.x(5), 10);
        assert_eq!(hart.cycles(), 2);
    }

    #[test]
    fn check_jump_to_zero_word_halts() {
        let mut hart = Hart::with_memory_size(16);
        hart.load_program(&[0x0080006f]); // jal zero, +8 -> pc 8
        assert!(hart.step());
        assert_eq!(hart.pc(), 8);
        // memory[8..12] is zero, so the next step halts
        assert!(!hart.step());
    }

    #[test]
    fn check_pc_outside_memory_halts() {
        let mut hart = Hart::with_memory_size(8);
        hart.load_program(&[0x0080006f]); // jal zero, +8 -> pc 8
        assert!(hart.step());
        assert_eq!(hart.pc(), 8);
        // pc is past the end of the 8-byte memory
        assert!(!hart.step());
        assert_eq!(hart.cycles(), 1);
    }
}
