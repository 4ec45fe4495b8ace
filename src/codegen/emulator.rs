//! A reference interpreter for the emitted word format.
//!
//! The compiler's output is meant for a DLX-style machine simulator; this
//! module is a minimal equivalent so the crate can execute its own output,
//! with the I/O instructions wired to an input queue and an output buffer.

use std::collections::VecDeque;

use thiserror::Error;

use super::machine::{MachineInstr, MachineOp, MEMORY_SIZE, RA};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineFault {
    #[error("cannot decode word {word:#010x} at address {pc}")]
    BadInstruction { pc: usize, word: u32 },
    #[error("memory access at byte address {0} out of bounds")]
    BadAddress(i32),
    #[error("division by zero at address {0}")]
    DivisionByZero(usize),
    #[error("input exhausted at address {0}")]
    InputExhausted(usize),
    #[error("execution did not halt within {0} steps")]
    OutOfFuel(usize),
}

const FUEL: usize = 1_000_000;

/// Machine state: 32 registers, a flat byte-addressed data memory (word
/// aligned), and the loaded program.
pub struct Machine {
    regs: [i32; 32],
    memory: Vec<i32>,
    program: Vec<u32>,
    pc: usize,
    pub input: VecDeque<i32>,
    pub output: Vec<i32>,
}

impl Machine {
    pub fn load(program: Vec<u32>) -> Self {
        let mut regs = [0; 32];
        // GLOBAL is preloaded with the top byte address of data memory.
        regs[super::machine::GLOBAL] = MEMORY_SIZE as i32 - 1;
        Self {
            regs,
            memory: vec![0; MEMORY_SIZE / 4],
            program,
            pc: 0,
            input: VecDeque::new(),
            output: Vec::new(),
        }
    }

    pub fn with_input(program: Vec<u32>, input: &[i32]) -> Self {
        let mut machine = Self::load(program);
        machine.input = input.iter().copied().collect();
        machine
    }

    fn read_mem(&self, address: i32) -> Result<i32, MachineFault> {
        let index = address / 4;
        if address < 0 || address % 4 != 0 || index as usize >= self.memory.len() {
            return Err(MachineFault::BadAddress(address));
        }
        Ok(self.memory[index as usize])
    }

    fn write_mem(&mut self, address: i32, value: i32) -> Result<(), MachineFault> {
        let index = address / 4;
        if address < 0 || address % 4 != 0 || index as usize >= self.memory.len() {
            return Err(MachineFault::BadAddress(address));
        }
        self.memory[index as usize] = value;
        Ok(())
    }

    /// Execute until the program halts (a return to address 0).
    pub fn run(&mut self) -> Result<(), MachineFault> {
        for _ in 0..FUEL {
            if self.step()? {
                return Ok(());
            }
        }
        Err(MachineFault::OutOfFuel(FUEL))
    }

    /// Execute one instruction; returns true on halt.
    fn step(&mut self) -> Result<bool, MachineFault> {
        let word = *self
            .program
            .get(self.pc)
            .ok_or(MachineFault::BadAddress(self.pc as i32 * 4))?;
        let instr = MachineInstr::decode(word).ok_or(MachineFault::BadInstruction {
            pc: self.pc,
            word,
        })?;
        let MachineInstr { op, a, b, c } = instr;
        let ra = self.regs[a as usize & 0x1f];
        let rb = self.regs[b as usize & 0x1f];
        let rc = self.regs[c as usize & 0x1f];
        let mut next_pc = self.pc + 1;

        match op {
            MachineOp::Add => self.set_reg(a, rb.wrapping_add(rc)),
            MachineOp::Sub => self.set_reg(a, rb.wrapping_sub(rc)),
            MachineOp::Mul => self.set_reg(a, rb.wrapping_mul(rc)),
            MachineOp::Div => {
                if rc == 0 {
                    return Err(MachineFault::DivisionByZero(self.pc));
                }
                self.set_reg(a, rb.wrapping_div(rc));
            }
            MachineOp::Cmp => self.set_reg(a, rb.wrapping_sub(rc).signum()),
            MachineOp::Addi => self.set_reg(a, rb.wrapping_add(c)),
            MachineOp::Ldw => {
                let value = self.read_mem(rb.wrapping_add(c))?;
                self.set_reg(a, value);
            }
            MachineOp::Stw => self.write_mem(rb.wrapping_add(c), ra)?,
            MachineOp::Psh => {
                let address = rb.wrapping_add(c);
                self.set_reg(b, address);
                self.write_mem(address, ra)?;
            }
            MachineOp::Pop => {
                let value = self.read_mem(rb)?;
                self.set_reg(a, value);
                self.set_reg(b, rb.wrapping_add(c));
            }
            MachineOp::Beq => {
                if ra == 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Bne => {
                if ra != 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Blt => {
                if ra < 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Bge => {
                if ra >= 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Ble => {
                if ra <= 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Bgt => {
                if ra > 0 {
                    next_pc = self.branch_target(c);
                }
            }
            MachineOp::Bsr => {
                self.regs[RA] = (self.pc as i32 + 1) * 4;
                next_pc = self.branch_target(c);
            }
            MachineOp::Jsr => {
                self.regs[RA] = (self.pc as i32 + 1) * 4;
                next_pc = (c / 4) as usize;
            }
            MachineOp::Ret => {
                if rc == 0 {
                    return Ok(true);
                }
                next_pc = (rc / 4) as usize;
            }
            MachineOp::Rdi => {
                let value = self
                    .input
                    .pop_front()
                    .ok_or(MachineFault::InputExhausted(self.pc))?;
                self.set_reg(a, value);
            }
            MachineOp::Wrd => self.output.push(rb),
            MachineOp::Wrl => {}
        }

        self.pc = next_pc;
        Ok(false)
    }

    fn branch_target(&self, displacement: i32) -> usize {
        (self.pc as i32 + displacement) as usize
    }

    fn set_reg(&mut self, index: i32, value: i32) {
        let index = index as usize & 0x1f;
        if index != 0 {
            self.regs[index] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::machine::{MachineInstr, MachineOp, R0, SP};

    fn word(op: MachineOp, a: i32, b: i32, c: i32) -> u32 {
        MachineInstr::new(op, a, b, c).encode()
    }

    #[test]
    fn add_and_write() {
        let program = vec![
            word(MachineOp::Addi, 1, R0 as i32, 3),
            word(MachineOp::Addi, 2, R0 as i32, 4),
            word(MachineOp::Add, 3, 1, 2),
            word(MachineOp::Wrd, 0, 3, 0),
            word(MachineOp::Ret, 0, 0, 0),
        ];
        let mut machine = Machine::load(program);
        machine.run().unwrap();
        assert_eq!(vec![7], machine.output);
    }

    #[test]
    fn push_pop_round_trip() {
        let program = vec![
            word(MachineOp::Addi, SP as i32, R0 as i32, 100),
            word(MachineOp::Addi, 1, R0 as i32, 42),
            word(MachineOp::Psh, 1, SP as i32, 4),
            word(MachineOp::Pop, 2, SP as i32, -4),
            word(MachineOp::Wrd, 0, 2, 0),
            word(MachineOp::Ret, 0, 0, 0),
        ];
        let mut machine = Machine::load(program);
        machine.run().unwrap();
        assert_eq!(vec![42], machine.output);
    }

    #[test]
    fn conditional_branch_skips() {
        let program = vec![
            word(MachineOp::Addi, 1, R0 as i32, 1),
            word(MachineOp::Bne, 1, 0, 2),
            word(MachineOp::Wrd, 0, 1, 0),
            word(MachineOp::Ret, 0, 0, 0),
        ];
        let mut machine = Machine::load(program);
        machine.run().unwrap();
        assert!(machine.output.is_empty());
    }

    #[test]
    fn runtime_division_by_zero_faults() {
        let program = vec![word(MachineOp::Div, 1, 2, 3), word(MachineOp::Ret, 0, 0, 0)];
        let mut machine = Machine::load(program);
        assert_eq!(Err(MachineFault::DivisionByZero(0)), machine.run());
    }

    #[test]
    fn reads_consume_the_input_queue() {
        let program = vec![
            word(MachineOp::Rdi, 1, 0, 0),
            word(MachineOp::Rdi, 2, 0, 0),
            word(MachineOp::Sub, 3, 1, 2),
            word(MachineOp::Wrd, 0, 3, 0),
            word(MachineOp::Ret, 0, 0, 0),
        ];
        let mut machine = Machine::with_input(program, &[10, 4]);
        machine.run().unwrap();
        assert_eq!(vec![6], machine.output);
    }
}
