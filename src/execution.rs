//! The reference interpreter. It runs any instruction stream, optimized
//! or not, so it is both an execution mode and the oracle the optimizers
//! are tested against.

use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::{describe_position, Position, Warning};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;
use tracing::warn;

/// Bit width of a tape cell. All cell arithmetic wraps at this width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    Bits8,
    Bits16,
    Bits32,
}

impl WordWidth {
    pub fn bits(self) -> u32 {
        match self {
            WordWidth::Bits8 => 8,
            WordWidth::Bits16 => 16,
            WordWidth::Bits32 => 32,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    pub fn mask(self) -> u32 {
        match self {
            WordWidth::Bits8 => 0xff,
            WordWidth::Bits16 => 0xffff,
            WordWidth::Bits32 => 0xffff_ffff,
        }
    }

    /// Reduce a signed operand modulo 2^bits.
    pub fn truncate(self, value: isize) -> u32 {
        (value as u32) & self.mask()
    }
}

impl Default for WordWidth {
    fn default() -> Self {
        WordWidth::Bits8
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported word width {0}, expected 8, 16 or 32")]
pub struct UnsupportedWidth(pub u32);

impl TryFrom<u32> for WordWidth {
    type Error = UnsupportedWidth;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(WordWidth::Bits8),
            16 => Ok(WordWidth::Bits16),
            32 => Ok(WordWidth::Bits32),
            other => Err(UnsupportedWidth(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub tape_size: usize,
    pub word_width: WordWidth,
    /// Stop after dispatching this many instructions. `None` runs until
    /// the program ends, however long that takes.
    pub max_steps: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            tape_size: 30000,
            word_width: WordWidth::Bits8,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    OutOfSteps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub tape: Vec<u32>,
    pub pointer: isize,
    pub steps: u64,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
}

impl ExecutionState {
    /// A zeroed tape with the pointer on the first cell.
    pub fn new(config: &ExecutionConfig) -> Self {
        ExecutionState {
            tape: vec![0; config.tape_size],
            pointer: 0,
            steps: 0,
            outcome: Outcome::Completed,
            warnings: vec![],
        }
    }

    fn warn(&mut self, message: &str, position: Option<Position>) {
        warn!(position = %describe_position(&position), "{}", message);
        self.warnings.push(Warning::new(message, position));
    }

    fn index(&self, offset: isize, position: Option<Position>) -> Result<usize, ExecutionError> {
        let index = self.pointer.wrapping_add(offset);
        if index < 0 || index as usize >= self.tape.len() {
            return Err(ExecutionError::OutOfBounds { index, position });
        }
        Ok(index as usize)
    }

    fn cell(&self, offset: isize, position: Option<Position>) -> Result<u32, ExecutionError> {
        Ok(self.tape[self.index(offset, position)?])
    }

    fn set_cell(
        &mut self,
        offset: isize,
        value: u32,
        position: Option<Position>,
    ) -> Result<(), ExecutionError> {
        let index = self.index(offset, position)?;
        self.tape[index] = value;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("cell {index} accessed at {} is outside the tape", describe_position(.position))]
    OutOfBounds {
        index: isize,
        position: Option<Position>,
    },
    #[error("could not write program output: {0}")]
    Io(#[from] io::Error),
}

/// Where a label's jumps land.
#[derive(Debug, Default, Clone, Copy)]
struct Jump {
    /// Index of the JMPF (or LBL).
    start: Option<usize>,
    /// Index of the JMPB (or LBL).
    end: Option<usize>,
}

fn jump_table(instrs: &[Instruction], state: &mut ExecutionState) -> HashMap<isize, Jump> {
    let mut table: HashMap<isize, Jump> = HashMap::new();

    for (index, instr) in instrs.iter().enumerate() {
        match instr.opcode {
            Opcode::JumpForward => {
                table.entry(instr.value).or_default().start = Some(index);
            }
            Opcode::JumpBack => {
                let jump = table.entry(instr.value).or_default();
                if jump.start.is_none() {
                    jump.start = Some(0);
                    state.warn("Unmatched jump label", instr.position);
                }
                jump.end = Some(index);
            }
            Opcode::Label => {
                table.entry(instr.value).or_insert(Jump {
                    start: Some(index),
                    end: Some(index),
                });
            }
            _ => {}
        }
    }

    table
}

/// Run `instrs` on a fresh tape.
pub fn execute<R: Read, W: Write>(
    instrs: &[Instruction],
    config: &ExecutionConfig,
    input: &mut R,
    output: &mut W,
) -> Result<ExecutionState, ExecutionError> {
    execute_with(instrs, config, ExecutionState::new(config), input, output)
}

/// Run `instrs` from the start of the program, on the tape and pointer
/// already in `state`.
pub fn execute_with<R: Read, W: Write>(
    instrs: &[Instruction],
    config: &ExecutionConfig,
    mut state: ExecutionState,
    input: &mut R,
    output: &mut W,
) -> Result<ExecutionState, ExecutionError> {
    let width = config.word_width;
    let table = jump_table(instrs, &mut state);
    state.outcome = Outcome::Completed;

    let mut i = 0;
    while i < instrs.len() {
        if let Some(max_steps) = config.max_steps {
            if state.steps >= max_steps {
                state.outcome = Outcome::OutOfSteps;
                break;
            }
        }
        state.steps += 1;

        let instr = &instrs[i];
        let position = instr.position;
        match instr.opcode {
            Opcode::Add | Opcode::Sub => {
                let amount = match instr.opcode {
                    Opcode::Sub => width.truncate(instr.value.wrapping_neg()),
                    _ => width.truncate(instr.value),
                };
                let value = state.cell(0, position)?.wrapping_add(amount) & width.mask();
                state.set_cell(0, value, position)?;
            }
            Opcode::IncPtr | Opcode::DecPtr => {
                state.pointer = state
                    .pointer
                    .wrapping_add(instr.pointer_delta().unwrap_or(0));
            }
            Opcode::Out => {
                for _ in 0..instr.value {
                    let value = state.cell(0, position)?;
                    output.write_all(&[value as u8])?;
                }
                output.flush()?;
            }
            Opcode::In => {
                for _ in 0..instr.value {
                    if let Some(byte) = read_byte(input, &mut state, position) {
                        state.set_cell(0, u32::from(byte), position)?;
                    }
                }
            }
            Opcode::JumpForward | Opcode::BranchZero => {
                if state.cell(0, position)? == 0 {
                    if let Some(end) = lookup(&table, instr, &mut state, |jump| jump.end) {
                        i = end;
                        continue;
                    }
                }
            }
            Opcode::JumpBack => {
                if state.cell(0, position)? != 0 {
                    if let Some(start) = lookup(&table, instr, &mut state, |jump| jump.start) {
                        i = start;
                        continue;
                    }
                }
            }
            Opcode::Label => {}
            Opcode::Mul => {
                if instr.value == -1 && instr.offset == 0 {
                    state.set_cell(0, 0, position)?;
                } else {
                    let source = state.cell(0, position)?;
                    let target = state.cell(instr.offset, position)?;
                    let product = source.wrapping_mul(width.truncate(instr.value));
                    let value = target.wrapping_add(product) & width.mask();
                    state.set_cell(instr.offset, value, position)?;
                }
            }
            Opcode::Div => {
                if instr.value <= 0 {
                    state.warn("Division by a non-positive value", position);
                } else {
                    let value = state.cell(instr.offset, position)? as u64 / instr.value as u64;
                    state.set_cell(instr.offset, value as u32, position)?;
                }
            }
            Opcode::Mov => {
                state.set_cell(instr.offset, width.truncate(instr.value), position)?;
            }
            Opcode::ScanRight | Opcode::ScanLeft => {
                let step = match instr.opcode {
                    Opcode::ScanRight => 1,
                    _ => -1,
                };
                while state.cell(0, position)? != 0 {
                    state.pointer = state.pointer.wrapping_add(step);
                }
            }
            Opcode::Print => {
                loop {
                    let value = state.cell(0, position)?;
                    if value == 0 {
                        break;
                    }
                    output.write_all(&[value as u8])?;
                    state.pointer = state.pointer.wrapping_add(1);
                }
                output.flush()?;
            }
        }

        i += 1;
    }

    Ok(state)
}

fn lookup<F>(
    table: &HashMap<isize, Jump>,
    instr: &Instruction,
    state: &mut ExecutionState,
    target: F,
) -> Option<usize>
where
    F: Fn(&Jump) -> Option<usize>,
{
    let found = table.get(&instr.value).and_then(target);
    if found.is_none() {
        state.warn(
            &format!("No jump target for label @{}", instr.value),
            instr.position,
        );
    }
    found
}

/// Read one byte. EOF leaves the cell alone, which a lot of programs
/// expect; a failed read does the same but is reported.
fn read_byte<R: Read>(
    input: &mut R,
    state: &mut ExecutionState,
    position: Option<Position>,
) -> Option<u8> {
    let mut buf = [0u8; 1];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return None,
            Ok(_) => return Some(buf[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                state.warn(&format!("Failed to read input: {}", e), position);
                return None;
            }
        }
    }
}
