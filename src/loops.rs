//! Level-2 optimisations: flattening of simple loops into guarded
//! multiply/divide sequences, dead loop elimination, and the scan and
//! print patterns that only the C backend can express.
//!
//! A simple loop has a body made only of ADD, SUB, INCP and DECP with a
//! net pointer displacement of zero. For a loop like `[->+++>-<<]` the
//! body runs `cell[p]` times, so it can be replaced by
//!
//! ```text
//! BZ @n
//! MUL 3, 1
//! MUL -1, 2
//! LBL @n
//! MUL -1, 0
//! ```
//!
//! where the BZ/LBL pair reuses the loop's own label.

use crate::bfir::{Instruction, Opcode};
use crate::codegen::Target;
use crate::diagnostics::{describe_position, Position};
use bitflags::bitflags;
use thiserror::Error;
use tracing::debug;

bitflags! {
    /// Loop shapes that are rewritten only for backends with a direct
    /// equivalent.
    pub struct LoopPatterns: u32 {
        /// `[>]` and `[<]` become SCANR and SCANL.
        const SCAN = 0b01;
        /// `[.>]` becomes PRNT.
        const PRINT = 0b10;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptimizeError {
    #[error("loop @{label} opened at {} has no matching close", describe_position(.position))]
    UnmatchedLoop {
        label: isize,
        position: Option<Position>,
    },
    #[error("internal error: unexpected {opcode} in a simple loop body at {}", describe_position(.position))]
    UnexpectedOpcode {
        opcode: Opcode,
        position: Option<Position>,
    },
}

/// Counters describing what a pass rewrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub dead_loops: usize,
    pub clear_loops: usize,
    pub multiply_loops: usize,
    pub divisions: usize,
    pub folded_stores: usize,
    pub removed_stores: usize,
    pub scans: usize,
    pub prints: usize,
}

/// Rewrite the simple loops in `instrs`, enabling the patterns `target`
/// supports.
pub fn optimize(instrs: &[Instruction], target: Target) -> Result<Vec<Instruction>, OptimizeError> {
    optimize_with_stats(instrs, target).map(|(instrs, _)| instrs)
}

pub fn optimize_with_stats(
    instrs: &[Instruction],
    target: Target,
) -> Result<(Vec<Instruction>, LoopStats), OptimizeError> {
    let mut rewriter = Rewriter::new(instrs.len(), target.loop_patterns());
    rewriter.run(instrs)?;

    debug!(
        before = instrs.len(),
        after = rewriter.output.len(),
        stats = ?rewriter.stats,
        "loop rewrite finished"
    );
    Ok((rewriter.output, rewriter.stats))
}

/// State threaded through one pass. Every call to `optimize` builds its
/// own, so passes never observe each other.
struct Rewriter {
    output: Vec<Instruction>,
    /// The last instruction handled closed a loop, so cell[p] is known
    /// to be zero.
    last_op_was_loop: bool,
    patterns: LoopPatterns,
    stats: LoopStats,
}

impl Rewriter {
    fn new(capacity: usize, patterns: LoopPatterns) -> Self {
        Rewriter {
            output: Vec::with_capacity(capacity),
            last_op_was_loop: false,
            patterns,
            stats: LoopStats::default(),
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.last_op_was_loop = instr.opcode == Opcode::JumpBack;
        self.output.push(instr);
    }

    fn run(&mut self, instrs: &[Instruction]) -> Result<(), OptimizeError> {
        let closes = matching_closes(instrs);
        let mut i = 0;
        while i < instrs.len() {
            let instr = instrs[i];
            if instr.opcode != Opcode::JumpForward {
                self.emit(instr);
                i += 1;
                continue;
            }

            let close = closes[i].ok_or(OptimizeError::UnmatchedLoop {
                label: instr.value,
                position: instr.position,
            })?;
            let body = &instrs[i + 1..close];

            i = if self.last_op_was_loop {
                debug!(label = instr.value, "removing dead loop");
                self.stats.dead_loops += 1;
                close + 1
            } else if body.is_empty() {
                // `[]` cannot be flattened, it would divide by zero.
                self.emit(instr);
                i + 1
            } else if let Some(rewritten) = self.rewrite_pattern(instr, body) {
                self.output.push(rewritten);
                self.last_op_was_loop = true;
                close + 1
            } else if is_simple_loop(body) {
                if self.rewrite_simple_loop(instr, body, instrs[close])? {
                    let next = close + 1;
                    next + self.finish_cell(instr, instrs.get(next))
                } else {
                    i + 1
                }
            } else {
                self.emit(instr);
                i + 1
            };
        }
        Ok(())
    }

    /// The backend specific shapes: scan loops and print loops.
    fn rewrite_pattern(&mut self, open: Instruction, body: &[Instruction]) -> Option<Instruction> {
        let opcode = match body {
            [step] if self.patterns.contains(LoopPatterns::SCAN) && step.value == 1 => {
                match step.opcode {
                    Opcode::IncPtr => Opcode::ScanRight,
                    Opcode::DecPtr => Opcode::ScanLeft,
                    _ => return None,
                }
            }
            [out, step]
                if self.patterns.contains(LoopPatterns::PRINT)
                    && out.opcode == Opcode::Out
                    && out.value == 1
                    && step.opcode == Opcode::IncPtr
                    && step.value == 1 =>
            {
                Opcode::Print
            }
            _ => return None,
        };

        debug!(label = open.value, %opcode, "rewriting pattern loop");
        match opcode {
            Opcode::Print => self.stats.prints += 1,
            _ => self.stats.scans += 1,
        }
        Some(Instruction::new(opcode, 0).at(open.position))
    }

    /// Flatten a simple loop. Returns false if the loop shape isn't one
    /// we rewrite, in which case only the opening JMPF has been emitted.
    fn rewrite_simple_loop(
        &mut self,
        open: Instruction,
        body: &[Instruction],
        close: Instruction,
    ) -> Result<bool, OptimizeError> {
        if let [single] = body {
            if single.opcode == Opcode::Add || single.opcode == Opcode::Sub {
                // `[-]` or `[+]`: whatever was just stored here is dead.
                if let Some(previous) = self.output.last() {
                    let overwritten = match previous.opcode {
                        Opcode::Add | Opcode::Sub => true,
                        Opcode::Mov => previous.offset == 0,
                        _ => false,
                    };
                    if overwritten {
                        self.output.pop();
                        self.stats.removed_stores += 1;
                    }
                }
                debug!(label = open.value, "rewriting clear loop");
                self.stats.clear_loops += 1;
                return Ok(true);
            }
        }

        let mut pointer = 0;
        let mut decrementer = 0;
        for instr in body {
            match instr.opcode {
                Opcode::IncPtr | Opcode::DecPtr => {
                    pointer += instr.pointer_delta().unwrap_or(0);
                }
                Opcode::Add if pointer == 0 => {
                    // Loops counting upwards are left alone.
                    self.emit(open);
                    return Ok(false);
                }
                Opcode::Sub if pointer == 0 => decrementer += instr.value,
                _ => {}
            }
        }
        if decrementer == 0 {
            // The counter never changes: the loop is either skipped or
            // never terminates.
            self.emit(open);
            return Ok(false);
        }

        debug!(label = open.value, decrementer, "rewriting multiply loop");
        self.stats.multiply_loops += 1;

        self.output
            .push(Instruction::new(Opcode::BranchZero, open.value).at(open.position));
        if decrementer != 1 {
            self.stats.divisions += 1;
            self.output
                .push(Instruction::new(Opcode::Div, decrementer).at(open.position));
        }

        let mut pointer = 0;
        for instr in body {
            match instr.opcode {
                Opcode::IncPtr | Opcode::DecPtr => {
                    pointer += instr.pointer_delta().unwrap_or(0);
                }
                Opcode::Sub if pointer == 0 => {}
                Opcode::Add | Opcode::Sub if pointer != 0 => {
                    let factor = match instr.opcode {
                        Opcode::Sub => -instr.value,
                        _ => instr.value,
                    };
                    self.output.push(
                        Instruction::new(Opcode::Mul, factor)
                            .with_offset(pointer)
                            .at(instr.position),
                    );
                }
                _ => {
                    return Err(OptimizeError::UnexpectedOpcode {
                        opcode: instr.opcode,
                        position: instr.position,
                    });
                }
            }
        }

        self.output
            .push(Instruction::new(Opcode::Label, close.value).at(close.position));
        Ok(true)
    }

    /// cell[p] is zero after a flattened loop. If the loop is followed by
    /// an ADD or SUB, store the final constant directly instead. Returns
    /// how many instructions after the loop were consumed.
    fn finish_cell(&mut self, open: Instruction, next: Option<&Instruction>) -> usize {
        let value = match next {
            Some(next) if next.opcode == Opcode::Add => next.value,
            Some(next) if next.opcode == Opcode::Sub => -next.value,
            _ => {
                self.output
                    .push(Instruction::new(Opcode::Mul, -1).at(open.position));
                self.last_op_was_loop = true;
                return 0;
            }
        };

        self.stats.folded_stores += 1;
        self.output
            .push(Instruction::new(Opcode::Mov, value).at(next.and_then(|n| n.position)));
        self.last_op_was_loop = false;
        1
    }
}

/// A body we can flatten: only arithmetic and pointer movement, with the
/// pointer back where it started at the end.
fn is_simple_loop(body: &[Instruction]) -> bool {
    let mut pointer = 0;
    for instr in body {
        match instr.opcode {
            Opcode::IncPtr | Opcode::DecPtr => pointer += instr.pointer_delta().unwrap_or(0),
            Opcode::Add | Opcode::Sub => {}
            _ => return false,
        }
    }
    pointer == 0
}

/// For every JMPF, the index of the JMPB closing it. Stray JMPBs are
/// ignored here; they are passed through like any other instruction.
fn matching_closes(instrs: &[Instruction]) -> Vec<Option<usize>> {
    let mut closes = vec![None; instrs.len()];
    let mut open = vec![];
    for (index, instr) in instrs.iter().enumerate() {
        match instr.opcode {
            Opcode::JumpForward => open.push(index),
            Opcode::JumpBack => {
                if let Some(start) = open.pop() {
                    closes[start] = Some(index);
                }
            }
            _ => {}
        }
    }
    closes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn closes_pair_nested_loops() {
        let instrs = vec![
            Instruction::new(Opcode::JumpForward, 1),
            Instruction::new(Opcode::JumpForward, 2),
            Instruction::new(Opcode::Out, 1),
            Instruction::new(Opcode::JumpBack, 2),
            Instruction::new(Opcode::JumpBack, 1),
            Instruction::new(Opcode::JumpForward, 3),
        ];
        assert_eq!(
            matching_closes(&instrs),
            vec![Some(4), Some(3), None, None, None, None]
        );
    }

    #[test]
    fn stray_close_is_ignored() {
        let instrs = vec![
            Instruction::new(Opcode::JumpBack, 1),
            Instruction::new(Opcode::JumpForward, 2),
            Instruction::new(Opcode::JumpBack, 2),
        ];
        assert_eq!(matching_closes(&instrs), vec![None, Some(2), None]);
    }
}
