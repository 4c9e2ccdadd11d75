//! Level-1 optimisations: run-length encoding and local cancellation of
//! adjacent arithmetic and pointer instructions.

use crate::bfir::{Instruction, Opcode};
use std::cmp::Ordering;
use tracing::debug;

/// A single left-to-right pass. Runs of the same IN/OUT/ADD/SUB/INCP/DECP
/// opcode are merged by summing their counts. An arithmetic or pointer
/// run also swallows one immediately following instruction of the
/// opposite opcode, flipping the opcode if the total goes negative and
/// dropping it altogether if the two cancel exactly.
pub fn optimize(instrs: &[Instruction]) -> Vec<Instruction> {
    let mut result = Vec::with_capacity(instrs.len());
    let mut iter = instrs.iter().peekable();

    while let Some(&instr) = iter.next() {
        match instr.opcode {
            Opcode::In | Opcode::Out => {
                let mut count = instr.value;
                while let Some(next) = iter.next_if(|next| next.opcode == instr.opcode) {
                    count += next.value;
                }
                result.push(Instruction {
                    value: count,
                    ..instr
                });
            }
            Opcode::Add | Opcode::Sub | Opcode::IncPtr | Opcode::DecPtr => {
                let opposite = instr.opcode.opposite();

                let mut count = instr.value;
                while let Some(next) = iter.next_if(|next| next.opcode == instr.opcode) {
                    count += next.value;
                }
                if let Some(next) = iter.next_if(|next| Some(next.opcode) == opposite) {
                    count -= next.value;
                }

                match (count.cmp(&0), opposite) {
                    (Ordering::Greater, _) => result.push(Instruction {
                        value: count,
                        ..instr
                    }),
                    (Ordering::Less, Some(opcode)) => result.push(Instruction {
                        opcode,
                        value: -count,
                        ..instr
                    }),
                    // Cancelled out entirely.
                    _ => {}
                }
            }
            _ => result.push(instr),
        }
    }

    result
}

/// Apply `optimize` until the stream stops shrinking.
pub fn optimize_to_fixpoint(instrs: &[Instruction]) -> Vec<Instruction> {
    let mut current = optimize(instrs);
    let mut passes = 1;
    loop {
        let next = optimize(&current);
        if next.len() == current.len() {
            debug!(
                passes,
                before = instrs.len(),
                after = current.len(),
                "peephole reached fixpoint"
            );
            return current;
        }
        current = next;
        passes += 1;
    }
}
