//! Serialise the stream back to BF. Only the surface opcodes can be
//! written, so `parse` then the peephole pass then this backend round
//! trips, while anything the loop rewriter produces is rejected.

use super::{CodegenOptions, EmitError, Target};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::Warning;
use itertools::repeat_n;
use std::io::Write;

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    for instr in instrs {
        let symbol = instr
            .opcode
            .symbol()
            .ok_or_else(|| EmitError::unsupported(Target::Bf, instr))?;

        if options.comments {
            match instr.position {
                Some(position) => write!(
                    out,
                    "\n{}:{}: {} ",
                    position.line,
                    position.column,
                    instr.opcode.name()
                )?,
                None => write!(out, "\n{} ", instr.opcode.name())?,
            }
        }

        let count = match instr.opcode {
            Opcode::JumpForward | Opcode::JumpBack => 1,
            _ => instr.value.max(0) as usize,
        };
        let text: String = repeat_n(symbol, count).collect();
        out.write_all(text.as_bytes())?;
    }
    Ok(vec![])
}

/// Convenience wrapper returning the BF source as a string.
pub fn decompile(instrs: &[Instruction]) -> Result<String, EmitError> {
    let mut buf = vec![];
    emit(instrs, &CodegenOptions::default(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use crate::peephole::optimize_to_fixpoint;
    use pretty_assertions::assert_eq;

    #[test]
    fn decompile_round_trips() {
        let source = "+[->++<]>.,[-]";
        assert_eq!(decompile(&parse(source).unwrap()).unwrap(), source);
    }

    #[test]
    fn decompile_expands_counts() {
        let instrs = optimize_to_fixpoint(&parse("+++>>--<..").unwrap());
        assert_eq!(decompile(&instrs).unwrap(), "+++>>--<..");
    }

    #[test]
    fn decompile_after_cancellation() {
        let instrs = optimize_to_fixpoint(&parse("++-->><<<+++-").unwrap());
        assert_eq!(decompile(&instrs).unwrap(), "<++");
    }

    #[test]
    fn decompile_rejects_optimizer_opcodes() {
        for opcode in &[
            Opcode::Mul,
            Opcode::Div,
            Opcode::BranchZero,
            Opcode::Label,
            Opcode::Mov,
            Opcode::ScanRight,
            Opcode::ScanLeft,
            Opcode::Print,
        ] {
            let instrs = vec![Instruction::new(*opcode, 1)];
            match decompile(&instrs) {
                Err(EmitError::Unsupported { opcode: found, .. }) => assert_eq!(found, *opcode),
                other => panic!("expected {} to be rejected, got {:?}", opcode, other),
            }
        }
    }

    #[test]
    fn comments_name_positions() {
        let options = CodegenOptions {
            comments: true,
            ..CodegenOptions::default()
        };
        let mut buf = vec![];
        emit(&parse("+\n>").unwrap(), &options, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "\n1:1: ADD +\n2:1: INCP >"
        );
    }
}
