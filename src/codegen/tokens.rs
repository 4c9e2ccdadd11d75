//! A readable listing of the instruction stream, indented by loop depth.

use super::{describe, unbalanced_warning, CodegenOptions, EmitError, Indent};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::Warning;
use std::io::Write;

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    let base = Indent::new(1);
    let mut indent = base;

    for instr in instrs {
        if options.comments {
            writeln!(out, "{}# {}", indent, describe(instr))?;
        }

        let name = instr.opcode.name();
        match instr.opcode {
            Opcode::JumpForward | Opcode::BranchZero => {
                writeln!(out, "{}{} @{}", indent, name, instr.value)?;
                indent = indent.deeper();
            }
            Opcode::JumpBack | Opcode::Label => {
                indent = indent.shallower();
                writeln!(out, "{}{} @{}", indent, name, instr.value)?;
            }
            Opcode::Mul | Opcode::Div | Opcode::Mov => {
                writeln!(out, "{}{} {}, {}", indent, name, instr.value, instr.offset)?;
            }
            Opcode::ScanRight | Opcode::ScanLeft | Opcode::Print => {
                writeln!(out, "{}{}", indent, name)?;
            }
            _ => writeln!(out, "{}{} {}", indent, name, instr.value)?,
        }
    }

    let mut warnings = vec![];
    if indent.level() > base.level() {
        warnings.push(unbalanced_warning());
        while indent.level() > base.level() {
            indent = indent.shallower();
            writeln!(out, "{}JMPB ??", indent)?;
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{emit_to_string, Target};
    use pretty_assertions::assert_eq;

    #[test]
    fn list_nested_instructions() {
        let instrs = vec![
            Instruction::new(Opcode::Add, 2),
            Instruction::new(Opcode::JumpForward, 1),
            Instruction::new(Opcode::BranchZero, 2),
            Instruction::new(Opcode::Mul, -3).with_offset(4),
            Instruction::new(Opcode::Label, 2),
            Instruction::new(Opcode::JumpBack, 1),
            Instruction::new(Opcode::ScanRight, 0),
        ];
        let (text, warnings) =
            emit_to_string(Target::Tokens, &instrs, &CodegenOptions::default()).unwrap();
        assert_eq!(
            text,
            "\tADD 2\n\tJMPF @1\n\t\tBZ @2\n\t\t\tMUL -3, 4\n\t\tLBL @2\n\tJMPB @1\n\tSCANR\n"
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn unclosed_loop_warns() {
        let instrs = vec![Instruction::new(Opcode::JumpForward, 1)];
        let (text, warnings) =
            emit_to_string(Target::Tokens, &instrs, &CodegenOptions::default()).unwrap();
        assert_eq!(text, "\tJMPF @1\n\tJMPB ??\n");
        assert_eq!(warnings.len(), 1);
    }
}
