//! C99 backend. This is the only backend given the scan and print
//! loop patterns.

use super::{describe, unbalanced_warning, CodegenOptions, EmitError, Indent};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::Warning;
use crate::execution::WordWidth;
use std::io::Write;

fn word_type(width: WordWidth) -> &'static str {
    match width {
        WordWidth::Bits8 => "uint8_t",
        WordWidth::Bits16 => "uint16_t",
        WordWidth::Bits32 => "uint32_t",
    }
}

/// `*p` for offset zero, `p[offset]` otherwise.
fn cell(offset: isize) -> String {
    if offset == 0 {
        "*p".to_owned()
    } else {
        format!("p[{}]", offset)
    }
}

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    let word = word_type(options.word_width);

    writeln!(out, "#include <stdio.h>")?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out, "#include <string.h>")?;
    writeln!(out)?;
    writeln!(out, "{} mem[{}];", word, options.memory_size)?;
    writeln!(out)?;
    writeln!(out, "int main() {{")?;
    writeln!(out, "\t{} *p = mem;", word)?;

    let base = Indent::new(1);
    let mut indent = base;
    for instr in instrs {
        if options.comments {
            writeln!(out, "{}// {}", indent, describe(instr))?;
        }

        let n = instr.value;
        match instr.opcode {
            Opcode::Add if n == 1 => writeln!(out, "{}(*p)++;", indent)?,
            Opcode::Add => writeln!(out, "{}*p += {};", indent, n)?,
            Opcode::Sub if n == 1 => writeln!(out, "{}(*p)--;", indent)?,
            Opcode::Sub => writeln!(out, "{}*p -= {};", indent, n)?,
            Opcode::IncPtr if n == 1 => writeln!(out, "{}p++;", indent)?,
            Opcode::IncPtr => writeln!(out, "{}p += {};", indent, n)?,
            Opcode::DecPtr if n == 1 => writeln!(out, "{}p--;", indent)?,
            Opcode::DecPtr => writeln!(out, "{}p -= {};", indent, n)?,
            Opcode::Out if n == 1 => writeln!(out, "{}putchar(*p);", indent)?,
            Opcode::Out => {
                writeln!(out, "{}for (int i = 0; i < {}; i++) {{", indent, n)?;
                writeln!(out, "{}putchar(*p);", indent.deeper())?;
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::In => {
                writeln!(out, "{}for (int i = 0; i < {}; i++) {{", indent, n)?;
                writeln!(out, "{}int c = getchar();", indent.deeper())?;
                writeln!(out, "{}if (c != EOF) *p = c;", indent.deeper())?;
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::JumpForward => {
                writeln!(out, "{}while (*p) {{", indent)?;
                indent = indent.deeper();
            }
            Opcode::JumpBack | Opcode::Label => {
                indent = indent.shallower();
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::BranchZero => {
                writeln!(out, "{}if (*p) {{", indent)?;
                indent = indent.deeper();
            }
            Opcode::Mul if n == -1 && instr.offset == 0 => writeln!(out, "{}*p = 0;", indent)?,
            Opcode::Mul if n == 1 => writeln!(out, "{}{} += *p;", indent, cell(instr.offset))?,
            Opcode::Mul if n == -1 => writeln!(out, "{}{} -= *p;", indent, cell(instr.offset))?,
            Opcode::Mul => writeln!(out, "{}{} += *p * {};", indent, cell(instr.offset), n)?,
            Opcode::Div => writeln!(out, "{}{} /= {};", indent, cell(instr.offset), n)?,
            Opcode::Mov => writeln!(out, "{}{} = {};", indent, cell(instr.offset), n)?,
            Opcode::ScanRight if options.word_width == WordWidth::Bits8 => writeln!(
                out,
                "{}p = ({} *)memchr(p, 0, sizeof(mem) - (p - mem));",
                indent, word
            )?,
            Opcode::ScanRight => writeln!(out, "{}while (*p) p++;", indent)?,
            Opcode::ScanLeft => writeln!(out, "{}while (*p) p--;", indent)?,
            Opcode::Print if options.word_width == WordWidth::Bits8 => writeln!(
                out,
                "{}p += fwrite(p, 1, strlen((char *)p), stdout);",
                indent
            )?,
            Opcode::Print => writeln!(out, "{}while (*p) {{ putchar(*p); p++; }}", indent)?,
        }
    }

    let mut warnings = vec![];
    if indent.level() > base.level() {
        warnings.push(unbalanced_warning());
        while indent.level() > base.level() {
            indent = indent.shallower();
            writeln!(out, "{}}}", indent)?;
        }
    }

    writeln!(out, "\treturn 0;")?;
    writeln!(out, "}}")?;
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{emit_to_string, Target};
    use pretty_assertions::assert_eq;

    fn body(instrs: &[Instruction], options: &CodegenOptions) -> String {
        let (text, _) = emit_to_string(Target::C, instrs, options).unwrap();
        let start = text.find("*p = mem;\n").unwrap() + "*p = mem;\n".len();
        let end = text.rfind("\treturn 0;").unwrap();
        text[start..end].to_owned()
    }

    #[test]
    fn header_uses_word_type() {
        let options = CodegenOptions {
            word_width: WordWidth::Bits16,
            memory_size: 100,
            ..CodegenOptions::default()
        };
        let (text, _) = emit_to_string(Target::C, &[], &options).unwrap();
        assert!(text.contains("uint16_t mem[100];"));
        assert!(text.contains("\tuint16_t *p = mem;"));
    }

    #[test]
    fn flattened_loop() {
        let instrs = vec![
            Instruction::new(Opcode::BranchZero, 1),
            Instruction::new(Opcode::Div, 2),
            Instruction::new(Opcode::Mul, 3).with_offset(1),
            Instruction::new(Opcode::Mul, -1).with_offset(-2),
            Instruction::new(Opcode::Label, 1),
            Instruction::new(Opcode::Mov, 7),
        ];
        assert_eq!(
            body(&instrs, &CodegenOptions::default()),
            "\tif (*p) {\n\t\t*p /= 2;\n\t\tp[1] += *p * 3;\n\t\tp[-2] -= *p;\n\t}\n\t*p = 7;\n"
        );
    }

    #[test]
    fn loops_and_io() {
        let instrs = vec![
            Instruction::new(Opcode::JumpForward, 1),
            Instruction::new(Opcode::Out, 1),
            Instruction::new(Opcode::IncPtr, 2),
            Instruction::new(Opcode::JumpBack, 1),
        ];
        assert_eq!(
            body(&instrs, &CodegenOptions::default()),
            "\twhile (*p) {\n\t\tputchar(*p);\n\t\tp += 2;\n\t}\n"
        );
    }

    #[test]
    fn scan_and_print_patterns() {
        let instrs = vec![
            Instruction::new(Opcode::ScanLeft, 0),
            Instruction::new(Opcode::Print, 0),
        ];
        assert_eq!(
            body(&instrs, &CodegenOptions::default()),
            "\twhile (*p) p--;\n\tp += fwrite(p, 1, strlen((char *)p), stdout);\n"
        );
    }
}
