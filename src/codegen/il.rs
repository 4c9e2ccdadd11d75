//! QBE intermediate language backend.
//!
//! `%p` holds the address of the current cell and `%v` a zero extended
//! copy of its value, which every instruction keeps up to date so loop
//! tests never need to reload. QBE temporaries may be assigned more than
//! once, which lets `%v` flow across the loop and guard labels.

use super::{describe, unbalanced_warning, CodegenOptions, EmitError, Target};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::Warning;
use crate::execution::WordWidth;
use std::io::Write;

/// Load, store and zero extension instructions for one cell width.
struct Memory {
    load: &'static str,
    store: &'static str,
    extend: Option<&'static str>,
    bytes: isize,
}

impl Memory {
    fn new(width: WordWidth) -> Self {
        match width {
            WordWidth::Bits8 => Memory {
                load: "loadub",
                store: "storeb",
                extend: Some("extub"),
                bytes: 1,
            },
            WordWidth::Bits16 => Memory {
                load: "loaduh",
                store: "storeh",
                extend: Some("extuh"),
                bytes: 2,
            },
            WordWidth::Bits32 => Memory {
                load: "loadw",
                store: "storew",
                extend: None,
                bytes: 4,
            },
        }
    }

    /// Store `value` at `addr`, then bring `value` back into cell range.
    fn store(&self, out: &mut dyn Write, value: &str, addr: &str) -> Result<(), EmitError> {
        writeln!(out, "\t{} {}, {}", self.store, value, addr)?;
        if let Some(extend) = self.extend {
            writeln!(out, "\t{} =w {} {}", value, extend, value)?;
        }
        Ok(())
    }

    /// Point `%p2` at the cell `offset` away from `%p`.
    fn offset(&self, out: &mut dyn Write, offset: isize) -> Result<(), EmitError> {
        writeln!(out, "\t%p2 =l add %p, {}", offset * self.bytes)?;
        Ok(())
    }
}

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    let width = options.word_width;
    let mem = Memory::new(width);

    writeln!(
        out,
        "data $MEM = {{ z {} }}",
        options.memory_size * width.bytes()
    )?;
    writeln!(out)?;
    writeln!(out, "export function w $main() {{")?;
    writeln!(out, "@start")?;
    writeln!(out, "\t%p =l copy $MEM")?;
    writeln!(out, "\t%v =w copy 0")?;

    let mut open_loops = vec![];
    let mut reads = 0;
    for instr in instrs {
        if options.comments {
            writeln!(out, "# {}", describe(instr))?;
        }

        let n = instr.value;
        match instr.opcode {
            Opcode::Add | Opcode::Sub => {
                let op = match instr.opcode {
                    Opcode::Add => "add",
                    _ => "sub",
                };
                writeln!(out, "\t%v =w {} %v, {}", op, n)?;
                mem.store(out, "%v", "%p")?;
            }
            Opcode::IncPtr | Opcode::DecPtr => {
                let op = match instr.opcode {
                    Opcode::IncPtr => "add",
                    _ => "sub",
                };
                writeln!(out, "\t%p =l {} %p, {}", op, n * mem.bytes)?;
                writeln!(out, "\t%v =w {} %p", mem.load)?;
            }
            Opcode::Out => {
                for _ in 0..n {
                    writeln!(out, "\tcall $putchar(w %v)")?;
                }
            }
            Opcode::In => {
                // EOF leaves the cell alone.
                for _ in 0..n {
                    reads += 1;
                    writeln!(out, "\t%c =w call $getchar()")?;
                    writeln!(out, "\t%eof =w csltw %c, 0")?;
                    writeln!(out, "\tjnz %eof, @IN{}e, @IN{}s", reads, reads)?;
                    writeln!(out, "@IN{}s", reads)?;
                    writeln!(out, "\t%v =w copy %c")?;
                    mem.store(out, "%v", "%p")?;
                    writeln!(out, "@IN{}e", reads)?;
                }
            }
            Opcode::JumpForward => {
                open_loops.push(n);
                writeln!(out, "@JMP{}f", n)?;
                writeln!(out, "\tjnz %v, @JMP{}fd, @JMP{}bd", n, n)?;
                writeln!(out, "@JMP{}fd", n)?;
            }
            Opcode::JumpBack => {
                open_loops.pop();
                writeln!(out, "\tjmp @JMP{}f", n)?;
                writeln!(out, "@JMP{}bd", n)?;
            }
            Opcode::Mul if n == -1 && instr.offset == 0 => {
                writeln!(out, "\t%v =w copy 0")?;
                mem.store(out, "%v", "%p")?;
            }
            Opcode::Mul => {
                writeln!(out, "\t%v2 =w mul %v, {}", n)?;
                mem.offset(out, instr.offset)?;
                writeln!(out, "\t%v3 =w {} %p2", mem.load)?;
                writeln!(out, "\t%v3 =w add %v3, %v2")?;
                mem.store(out, "%v3", "%p2")?;
                if instr.offset == 0 {
                    writeln!(out, "\t%v =w copy %v3")?;
                }
            }
            Opcode::Div if instr.offset == 0 => {
                writeln!(out, "\t%v =w udiv %v, {}", n)?;
                mem.store(out, "%v", "%p")?;
            }
            Opcode::BranchZero => {
                writeln!(out, "\tjnz %v, @BZ{}t, @LBL{}", n, n)?;
                writeln!(out, "@BZ{}t", n)?;
            }
            Opcode::Label => {
                writeln!(out, "@LBL{}", n)?;
            }
            Opcode::Mov if instr.offset == 0 => {
                writeln!(out, "\t%v =w copy {}", width.truncate(n))?;
                mem.store(out, "%v", "%p")?;
            }
            Opcode::Mov => {
                mem.offset(out, instr.offset)?;
                writeln!(out, "\t%v2 =w copy {}", width.truncate(n))?;
                writeln!(out, "\t{} %v2, %p2", mem.store)?;
            }
            Opcode::Div | Opcode::ScanRight | Opcode::ScanLeft | Opcode::Print => {
                return Err(EmitError::unsupported(Target::Qbe, instr));
            }
        }
    }

    let mut warnings = vec![];
    if !open_loops.is_empty() {
        warnings.push(unbalanced_warning());
        while let Some(label) = open_loops.pop() {
            writeln!(out, "\tjmp @JMP{}f", label)?;
            writeln!(out, "@JMP{}bd", label)?;
        }
    }

    writeln!(out, "\tret 0")?;
    writeln!(out, "}}")?;
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::emit_to_string;
    use pretty_assertions::assert_eq;

    fn body(instrs: &[Instruction], options: &CodegenOptions) -> String {
        let (text, _) = emit_to_string(Target::Qbe, instrs, options).unwrap();
        let start = text.find("%v =w copy 0\n").unwrap() + "%v =w copy 0\n".len();
        let end = text.rfind("\tret 0").unwrap();
        text[start..end].to_owned()
    }

    #[test]
    fn header_sizes_tape_in_bytes() {
        let options = CodegenOptions {
            word_width: WordWidth::Bits32,
            memory_size: 10,
            ..CodegenOptions::default()
        };
        let (text, _) = emit_to_string(Target::Qbe, &[], &options).unwrap();
        assert!(text.starts_with("data $MEM = { z 40 }\n"));
    }

    #[test]
    fn arithmetic_and_pointer() {
        let instrs = vec![
            Instruction::new(Opcode::Add, 3),
            Instruction::new(Opcode::IncPtr, 2),
        ];
        assert_eq!(
            body(&instrs, &CodegenOptions::default()),
            "\t%v =w add %v, 3\n\tstoreb %v, %p\n\t%v =w extub %v\n\t%p =l add %p, 2\n\t%v =w loadub %p\n"
        );
    }

    #[test]
    fn sixteen_bit_pointer_offsets_are_scaled() {
        let options = CodegenOptions {
            word_width: WordWidth::Bits16,
            ..CodegenOptions::default()
        };
        let instrs = vec![Instruction::new(Opcode::Mov, 5).with_offset(-3)];
        assert_eq!(
            body(&instrs, &options),
            "\t%p2 =l add %p, -6\n\t%v2 =w copy 5\n\tstoreh %v2, %p2\n"
        );
    }

    #[test]
    fn guard_labels() {
        let instrs = vec![
            Instruction::new(Opcode::BranchZero, 4),
            Instruction::new(Opcode::Label, 4),
        ];
        assert_eq!(
            body(&instrs, &CodegenOptions::default()),
            "\tjnz %v, @BZ4t, @LBL4\n@BZ4t\n@LBL4\n"
        );
    }

    #[test]
    fn rejects_offset_division() {
        let instrs = vec![Instruction::new(Opcode::Div, 2).with_offset(1)];
        assert!(emit_to_string(Target::Qbe, &instrs, &CodegenOptions::default()).is_err());
    }
}
