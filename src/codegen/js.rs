//! Node.js backend. Input is only wired up when the program reads.

use super::{describe, unbalanced_warning, CodegenOptions, EmitError, Indent, Target};
use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::Warning;
use crate::execution::WordWidth;
use std::io::Write;

const INPUT_PRELUDE: &str = r#"const inputcb = [];
const inputbuf = [];
let inputdone = false;

async function input() {
	if (inputbuf.length > 0) {
		return inputbuf.shift();
	}
	if (inputdone) {
		return -1;
	}

	return new Promise((resolve) => {
		inputcb.push(resolve);
	});
}

process.stdin.on("data", (data) => {
	for (let i = 0; i < data.length; i++) {
		if (inputcb.length > 0) {
			inputcb.shift()(data[i]);
		} else {
			inputbuf.push(data[i]);
		}
	}
});

process.stdin.on("end", () => {
	inputdone = true;
	while (inputcb.length > 0) {
		inputcb.shift()(-1);
	}
});
"#;

const OUTPUT_PRELUDE: &str = r#"async function output(v) {
	const wrote = process.stdout.write(String.fromCharCode(v & 0xff));
	if (!wrote) {
		await new Promise((resolve) => {
			process.stdout.once("drain", resolve);
		});
	}
}
"#;

fn array_type(width: WordWidth) -> &'static str {
    match width {
        WordWidth::Bits8 => "Uint8Array",
        WordWidth::Bits16 => "Uint16Array",
        WordWidth::Bits32 => "Uint32Array",
    }
}

/// `mem[p]` for offset zero, `mem[p+offset]` otherwise.
fn cell(offset: isize) -> String {
    match offset {
        0 => "mem[p]".to_owned(),
        o if o > 0 => format!("mem[p+{}]", o),
        o => format!("mem[p{}]", o),
    }
}

pub fn emit(
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    let has_input = instrs.iter().any(|instr| instr.opcode == Opcode::In);

    writeln!(out, "const process = require(\"process\");")?;
    if has_input {
        writeln!(out, "{}", INPUT_PRELUDE)?;
    }
    writeln!(out, "{}", OUTPUT_PRELUDE)?;
    writeln!(out, "async function main() {{")?;
    writeln!(
        out,
        "\tconst mem = new {}({});",
        array_type(options.word_width),
        options.memory_size
    )?;
    writeln!(out, "\tlet p = 0;")?;

    let base = Indent::new(1);
    let mut indent = base;
    for instr in instrs {
        if options.comments {
            writeln!(out, "{}// {}", indent, describe(instr))?;
        }

        let n = instr.value;
        match instr.opcode {
            Opcode::Add if n == 1 => writeln!(out, "{}mem[p]++;", indent)?,
            Opcode::Add => writeln!(out, "{}mem[p] += {};", indent, n)?,
            Opcode::Sub if n == 1 => writeln!(out, "{}mem[p]--;", indent)?,
            Opcode::Sub => writeln!(out, "{}mem[p] -= {};", indent, n)?,
            Opcode::IncPtr if n == 1 => writeln!(out, "{}p++;", indent)?,
            Opcode::IncPtr => writeln!(out, "{}p += {};", indent, n)?,
            Opcode::DecPtr if n == 1 => writeln!(out, "{}p--;", indent)?,
            Opcode::DecPtr => writeln!(out, "{}p -= {};", indent, n)?,
            Opcode::Out if n == 1 => writeln!(out, "{}await output(mem[p]);", indent)?,
            Opcode::Out => {
                writeln!(out, "{}for (let i = 0; i < {}; i++) {{", indent, n)?;
                writeln!(out, "{}await output(mem[p]);", indent.deeper())?;
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::In => {
                writeln!(out, "{}for (let i = 0; i < {}; i++) {{", indent, n)?;
                writeln!(out, "{}const c = await input();", indent.deeper())?;
                writeln!(out, "{}if (c >= 0) mem[p] = c;", indent.deeper())?;
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::JumpForward => {
                writeln!(out, "{}while (mem[p]) {{", indent)?;
                indent = indent.deeper();
            }
            Opcode::BranchZero => {
                writeln!(out, "{}if (mem[p]) {{", indent)?;
                indent = indent.deeper();
            }
            Opcode::JumpBack | Opcode::Label => {
                indent = indent.shallower();
                writeln!(out, "{}}}", indent)?;
            }
            Opcode::Mul if n == -1 && instr.offset == 0 => {
                writeln!(out, "{}mem[p] = 0;", indent)?
            }
            Opcode::Mul if n == 1 => writeln!(out, "{}{} += mem[p];", indent, cell(instr.offset))?,
            Opcode::Mul if n == -1 => {
                writeln!(out, "{}{} -= mem[p];", indent, cell(instr.offset))?
            }
            Opcode::Mul => writeln!(out, "{}{} += mem[p] * {};", indent, cell(instr.offset), n)?,
            Opcode::Div => writeln!(out, "{}{} /= {};", indent, cell(instr.offset), n)?,
            Opcode::Mov => writeln!(out, "{}{} = {};", indent, cell(instr.offset), n)?,
            Opcode::ScanRight | Opcode::ScanLeft | Opcode::Print => {
                return Err(EmitError::unsupported(Target::Js, instr));
            }
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

    if has_input {
        writeln!(out, "\tprocess.stdin.unref();")?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "main();")?;
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfir::parse;
    use crate::codegen::emit_to_string;
    use crate::loops;
    use crate::peephole::optimize_to_fixpoint;

    #[test]
    fn input_prelude_only_when_reading() {
        let options = CodegenOptions::default();
        let (text, _) = emit_to_string(Target::Js, &parse("+.").unwrap(), &options).unwrap();
        assert!(!text.contains("process.stdin"));

        let (text, _) = emit_to_string(Target::Js, &parse(",.").unwrap(), &options).unwrap();
        assert!(text.contains("process.stdin.on(\"data\""));
        assert!(text.contains("process.stdin.unref();"));
    }

    #[test]
    fn flattened_loop_uses_guard() {
        let instrs = optimize_to_fixpoint(&parse("+++[->>++<<]").unwrap());
        let instrs = loops::optimize(&instrs, Target::Js).unwrap();
        let (text, _) = emit_to_string(Target::Js, &instrs, &CodegenOptions::default()).unwrap();
        assert!(text.contains("\tif (mem[p]) {\n\t\tmem[p+2] += mem[p] * 2;\n\t}\n\tmem[p] = 0;\n"));
    }

    #[test]
    fn rejects_scan() {
        let instrs = vec![Instruction::new(Opcode::ScanRight, 0)];
        assert!(emit_to_string(Target::Js, &instrs, &CodegenOptions::default()).is_err());
    }

    #[test]
    fn sixteen_bit_tape() {
        let options = CodegenOptions {
            word_width: WordWidth::Bits16,
            ..CodegenOptions::default()
        };
        let (text, _) = emit_to_string(Target::Js, &[], &options).unwrap();
        assert!(text.contains("const mem = new Uint16Array(30000);"));
    }
}
