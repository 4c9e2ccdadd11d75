//! Backends. Each one is a stateless printer over the instruction
//! stream: a template per opcode plus an indentation counter. A backend
//! that meets an opcode it cannot express returns
//! `EmitError::Unsupported` rather than guessing.

use crate::bfir::{Instruction, Opcode};
use crate::diagnostics::{describe_position, Position, Warning};
use crate::execution::WordWidth;
use crate::loops::LoopPatterns;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;

pub mod bf;
pub mod c;
pub mod il;
pub mod js;
pub mod llvm;
pub mod tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// QBE intermediate language.
    Qbe,
    C,
    Js,
    Llvm,
    /// BF source again.
    Bf,
    /// A readable listing of the instruction stream.
    Tokens,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Qbe => "qbe",
            Target::C => "c",
            Target::Js => "js",
            Target::Llvm => "ll",
            Target::Bf => "bf",
            Target::Tokens => "tokens",
        }
    }

    /// Loop shapes the loop rewriter may turn into target specific
    /// instructions.
    pub fn loop_patterns(self) -> LoopPatterns {
        match self {
            Target::C => LoopPatterns::SCAN | LoopPatterns::PRINT,
            _ => LoopPatterns::empty(),
        }
    }

    /// Whether the loop rewriter may run at all. BF output can only
    /// express what the peephole pass produces.
    pub fn accepts_loop_rewrites(self) -> bool {
        self != Target::Bf
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown target '{0}', expected one of qbe, c, js, ll, bf or tokens")]
pub struct UnknownTarget(pub String);

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qbe" | "il" => Ok(Target::Qbe),
            "c" => Ok(Target::C),
            "js" => Ok(Target::Js),
            "ll" | "llvm" => Ok(Target::Llvm),
            "bf" => Ok(Target::Bf),
            "tokens" | "ir" => Ok(Target::Tokens),
            other => Err(UnknownTarget(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Precede each instruction with a comment naming its source position.
    pub comments: bool,
    /// Number of cells on the tape.
    pub memory_size: usize,
    pub word_width: WordWidth,
    /// Source file name recorded in debug information.
    pub source_name: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            comments: false,
            memory_size: 30000,
            word_width: WordWidth::Bits8,
            source_name: "input.bf".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("the {target} backend cannot express {opcode} (at {})", describe_position(.position))]
    Unsupported {
        target: Target,
        opcode: Opcode,
        position: Option<Position>,
    },
    #[error("could not write generated code: {0}")]
    Io(#[from] io::Error),
}

impl EmitError {
    fn unsupported(target: Target, instr: &Instruction) -> Self {
        EmitError::Unsupported {
            target,
            opcode: instr.opcode,
            position: instr.position,
        }
    }
}

/// Write `instrs` as `target` code. Returns any warnings raised while
/// doing so.
pub fn emit(
    target: Target,
    instrs: &[Instruction],
    options: &CodegenOptions,
    out: &mut dyn Write,
) -> Result<Vec<Warning>, EmitError> {
    match target {
        Target::Qbe => il::emit(instrs, options, out),
        Target::C => c::emit(instrs, options, out),
        Target::Js => js::emit(instrs, options, out),
        Target::Llvm => llvm::emit(instrs, options, out),
        Target::Bf => bf::emit(instrs, options, out),
        Target::Tokens => tokens::emit(instrs, options, out),
    }
}

/// Emit into a string, for tests and callers without a file.
pub fn emit_to_string(
    target: Target,
    instrs: &[Instruction],
    options: &CodegenOptions,
) -> Result<(String, Vec<Warning>), EmitError> {
    let mut buf = vec![];
    let warnings = emit(target, instrs, options, &mut buf)?;
    Ok((String::from_utf8_lossy(&buf).into_owned(), warnings))
}

/// Block nesting for the structured backends, printed as tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indent {
    level: usize,
}

impl Indent {
    pub const fn new(level: usize) -> Self {
        Indent { level }
    }

    pub const fn level(self) -> usize {
        self.level
    }

    pub const fn deeper(self) -> Self {
        Indent::new(self.level + 1)
    }

    pub fn shallower(self) -> Self {
        Indent::new(self.level.saturating_sub(1))
    }
}

impl fmt::Display for Indent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::iter::repeat_with(|| write!(f, "\t"))
            .take(self.level)
            .collect()
    }
}

fn unbalanced_warning() -> Warning {
    Warning::new("Unbalanced brackets in code", None)
}

/// A C-style comment prefix describing where `instr` came from.
fn describe(instr: &Instruction) -> String {
    match instr.position {
        Some(position) => format!(
            "Line {}, Pos {}: {}",
            position.line, position.column, instr
        ),
        None => format!("{}", instr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_target_names() {
        assert_eq!("qbe".parse(), Ok(Target::Qbe));
        assert_eq!("ll".parse(), Ok(Target::Llvm));
        assert_eq!("tokens".parse(), Ok(Target::Tokens));
        assert_eq!(
            "rust".parse::<Target>(),
            Err(UnknownTarget("rust".to_owned()))
        );
    }

    #[test]
    fn only_c_gets_patterns() {
        assert_eq!(
            Target::C.loop_patterns(),
            LoopPatterns::SCAN | LoopPatterns::PRINT
        );
        assert!(Target::Js.loop_patterns().is_empty());
        assert!(Target::Qbe.loop_patterns().is_empty());
    }

    #[test]
    fn indent_prints_tabs() {
        assert_eq!(Indent::new(2).to_string(), "\t\t");
        assert_eq!(Indent::new(0).shallower().to_string(), "");
    }
}
