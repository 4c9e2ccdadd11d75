#![warn(trivial_numeric_casts)]

//! bfcomp is an optimizing compiler for BF programs. Source is parsed into
//! a flat instruction stream, shrunk by a peephole pass and a loop
//! rewriter, and then either run by the reference interpreter or printed
//! by one of the backends.
//! The IR and diagnostics grew out of [bfc](https://github.com/Wilfred/bfc).

pub use bfir::{parse, Instruction, Opcode, ParseError};
pub use codegen::{emit, CodegenOptions, EmitError, Target};
pub use diagnostics::{Position, Warning};
pub use execution::{
    execute, execute_with, ExecutionConfig, ExecutionError, ExecutionState, Outcome, WordWidth,
};
pub use loops::{LoopPatterns, LoopStats, OptimizeError};

mod bfir;
pub mod codegen;
mod diagnostics;
pub mod execution;
mod lexer;
pub mod loops;
pub mod peephole;

#[cfg(test)]
mod soundness_tests;
