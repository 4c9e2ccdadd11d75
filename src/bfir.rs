//! bfir defines the flat instruction stream shared by the optimizers,
//! the interpreter and every backend. Loops are not nested structures:
//! a loop is a JMPF/JMPB pair carrying the same label, and the
//! optimizer-only forms (MUL, DIV, BZ/LBL, MOV, SCANR/SCANL, PRNT) live
//! in the same stream.
//!
//! It also provides the parser from source text to that stream,
//! assigning labels to brackets and reporting unbalanced ones.

use crate::diagnostics::Position;
use crate::lexer::{Lexer, TokenKind};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
use pretty_assertions::assert_eq;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Opcode {
    /// cell[p] += value
    Add,
    /// cell[p] -= value
    Sub,
    /// p += value
    IncPtr,
    /// p -= value
    DecPtr,
    /// Write cell[p] `value` times.
    Out,
    /// Read `value` bytes, keeping the last one read.
    In,
    /// Skip past the matching JumpBack when cell[p] is zero.
    JumpForward,
    /// Return to the matching JumpForward when cell[p] is non-zero.
    JumpBack,

    // These have no direct equivalent in BF, but we generate them
    // during optimisation.
    /// cell[p + offset] += cell[p] * value. MUL(-1, 0) clears cell[p].
    Mul,
    /// cell[p] /= value
    Div,
    /// Jump to the Label sharing this value when cell[p] is zero.
    BranchZero,
    Label,
    /// cell[p + offset] = value
    Mov,
    ScanRight,
    ScanLeft,
    /// Write cells until a zero cell, leaving p on it.
    Print,
}

impl Opcode {
    /// The opcode that undoes this one, for the arithmetic and pointer
    /// opcodes.
    pub fn opposite(self) -> Option<Opcode> {
        match self {
            Opcode::Add => Some(Opcode::Sub),
            Opcode::Sub => Some(Opcode::Add),
            Opcode::IncPtr => Some(Opcode::DecPtr),
            Opcode::DecPtr => Some(Opcode::IncPtr),
            _ => None,
        }
    }

    /// The surface syntax character, if this opcode has one.
    pub fn symbol(self) -> Option<char> {
        match self {
            Opcode::Add => Some('+'),
            Opcode::Sub => Some('-'),
            Opcode::IncPtr => Some('>'),
            Opcode::DecPtr => Some('<'),
            Opcode::Out => Some('.'),
            Opcode::In => Some(','),
            Opcode::JumpForward => Some('['),
            Opcode::JumpBack => Some(']'),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::IncPtr => "INCP",
            Opcode::DecPtr => "DECP",
            Opcode::Out => "OUT",
            Opcode::In => "IN",
            Opcode::JumpForward => "JMPF",
            Opcode::JumpBack => "JMPB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::BranchZero => "BZ",
            Opcode::Label => "LBL",
            Opcode::Mov => "MOV",
            Opcode::ScanRight => "SCANR",
            Opcode::ScanLeft => "SCANL",
            Opcode::Print => "PRNT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single IR instruction. `value` is the repeat count, the jump label
/// or the constant operand depending on the opcode; `offset` is the
/// cell displacement for MUL, DIV and MOV and zero otherwise.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Instruction {
    pub opcode: Opcode,
    pub value: isize,
    pub offset: isize,
    pub position: Option<Position>,
}

impl Instruction {
    pub fn new(opcode: Opcode, value: isize) -> Self {
        Instruction {
            opcode,
            value,
            offset: 0,
            position: None,
        }
    }

    pub fn with_offset(self, offset: isize) -> Self {
        Instruction { offset, ..self }
    }

    pub fn at(self, position: Option<Position>) -> Self {
        Instruction { position, ..self }
    }

    /// The pointer displacement this instruction causes, for the two
    /// pointer opcodes.
    pub fn pointer_delta(&self) -> Option<isize> {
        match self.opcode {
            Opcode::IncPtr => Some(self.value),
            Opcode::DecPtr => Some(-self.value),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {})", self.opcode, self.value, self.offset)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

/// Given a string of BF source code, parse and return our IR
/// representation. Every `[` gets a fresh label, counting from 1, which
/// its matching `]` shares.
pub fn parse(source: &str) -> Result<Vec<Instruction>, ParseError> {
    let mut instructions = vec![];
    // Labels of the open loops and where they were opened.
    let mut stack: Vec<(isize, Position)> = vec![];
    let mut jumps = 0;

    for token in Lexer::new(source) {
        let position = Some(token.position);
        let instr = match token.kind {
            TokenKind::Add => Instruction::new(Opcode::Add, 1),
            TokenKind::Sub => Instruction::new(Opcode::Sub, 1),
            TokenKind::IncPtr => Instruction::new(Opcode::IncPtr, 1),
            TokenKind::DecPtr => Instruction::new(Opcode::DecPtr, 1),
            TokenKind::Out => Instruction::new(Opcode::Out, 1),
            TokenKind::In => Instruction::new(Opcode::In, 1),
            TokenKind::JumpForward => {
                jumps += 1;
                stack.push((jumps, token.position));
                Instruction::new(Opcode::JumpForward, jumps)
            }
            TokenKind::JumpBack => match stack.pop() {
                Some((label, _)) => Instruction::new(Opcode::JumpBack, label),
                None => {
                    return Err(ParseError {
                        message: "Unmatched ']'".to_owned(),
                        position: token.position,
                    });
                }
            },
        };
        instructions.push(instr.at(position));
    }

    if let Some(&(_, position)) = stack.last() {
        return Err(ParseError {
            message: "Unmatched '['".to_owned(),
            position,
        });
    }

    Ok(instructions)
}

/// Strip positions, so streams can be compared by behaviour alone.
#[cfg(test)]
pub fn without_positions(instrs: &[Instruction]) -> Vec<Instruction> {
    instrs.iter().map(|i| i.at(None)).collect()
}

#[test]
fn parse_increment() {
    assert_eq!(
        parse("+").unwrap(),
        [Instruction::new(Opcode::Add, 1).at(Some(Position::new(1, 1)))]
    );
    assert_eq!(
        without_positions(&parse("++").unwrap()),
        [
            Instruction::new(Opcode::Add, 1),
            Instruction::new(Opcode::Add, 1)
        ]
    );
}

#[test]
fn parse_all_simple_opcodes() {
    assert_eq!(
        without_positions(&parse("-><.,").unwrap()),
        [
            Instruction::new(Opcode::Sub, 1),
            Instruction::new(Opcode::IncPtr, 1),
            Instruction::new(Opcode::DecPtr, 1),
            Instruction::new(Opcode::Out, 1),
            Instruction::new(Opcode::In, 1),
        ]
    );
}

#[test]
fn parse_empty_loop() {
    assert_eq!(
        parse("[]").unwrap(),
        [
            Instruction::new(Opcode::JumpForward, 1).at(Some(Position::new(1, 1))),
            Instruction::new(Opcode::JumpBack, 1).at(Some(Position::new(1, 2))),
        ]
    );
}

#[test]
fn parse_nested_loops_share_labels() {
    assert_eq!(
        without_positions(&parse("[[]][]").unwrap()),
        [
            Instruction::new(Opcode::JumpForward, 1),
            Instruction::new(Opcode::JumpForward, 2),
            Instruction::new(Opcode::JumpBack, 2),
            Instruction::new(Opcode::JumpBack, 1),
            Instruction::new(Opcode::JumpForward, 3),
            Instruction::new(Opcode::JumpBack, 3),
        ]
    );
}

#[test]
fn parse_unbalanced_loop() {
    assert!(parse("[").is_err());
    assert!(parse("]").is_err());
    assert!(parse("][").is_err());
    assert!(parse("[][").is_err());
}

#[test]
fn parse_unmatched_close_reports_position() {
    let err = parse("+\n+]").unwrap_err();
    assert_eq!(err.message, "Unmatched ']'");
    assert_eq!(err.position, Position::new(2, 2));
}

#[test]
fn parse_unmatched_open_reports_innermost() {
    let err = parse("[ [ [ ] ").unwrap_err();
    assert_eq!(err.message, "Unmatched '['");
    assert_eq!(err.position, Position::new(1, 3));
}

#[test]
fn parse_comment() {
    assert_eq!(parse("foo! ").unwrap(), []);
}

#[test]
fn instruction_display() {
    let instr = Instruction::new(Opcode::Mul, -2).with_offset(3);
    assert_eq!(instr.to_string(), "MUL (-2, 3)");
}

#[test]
fn opcode_opposites() {
    assert_eq!(Opcode::Add.opposite(), Some(Opcode::Sub));
    assert_eq!(Opcode::DecPtr.opposite(), Some(Opcode::IncPtr));
    assert_eq!(Opcode::Out.opposite(), None);
}
