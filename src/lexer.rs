//! Single character tokenizer for BF source, tracking line and column
//! so later diagnostics can point back at the source.

use crate::diagnostics::Position;
use std::str::Chars;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Add,
    Sub,
    IncPtr,
    DecPtr,
    Out,
    In,
    JumpForward,
    JumpBack,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

pub struct Lexer<'a> {
    chars: Chars<'a>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars(),
            line: 1,
            column: 0,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let c = self.chars.next()?;
            self.column += 1;

            let kind = match c {
                '\n' => {
                    self.line += 1;
                    self.column = 0;
                    continue;
                }
                '+' => TokenKind::Add,
                '-' => TokenKind::Sub,
                '>' => TokenKind::IncPtr,
                '<' => TokenKind::DecPtr,
                '.' => TokenKind::Out,
                ',' => TokenKind::In,
                '[' => TokenKind::JumpForward,
                ']' => TokenKind::JumpBack,
                _ => continue,
            };

            return Some(Token {
                kind,
                position: Position::new(self.line, self.column),
            });
        }
    }
}
