//! Human-readable warnings and source positions for the CLI.

use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Warning {
    pub message: String,
    pub position: Option<Position>,
}

impl Warning {
    pub fn new<S: Into<String>>(message: S, position: Option<Position>) -> Self {
        Warning {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "{}: {}", position, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A location in source code. Lines start at 1; columns start at 1 for
/// the first character of a line.
#[derive(PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Position { line, column }
    }
}

/// Render an optional position for an error message.
pub fn describe_position(position: &Option<Position>) -> String {
    match position {
        Some(position) => position.to_string(),
        None => "an unknown position".to_owned(),
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[test]
fn test_warning_display_with_position() {
    let warning = Warning::new("Unmatched jump label", Some(Position::new(3, 7)));
    assert_eq!(
        warning.to_string(),
        "line 3, column 7: Unmatched jump label"
    );
}

#[test]
fn test_warning_display_without_position() {
    let warning = Warning::new("Unbalanced brackets in code", None);
    assert_eq!(warning.to_string(), "Unbalanced brackets in code");
}

#[test]
fn test_position_debug_is_compact() {
    assert_eq!(format!("{:?}", Position::new(12, 1)), "12:1");
}
