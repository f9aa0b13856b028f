//! Cheap bracket-balance check run before any execution context is built.
//!
//! Brackets inside string literals and comments are counted too; the
//! tolerance absorbs the common cases (a stray `(` in a label, an emoticon).

use serde::{Deserialize, Serialize};

pub const DEFAULT_BRACKET_TOLERANCE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketPair {
    Braces,
    Parens,
}

impl BracketPair {
    fn chars(self) -> (char, char) {
        match self {
            BracketPair::Braces => ('{', '}'),
            BracketPair::Parens => ('(', ')'),
        }
    }

    fn label(self) -> &'static str {
        match self {
            BracketPair::Braces => "braces",
            BracketPair::Parens => "parentheses",
        }
    }
}

/// A bracket pair whose open/close counts differ by more than the tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Imbalance {
    pub pair: BracketPair,
    pub open: usize,
    pub close: usize,
}

impl Imbalance {
    pub fn difference(&self) -> usize {
        self.open.abs_diff(self.close)
    }

    pub fn message(&self) -> String {
        let (open_ch, close_ch) = self.pair.chars();
        format!(
            "Syntax error: unbalanced {} ({} = {}, {} = {})",
            self.pair.label(),
            open_ch,
            self.open,
            close_ch,
            self.close
        )
    }
}

/// Check `{}` first, then `()`. Returns the first pair out of tolerance.
pub fn check_balance(code: &str, tolerance: usize) -> Result<(), Imbalance> {
    for pair in [BracketPair::Braces, BracketPair::Parens] {
        let (open_ch, close_ch) = pair.chars();
        let open = code.chars().filter(|c| *c == open_ch).count();
        let close = code.chars().filter(|c| *c == close_ch).count();
        if open.abs_diff(close) > tolerance {
            return Err(Imbalance { pair, open, close });
        }
    }
    Ok(())
}
