//! Entry-point resolution over a regex-extracted symbol table.
//!
//! Resolution is two-phase: the conventional `App` component wins; otherwise
//! the last-declared capitalized component at the outermost indentation level
//! is used. Nothing is evaluated; the chosen name is injected into the
//! sandbox document as a plain identifier.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const CONVENTIONAL_ENTRY: &str = "App";

pub const MISSING_ENTRY_MESSAGE: &str =
    "No renderable component found: define `function App()` that returns JSX";

fn function_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)(?:async\s+)?function\s*\*?\s+([A-Za-z_$][\w$]*)\s*[(<]")
            .expect("function declaration pattern is valid")
    })
}

fn class_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)class\s+([A-Za-z_$][\w$]*)").expect("class pattern is valid")
    })
}

fn binding_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(.*)$")
            .expect("binding pattern is valid")
    })
}

fn function_initializer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:async\s+)?function\b|=>|^(?:React\.)?(?:memo|forwardRef)\s*\(")
            .expect("initializer pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    FunctionBinding,
    Value,
}

impl SymbolKind {
    pub fn is_component_like(self) -> bool {
        !matches!(self, SymbolKind::Value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Zero-based line index in the scanned source.
    pub line: usize,
    pub indent: usize,
}

impl Symbol {
    fn is_capitalized(&self) -> bool {
        self.name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    }
}

/// Declarations found in sanitized source, in source order.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn scan(code: &str) -> Self {
        let mut symbols = Vec::new();
        for (line_no, line) in code.lines().enumerate() {
            if let Some(caps) = function_decl().captures(line) {
                symbols.push(Symbol {
                    name: caps[2].to_string(),
                    kind: SymbolKind::Function,
                    line: line_no,
                    indent: caps[1].len(),
                });
            } else if let Some(caps) = class_decl().captures(line) {
                symbols.push(Symbol {
                    name: caps[2].to_string(),
                    kind: SymbolKind::Class,
                    line: line_no,
                    indent: caps[1].len(),
                });
            } else if let Some(caps) = binding_decl().captures(line) {
                let kind = if function_initializer().is_match(caps[3].trim()) {
                    SymbolKind::FunctionBinding
                } else {
                    SymbolKind::Value
                };
                symbols.push(Symbol {
                    name: caps[2].to_string(),
                    kind,
                    line: line_no,
                    indent: caps[1].len(),
                });
            }
        }
        Self { symbols }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Resolve the component to mount.
    pub fn resolve_entry(&self) -> Result<EntryPoint, MissingEntryPoint> {
        if let Some(app) = self
            .symbols
            .iter()
            .find(|s| s.name == CONVENTIONAL_ENTRY && s.kind.is_component_like())
        {
            return Ok(EntryPoint {
                name: app.name.clone(),
                resolution: Resolution::Conventional,
            });
        }

        let outermost = self
            .symbols
            .iter()
            .filter(|s| s.kind.is_component_like())
            .map(|s| s.indent)
            .min();

        let candidate = outermost.and_then(|indent| {
            self.symbols
                .iter()
                .rev()
                .find(|s| s.indent == indent && s.kind.is_component_like() && s.is_capitalized())
        });

        match candidate {
            Some(symbol) => Ok(EntryPoint {
                name: symbol.name.clone(),
                resolution: Resolution::Fallback,
            }),
            None => Err(MissingEntryPoint {
                declared: self.symbols.iter().map(|s| s.name.clone()).collect(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Conventional,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntryPoint {
    pub declared: Vec<String>,
}

impl MissingEntryPoint {
    pub fn message(&self) -> String {
        if self.declared.is_empty() {
            MISSING_ENTRY_MESSAGE.to_string()
        } else {
            format!(
                "{} (declared: {})",
                MISSING_ENTRY_MESSAGE,
                self.declared.join(", ")
            )
        }
    }
}

/// Scan and resolve in one step.
pub fn resolve_entry(code: &str) -> Result<EntryPoint, MissingEntryPoint> {
    SymbolTable::scan(code).resolve_entry()
}
