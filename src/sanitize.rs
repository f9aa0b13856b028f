//! Code Sanitizer
//!
//! Strips module syntax from a generated single-file component so it can run
//! as a freestanding script. This is a line-oriented textual filter, not a
//! parser: a line inside a template literal that happens to start with
//! `import` or `export` is treated as code.

use regex::Regex;
use std::sync::OnceLock;

fn single_line_import() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*import\s+(?:[\w*{][^'"]*\s+from\s+)?['"][^'"]+['"]\s*;?\s*(?://.*|/\*.*\*/\s*)?$"#)
            .expect("import pattern is valid")
    })
}

fn import_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*import\s+(?:type\s+)?[\w*{]"#).expect("import start pattern is valid")
    })
}

fn import_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:from\s+['"][^'"]+['"]\s*;?|;)\s*(?://.*|/\*.*\*/\s*)?$"#)
            .expect("import end pattern is valid")
    })
}

fn export_default() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)export\s+default\s+").expect("export default pattern is valid"))
}

fn export_declaration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)export\s+((?:async\s+)?(?:const|let|function|class)\b)")
            .expect("export declaration pattern is valid")
    })
}

fn export_aggregate() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*export\s*(?:\{[^}]*\}|\*(?:\s+as\s+\w+)?)\s*(?:from\s+['"][^'"]+['"])?\s*;?\s*(?://.*|/\*.*\*/\s*)?$"#,
        )
        .expect("export aggregate pattern is valid")
    })
}

fn directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(?:"use [a-z ]+"|'use [a-z ]+')\s*;?\s*$"#)
            .expect("directive pattern is valid")
    })
}

/// Strip imports, export keywords, aggregate exports and leading directives.
///
/// Transforms run in a fixed order over whole lines; the result is trimmed.
/// Applying `sanitize` to its own output is a no-op.
pub fn sanitize(source: &str) -> String {
    let without_imports = strip_imports(source);

    let mut lines: Vec<String> = Vec::with_capacity(without_imports.len());
    for line in without_imports {
        let line = export_default().replace(line, "$1").into_owned();
        let line = export_declaration().replace(&line, "$1$2").into_owned();
        if export_aggregate().is_match(&line) {
            continue;
        }
        lines.push(line);
    }

    strip_leading_directives(&mut lines);
    lines.join("\n").trim().to_string()
}

/// Returns true when a line would be rewritten or removed by [`sanitize`].
pub fn is_module_syntax(line: &str) -> bool {
    single_line_import().is_match(line)
        || import_start().is_match(line)
        || export_default().is_match(line)
        || export_declaration().is_match(line)
        || export_aggregate().is_match(line)
        || directive().is_match(line)
}

fn strip_imports(source: &str) -> Vec<&str> {
    let mut kept = Vec::new();
    let mut in_import = false;

    for line in source.lines() {
        if in_import {
            if import_end().is_match(line) {
                in_import = false;
            }
            continue;
        }
        if single_line_import().is_match(line) {
            continue;
        }
        if import_start().is_match(line) {
            // Multi-line import: drop through the terminating line.
            in_import = !import_end().is_match(line);
            continue;
        }
        kept.push(line);
    }

    kept
}

fn strip_leading_directives(lines: &mut Vec<String>) {
    loop {
        let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
            return;
        };
        if !directive().is_match(&lines[first]) {
            return;
        }
        lines.remove(first);
    }
}
