//! Diagnostics: error taxonomy, source spans, and rendering.
//!
//! Every error surfaced to a user carries a `PSxxxx` code, a kind, a message,
//! and where available a source span. Rendering produces the standard shape:
//!
//! ```text
//! PS1001 [ERROR]: unexpected token '}'
//!   3 | }       }
//!     |         ^
//!   at src/app.ts:3:9
//! ```

use std::fmt;
use std::path::PathBuf;

/// Stable diagnostic codes. `PS1xxx` syntax, `PS2xxx` type, `PS3xxx`
/// compile/module, `PS4xxx` runtime.
pub mod codes {
    /// Unexpected token during parsing.
    pub const SYNTAX_UNEXPECTED_TOKEN: &str = "PS1001";
    /// Input ended where more was expected.
    pub const SYNTAX_UNEXPECTED_EOF: &str = "PS1002";
    /// Malformed literal (number, string).
    pub const SYNTAX_BAD_LITERAL: &str = "PS1003";
    /// Generic type error.
    pub const TYPE_MISMATCH: &str = "PS2001";
    /// Syntax the compiler deliberately rejects (generators, private names).
    pub const COMPILE_UNSUPPORTED: &str = "PS3001";
    /// Assignment to a `const` binding.
    pub const COMPILE_CONST_ASSIGN: &str = "PS3002";
    /// Import of a name the target module does not export.
    pub const COMPILE_UNRESOLVED_IMPORT: &str = "PS3003";
    /// A function exceeded a chunk limit (registers, constants, jumps).
    pub const COMPILE_LIMIT: &str = "PS3004";
    /// Module graph contains a cycle.
    pub const MODULE_CYCLE: &str = "PS3005";
    /// No resolver accepted a specifier.
    pub const MODULE_UNRESOLVED: &str = "PS3006";
    /// Module source failed to load.
    pub const MODULE_LOAD: &str = "PS3007";
    /// Generic runtime error.
    pub const RUNTIME_ERROR: &str = "PS4001";
    /// Call of a non-callable value.
    pub const RUNTIME_NOT_CALLABLE: &str = "PS4002";
    /// Property access on `undefined` or `null`.
    pub const RUNTIME_NULLISH_ACCESS: &str = "PS4003";
    /// Uncaught exception reached the top of the stack.
    pub const RUNTIME_UNCAUGHT: &str = "PS4004";
}

/// Which phase produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Lexing or parsing.
    Syntax,
    /// Type checking.
    Type,
    /// Lowering to bytecode.
    Compile,
    /// Execution.
    Runtime,
    /// Module resolution or loading.
    Module,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks the phase that produced it.
    Error,
    /// Reported but does not block.
    Warning,
}

/// A half-open byte range with its line/column start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// 1-based line of the span start.
    pub line: u32,
    /// 1-based column of the span start.
    pub column: u32,
    /// Byte offset of the span start.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
}

impl Span {
    /// Creates a span.
    pub fn new(line: u32, column: u32, start: usize, end: usize) -> Self {
        Self {
            line,
            column,
            start,
            end,
        }
    }
}

/// One reportable problem.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable `PSxxxx` code.
    pub code: &'static str,
    /// Producing phase.
    pub kind: DiagnosticKind,
    /// Severity.
    pub severity: Severity,
    /// Human message.
    pub message: String,
    /// Source span, when one is known.
    pub span: Option<Span>,
    /// File the span refers to, when known.
    pub path: Option<PathBuf>,
}

impl Diagnostic {
    /// Creates an error diagnostic without location.
    pub fn error(code: &'static str, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            severity: Severity::Error,
            message: message.into(),
            span: None,
            path: None,
        }
    }

    /// Attaches a span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches a file path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Renders the diagnostic, underlining the span when `source` is given.
    pub fn render(&self, source: Option<&str>) -> String {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        let mut out = format!("{} [{}]: {}\n", self.code, severity, self.message);

        if let (Some(span), Some(source)) = (self.span, source) {
            if let Some(line_text) = source.lines().nth(span.line.saturating_sub(1) as usize) {
                let gutter = format!("  {} | ", span.line);
                out.push_str(&gutter);
                out.push_str(line_text);
                out.push('\n');
                let pad = " ".repeat(gutter.len() - 2) + "| ";
                out.push_str("  ");
                out.push_str(&pad[2..]);
                let col = span.column.saturating_sub(1) as usize;
                out.push_str(&" ".repeat(col.min(line_text.len())));
                let width = (span.end.saturating_sub(span.start)).max(1);
                out.push('^');
                if width > 1 {
                    out.push_str(&"~".repeat(width - 1));
                }
                out.push('\n');
            }
        }

        if let Some(span) = self.span {
            let path = self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<input>".to_string());
            out.push_str(&format!("  at {}:{}:{}\n", path, span.line, span.column));
        } else if let Some(path) = &self.path {
            out.push_str(&format!("  at {}\n", path.display()));
        }

        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [ERROR]: {}", self.code, self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_span_and_source() {
        let diag = Diagnostic::error(
            codes::SYNTAX_UNEXPECTED_TOKEN,
            DiagnosticKind::Syntax,
            "unexpected token '}'",
        )
        .with_span(Span::new(2, 5, 10, 11))
        .with_path("a.ts");

        let rendered = diag.render(Some("let x = 1;\nlet }"));
        assert!(rendered.starts_with("PS1001 [ERROR]: unexpected token '}'"));
        assert!(rendered.contains("2 | let }"));
        assert!(rendered.contains('^'));
        assert!(rendered.contains("at a.ts:2:5"));
    }

    #[test]
    fn test_render_without_source() {
        let diag = Diagnostic::error(
            codes::MODULE_UNRESOLVED,
            DiagnosticKind::Module,
            "cannot resolve './missing'",
        );
        let rendered = diag.render(None);
        assert!(rendered.contains("PS3006"));
        assert!(!rendered.contains("at "));
    }

    #[test]
    fn test_display_short_form() {
        let diag = Diagnostic::error(codes::RUNTIME_ERROR, DiagnosticKind::Runtime, "boom");
        assert_eq!(diag.to_string(), "PS4001 [ERROR]: boom");
    }
}
