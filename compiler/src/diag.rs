// diag.rs — Coded errors and warnings for pbind
//
// Every failure the binding layer, the bounds-query protocol and the
// declaration front end can report is a `Diagnostic` carrying a stable code.
//
// Preconditions: none.
// Postconditions: `Display` renders `level[CODE]: message` plus hint and cause lines.
// Failure modes: none (data only).
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Codes ────────────────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0102`, `W0100`).
///
/// The full table lives in [`codes`]; tests match on these, so a number keeps
/// its meaning once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // ── Parameter usage (E01xx) ──
    pub const E0100: DiagCode = DiagCode("E0100"); // dimensionality precondition
    pub const E0101: DiagCode = DiagCode("E0101"); // dimension index out of range
    pub const E0102: DiagCode = DiagCode("E0102"); // coordinate count mismatch
    pub const E0103: DiagCode = DiagCode("E0103"); // disallowed implicit coordinate type
    pub const E0104: DiagCode = DiagCode("E0104"); // second implicit placeholder
    pub const E0105: DiagCode = DiagCode("E0105"); // buffer element type mismatch
    pub const E0106: DiagCode = DiagCode("E0106"); // zero-argument access
    pub const E0107: DiagCode = DiagCode("E0107"); // scalar read before bind
    pub const E0108: DiagCode = DiagCode("E0108"); // scalar value type mismatch
    pub const E0109: DiagCode = DiagCode("E0109"); // undefined image handle

    // ── Bounds-query protocol (E02xx) ──
    pub const E0200: DiagCode = DiagCode("E0200"); // illegal state transition
    pub const E0201: DiagCode = DiagCode("E0201"); // degenerate queried shape
    pub const E0202: DiagCode = DiagCode("E0202"); // host allocation failure
    pub const E0203: DiagCode = DiagCode("E0203"); // release without allocation
    pub const E0204: DiagCode = DiagCode("E0204"); // pipeline unusable
    pub const E0205: DiagCode = DiagCode("E0205"); // request already in flight
    pub const E0206: DiagCode = DiagCode("E0206"); // signature mismatch
    pub const E0207: DiagCode = DiagCode("E0207"); // host access out of bounds

    // ── Declarations (E03xx) ──
    pub const E0300: DiagCode = DiagCode("E0300"); // syntax error
    pub const E0301: DiagCode = DiagCode("E0301"); // unknown type
    pub const E0302: DiagCode = DiagCode("E0302"); // unknown name
    pub const E0303: DiagCode = DiagCode("E0303"); // duplicate name
    pub const E0304: DiagCode = DiagCode("E0304"); // malformed constraint target

    // ── Warnings ──
    pub const W0100: DiagCode = DiagCode("W0100"); // inverted scalar range
}

// ── Severity ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Secondary locations and causes ───────────────────────────────────────

/// Another place in the declaration file worth pointing at (the first
/// definition of a duplicate, for instance).
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

/// One link in a cause chain, e.g. a message the pipeline runtime reported.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ─────────────────────────────────────────────────────────────

/// A diagnostic emitted by the binding layer or the declaration front end.
///
/// API misuse carries no source span; declaration errors do.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span, hint, related spans, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic with a code.
    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    /// Shorthand for a warning-level diagnostic with a code.
    pub fn warning(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message).with_code(code)
    }

    /// Set the code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the primary source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// One line telling the caller how to fix it.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Append an underlying message, usually one latched by the runtime.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// True if this diagnostic carries the given code.
    pub fn has_code(&self, code: DiagCode) -> bool {
        self.code == Some(code)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  caused by: {}", cause.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_start() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn uncoded_error_renders_bare() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn warning_renders_its_code() {
        let d = Diagnostic::warning(codes::W0100, "range of p0 is inverted");
        assert_eq!(format!("{d}"), "warning[W0100]: range of p0 is inverted");
    }

    #[test]
    fn display_with_hint_and_cause() {
        let d = Diagnostic::error(codes::E0204, "pipeline 'render' is unusable")
            .with_hint("switch pipelines to re-initialize")
            .with_cause("device lost", None);
        assert_eq!(
            format!("{d}"),
            "error[E0204]: pipeline 'render' is unusable\n  hint: switch pipelines to re-initialize\n  caused by: device lost"
        );
    }

    #[test]
    fn builders_accumulate() {
        let d = Diagnostic::error(codes::E0302, "unknown name 'gain'")
            .with_span(at_start())
            .with_hint("declare it with `param gain : float32`")
            .with_related(at_start(), "first use here")
            .with_cause("referenced from a constraint", Some(at_start()));

        assert!(d.has_code(codes::E0302));
        assert!(d.is_error());
        assert!(d.span.is_some());
        assert_eq!(d.related_spans.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
    }
}
