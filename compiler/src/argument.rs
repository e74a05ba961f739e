// argument.rs — Argument declarations and pipeline signatures
//
// An `Argument` is what a parameter handle contributes to a pipeline's
// external signature for ahead-of-time compilation: a name, whether it is a
// buffer, its element type and (for buffers) its dimensionality. A
// `Signature` is the ordered argument list of one entry point.
//
// Preconditions: none.
// Postconditions: argument names within one signature are unique.
// Failure modes: pushing a duplicate name is a usage error (E0303).
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::types::ScalarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentKind {
    Scalar,
    Buffer,
}

/// One declared argument of a pipeline entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Argument {
    pub name: String,
    pub kind: ArgumentKind,
    #[serde(rename = "type")]
    pub ty: ScalarType,
    pub dimensions: usize,
}

impl Argument {
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Argument {
            name: name.into(),
            kind: ArgumentKind::Scalar,
            ty,
            dimensions: 0,
        }
    }

    pub fn buffer(name: impl Into<String>, ty: ScalarType, dimensions: usize) -> Self {
        Argument {
            name: name.into(),
            kind: ArgumentKind::Buffer,
            ty,
            dimensions,
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.kind == ArgumentKind::Buffer
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArgumentKind::Scalar => write!(f, "{}: {}", self.name, self.ty),
            ArgumentKind::Buffer => write!(f, "{}: {}[{}]", self.name, self.ty, self.dimensions),
        }
    }
}

// ── Signature ───────────────────────────────────────────────────────────────

/// Ordered external signature of one pipeline entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Signature {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Builder form of `push` for signatures known to be well formed.
    pub fn with(mut self, arg: Argument) -> Result<Self, Diagnostic> {
        self.push(arg)?;
        Ok(self)
    }

    pub fn push(&mut self, arg: Argument) -> Result<(), Diagnostic> {
        if self.arguments.iter().any(|a| a.name == arg.name) {
            return Err(Diagnostic::error(
                codes::E0303,
                format!(
                    "argument '{}' declared twice in signature of {}",
                    arg.name, self.name
                ),
            ));
        }
        self.arguments.push(arg);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.is_buffer())
    }

    /// Compact JSON with fields in declaration order.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`.
    pub fn fingerprint(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Hex string of the fingerprint (64 characters).
    pub fn fingerprint_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.fingerprint() {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Signature {
        Signature::new("blur")
            .with(Argument::buffer("input", ScalarType::uint(8), 2))
            .unwrap()
            .with(Argument::scalar("gain", ScalarType::float(32)))
            .unwrap()
            .with(Argument::buffer("output", ScalarType::uint(8), 2))
            .unwrap()
    }

    #[test]
    fn duplicate_argument_is_rejected() {
        let mut sig = sample();
        let err = sig
            .push(Argument::scalar("gain", ScalarType::int(32)))
            .unwrap_err();
        assert!(err.has_code(codes::E0303));
        assert_eq!(sig.arguments.len(), 3);
    }

    #[test]
    fn display_lists_arguments_in_order() {
        assert_eq!(
            sample().to_string(),
            "blur(input: uint8[2], gain: float32, output: uint8[2])"
        );
        assert_eq!(sample().buffers().count(), 2);
    }

    #[test]
    fn canonical_json_is_compact() {
        let json = sample().canonical_json();
        assert!(!json.contains(' '));
        assert!(json.starts_with(r#"{"name":"blur","arguments":[{"name":"input","kind":"buffer","type":"uint8","dimensions":2}"#));
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        assert_eq!(sample().fingerprint_hex(), sample().fingerprint_hex());
        assert_eq!(sample().fingerprint_hex().len(), 64);

        let mut reordered = sample();
        reordered.arguments.swap(0, 1);
        assert_ne!(sample().fingerprint(), reordered.fingerprint());
    }
}
