use std::fmt;

use xck_schemas::{HexError, UnitKey};

// ---------------------------------------------------------------------------
// Mismatch
// ---------------------------------------------------------------------------

/// Structural mismatch after normalization.
///
/// `expected` is always the reference-side value (or the left-hand side of a
/// same-source cross-check); `actual` is the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonError {
    /// What was being compared (e.g. `"raw block by number"`).
    pub label: String,
    /// Path of the first divergent field (`$` for the record root).
    pub path: String,
    pub expected: String,
    pub actual: String,
    /// Rendered diff of every divergent path, one `-`/`+` pair per path.
    pub diff: String,
    /// Owning block, for unit-level checks.
    pub unit: Option<UnitKey>,
}

impl ComparisonError {
    pub fn new(
        label: impl Into<String>,
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let expected = expected.into();
        let actual = actual.into();
        let diff = format!("- {path}: {expected}\n+ {path}: {actual}");
        Self {
            label: label.into(),
            path,
            expected,
            actual,
            diff,
            unit: None,
        }
    }

    pub fn with_diff(mut self, diff: String) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_unit(mut self, unit: UnitKey) -> Self {
        self.unit = Some(unit);
        self
    }
}

impl fmt::Display for ComparisonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(unit) = self.unit {
            write!(f, "block {unit}: ")?;
        }
        write!(
            f,
            "{} mismatch at {}: expected {}, got {}\n{}",
            self.label, self.path, self.expected, self.actual, self.diff
        )
    }
}

impl std::error::Error for ComparisonError {}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// A normalization step could not parse its input.
///
/// Distinct from [`ComparisonError`]: it points at a normalization rule that
/// no longer matches the wire format, not at a divergence between sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolDecodeError {
    #[error("{what}: expected a JSON object")]
    NotAnObject { what: String },
    #[error("{what}: field '{field}' is missing")]
    MissingField { what: String, field: String },
    #[error("{what}: field '{field}' is not a {expected}")]
    WrongShape {
        what: String,
        field: String,
        expected: &'static str,
    },
    #[error("{what}: field '{field}' is not valid hex: {source}")]
    Hex {
        what: String,
        field: String,
        #[source]
        source: HexError,
    },
    #[error("istanbul extra data is {got} bytes, shorter than the {vanity}-byte vanity")]
    ExtraTooShort { got: usize, vanity: usize },
    #[error("istanbul extra rlp: {0}")]
    Rlp(String),
    #[error("decode {what}: {message}")]
    Json { what: String, message: String },
}

// ---------------------------------------------------------------------------
// Combined
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompareError {
    #[error(transparent)]
    Mismatch(#[from] ComparisonError),
    #[error(transparent)]
    Protocol(#[from] ProtocolDecodeError),
}

impl CompareError {
    pub fn with_unit(self, unit: UnitKey) -> Self {
        match self {
            CompareError::Mismatch(e) => CompareError::Mismatch(e.with_unit(unit)),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// A tolerated divergence. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Receipt `index` of `unit` differs only in the reference side carrying an
    /// effective gas price the candidate lacks. Seen on the block right after
    /// the migration boundary, whose parent state was still dangling.
    DanglingState { unit: UnitKey, index: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DanglingState { unit, index } => write!(
                f,
                "dangling state at block {} (receipt {index} of block {unit})",
                unit.saturating_sub(1)
            ),
        }
    }
}
