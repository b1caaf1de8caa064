use std::fmt;

use xck_compare::{CompareError, ComparisonError, ProtocolDecodeError};
use xck_fetch::FetchError;
use xck_schemas::UnitKey;

/// An observation or window broke a structural invariant the fetchers are
/// supposed to guarantee (e.g. per-transaction vectors of different lengths).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant violated: {message}")]
pub struct InvariantViolation {
    pub message: String,
}

impl InvariantViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cause
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Fetch,
    Comparison,
    ProtocolDecode,
    Invariant,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Comparison => "comparison",
            FailureKind::ProtocolDecode => "protocol decode",
            FailureKind::Invariant => "invariant",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

/// The underlying failure.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Compare(#[from] CompareError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("{0}")]
    Internal(String),
}

impl From<ComparisonError> for FailureCause {
    fn from(e: ComparisonError) -> Self {
        FailureCause::Compare(e.into())
    }
}

impl From<ProtocolDecodeError> for FailureCause {
    fn from(e: ProtocolDecodeError) -> Self {
        FailureCause::Compare(e.into())
    }
}

impl FailureCause {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureCause::Fetch(e) if e.is_cancelled() => FailureKind::Cancelled,
            FailureCause::Fetch(_) => FailureKind::Fetch,
            FailureCause::Compare(CompareError::Mismatch(_)) => FailureKind::Comparison,
            FailureCause::Compare(CompareError::Protocol(_)) => FailureKind::ProtocolDecode,
            FailureCause::Invariant(_) => FailureKind::Invariant,
            FailureCause::Internal(_) => FailureKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal run error
// ---------------------------------------------------------------------------

/// The one terminal error a run reports: what failed, where, and how far the
/// contiguous verified prefix had reached.
#[derive(Debug)]
pub struct ReconcileError {
    pub cause: FailureCause,
    pub unit: Option<UnitKey>,
    /// Window index (`start / size`) for window-level failures.
    pub window: Option<u64>,
    pub contiguous: Option<UnitKey>,
}

impl ReconcileError {
    pub fn new(cause: impl Into<FailureCause>) -> Self {
        Self {
            cause: cause.into(),
            unit: None,
            window: None,
            contiguous: None,
        }
    }

    pub fn at_unit(mut self, unit: UnitKey) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn at_window(mut self, window: u64) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_contiguous(mut self, contiguous: Option<UnitKey>) -> Self {
        self.contiguous = contiguous;
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.cause.kind()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }

    pub fn comparison(&self) -> Option<&ComparisonError> {
        match &self.cause {
            FailureCause::Compare(CompareError::Mismatch(e)) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure", self.kind().as_str())?;
        match (self.unit, self.window) {
            (Some(unit), _) => write!(f, " at block {unit}")?,
            (None, Some(window)) => write!(f, " in window {window}")?,
            (None, None) => {}
        }
        write!(f, ": {}; ", self.cause)?;
        match self.contiguous {
            Some(c) => write!(f, "contiguous verified through block {c}"),
            None => write!(f, "no block verified contiguously yet"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
