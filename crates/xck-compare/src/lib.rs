//! xck-compare
//!
//! Equality between what the legacy node and the migrated node report.
//!
//! Three strategies, picked by record kind:
//! - decoded blocks and transactions: domain comparators (`typed`)
//! - everything else decoded: generic structural equality (`diff`)
//! - raw JSON records: normalization (`normalize`) on both sides, then
//!   structural equality
//!
//! Pure. The comparator only ever works on local copies.

pub mod diff;
pub mod error;
pub mod extra;
pub mod normalize;
pub mod raw;
pub mod rules;
pub mod typed;

use serde::Serialize;
use serde_json::Value;
use xck_schemas::{Block, Transaction, UnitKey};

pub use diff::{compare_serialized, compare_values, diff_values, Divergence};
pub use error::{CompareError, ComparisonError, ProtocolDecodeError, Warning};
pub use extra::{strip_aggregated_seal, AggregatedSeal, IstanbulExtra, ISTANBUL_EXTRA_VANITY};
pub use normalize::Normalizer;
pub use raw::Field;
pub use rules::{Rule, RuleSet};

/// Comparator configured for one run (rule toggles + the chain's boundary).
#[derive(Debug, Clone)]
pub struct Comparator {
    normalizer: Normalizer,
}

impl Comparator {
    pub fn new(rules: RuleSet, boundary: UnitKey) -> Self {
        Self {
            normalizer: Normalizer::new(rules, boundary),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn rules(&self) -> &RuleSet {
        self.normalizer.rules()
    }

    pub fn blocks(&self, label: &str, expected: &Block, actual: &Block) -> Result<(), ComparisonError> {
        typed::compare_blocks(label, expected, actual)
    }

    pub fn transactions(
        &self,
        label: &str,
        expected: &[Transaction],
        actual: &[Transaction],
    ) -> Result<(), ComparisonError> {
        typed::compare_transaction_lists(label, expected, actual)
    }

    pub fn records<T>(&self, label: &str, expected: &T, actual: &T) -> Result<(), ComparisonError>
    where
        T: PartialEq + Serialize + ?Sized,
    {
        compare_serialized(label, expected, actual)
    }

    pub fn values(&self, label: &str, expected: &Value, actual: &Value) -> Result<(), ComparisonError> {
        compare_values(label, expected, actual)
    }

    /// Compare one raw receipt pair (candidate already normalized).
    ///
    /// A pair that differs while the reference carries an effective gas price
    /// and the candidate does not is re-compared without that one field. If
    /// that makes them equal the divergence is tolerated and reported as a
    /// [`Warning`]; any other difference still fails with the original error.
    pub fn raw_receipt(
        &self,
        unit: UnitKey,
        index: usize,
        reference: &Value,
        candidate: &Value,
    ) -> Result<Option<Warning>, ComparisonError> {
        let label = format!("raw receipt {index}");
        let Err(err) = compare_values(&label, reference, candidate) else {
            return Ok(None);
        };

        let asymmetric = Field::of(reference, "effectiveGasPrice").is_present()
            && Field::of(candidate, "effectiveGasPrice").is_missing();
        if !self.rules().is_enabled(Rule::DanglingState) || !asymmetric {
            return Err(err);
        }

        let strip = |v: &Value| {
            let mut v = v.clone();
            if let Some(map) = v.as_object_mut() {
                map.remove("effectiveGasPrice");
            }
            v
        };
        match compare_values(&label, &strip(reference), &strip(candidate)) {
            Ok(()) => Ok(Some(Warning::DanglingState { unit, index })),
            Err(_) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dangling_state_is_a_warning_only_when_isolated() {
        let cmp = Comparator::new(RuleSet::all(), 0);
        let reference = json!({"status": "0x1", "effectiveGasPrice": "0x5"});

        let candidate = json!({"status": "0x1"});
        let warning = cmp.raw_receipt(7, 0, &reference, &candidate).unwrap();
        assert_eq!(warning, Some(Warning::DanglingState { unit: 7, index: 0 }));

        let also_null = json!({"status": "0x1", "effectiveGasPrice": null});
        assert!(cmp.raw_receipt(7, 0, &reference, &also_null).unwrap().is_some());

        let other_diff = json!({"status": "0x0"});
        let err = cmp.raw_receipt(7, 0, &reference, &other_diff).unwrap_err();
        assert_eq!(err.path, "$.effectiveGasPrice");
    }

    #[test]
    fn dangling_state_needs_the_reference_side_priced() {
        let cmp = Comparator::new(RuleSet::all(), 0);
        let reference = json!({"status": "0x1"});
        let candidate = json!({"status": "0x1", "effectiveGasPrice": "0x5"});
        assert!(cmp.raw_receipt(1, 0, &reference, &candidate).is_err());

        let off = Comparator::new(RuleSet::all().without(Rule::DanglingState), 0);
        let priced = json!({"status": "0x1", "effectiveGasPrice": "0x5"});
        assert!(off.raw_receipt(1, 0, &priced, &json!({"status": "0x1"})).is_err());
    }
}
