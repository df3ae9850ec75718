// src/analyze/reconcile.rs
//! Combines the primary and secondary labels into one.

use crate::model::Label::{self, Fake as F, Real as R, Uncertain as U, Unknown as K};

/// Rows: primary label. Columns: secondary label. Order: FAKE, REAL, UNCERTAIN, UNKNOWN.
///
/// A failed primary (UNKNOWN) dominates, so a degraded prediction is never
/// upgraded by the second opinion alone.
const TABLE: [[Label; 4]; 4] = [
    //        FAKE REAL UNC  UNK
    /* F */ [F, U, F, U],
    /* R */ [U, R, R, U],
    /* U */ [F, R, U, U],
    /* K */ [K, K, K, K],
];

/// Reconciled label for a primary result and an optional second opinion.
/// Without a second opinion the primary label stands.
pub fn reconcile(primary: Label, secondary: Option<Label>) -> Label {
    match secondary {
        Some(s) => TABLE[primary.index()][s.index()],
        None => primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_keeps_label() {
        assert_eq!(reconcile(F, Some(F)), F);
        assert_eq!(reconcile(R, Some(R)), R);
    }

    #[test]
    fn disagreement_is_uncertain() {
        assert_eq!(reconcile(F, Some(R)), U);
        assert_eq!(reconcile(R, Some(F)), U);
    }

    #[test]
    fn uncertain_defers_to_decisive_side() {
        assert_eq!(reconcile(R, Some(U)), R);
        assert_eq!(reconcile(F, Some(U)), F);
        assert_eq!(reconcile(U, Some(F)), F);
        assert_eq!(reconcile(U, Some(R)), R);
        assert_eq!(reconcile(U, Some(U)), U);
    }

    #[test]
    fn unknown_primary_dominates() {
        for s in Label::ALL {
            assert_eq!(reconcile(K, Some(s)), K);
        }
        assert_eq!(reconcile(K, None), K);
    }

    #[test]
    fn missing_second_opinion_keeps_primary() {
        for p in Label::ALL {
            assert_eq!(reconcile(p, None), p);
        }
    }

    #[test]
    fn table_is_symmetric_on_decisive_labels() {
        for a in [F, R, U] {
            for b in [F, R, U] {
                assert_eq!(reconcile(a, Some(b)), reconcile(b, Some(a)), "{a} vs {b}");
            }
        }
    }
}
