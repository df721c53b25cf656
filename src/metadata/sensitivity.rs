// SPDX-License-Identifier: MIT

//! Static keyword sensitivity check.
//!
//! A substring heuristic, not a classifier: false positives and negatives
//! are expected and acceptable. A richer term list can be layered on via
//! [`classify_with_terms`] without changing the contract.

/// Fixed keyword set checked against prompt text.
const SENSITIVE_TERMS: &[&str] = &[
    "nsfw", "nude", "naked", "sex", "porn", "adult", "xxx", "erotic", "explicit",
];

/// True when any fixed term occurs in `text` as a substring,
/// case-insensitively.
pub fn classify_sensitivity(text: &str) -> bool {
    classify_with_terms(text, &[])
}

/// Sensitivity check with caller-supplied extra terms appended to the fixed
/// set.
pub fn classify_with_terms(text: &str, extra: &[String]) -> bool {
    let lowered = text.to_lowercase();
    SENSITIVE_TERMS.iter().any(|term| lowered.contains(term))
        || extra
            .iter()
            .filter(|term| !term.is_empty())
            .any(|term| lowered.contains(&term.to_lowercase()))
}
