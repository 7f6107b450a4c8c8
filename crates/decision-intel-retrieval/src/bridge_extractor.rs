// decision-intel-retrieval/src/bridge_extractor.rs
// ============================================================================
// Module: Bridge Extractor
// Description: Heuristic structure/function extraction from decision text
//              (§4.4).
// Purpose: Populate a decision's Minsky-style bridge when the caller does
//          not supply one explicitly.
// Dependencies: decision-intel-core
// ============================================================================

//! ## Overview
//! [`extract`] splits decision (and optional context) text into clauses and
//! scores each clause for purpose-oriented language ("to", "enables", "so
//! that", "prevents") versus implementation-oriented language, picking the
//! strongest clause for each bridge side (§4.4). This module only ever
//! returns [`BridgeMethod::Rule`] or [`BridgeMethod::None`]; the caller
//! composes that with whatever the request supplied explicitly to derive
//! [`BridgeMethod::Explicit`] / [`BridgeMethod::BothExtracted`].

use decision_intel_core::Bridge;
use decision_intel_core::BridgeMethod;
use decision_intel_core::Reason;
use decision_intel_core::ReasonType;

/// Markers that indicate purpose-oriented ("why") language (§4.4).
const FUNCTION_MARKERS: &[&str] =
    &["to ", "in order to", "so that", "enables", "enable", "prevents", "prevent", "allows", "allow", "ensures", "ensure", "so it"];
/// Markers that indicate implementation-oriented ("what") language (§4.4).
const STRUCTURE_MARKERS: &[&str] = &[
    "using", "via", "implement", "implemented", "service", "queue", "database", "api", "endpoint",
    "index", "cache", "table", "client", "server", "module", "handler",
];
/// Clause separators used to split decision/context text into candidates.
const CLAUSE_SEPARATORS: &[&str] = &[", ", "; ", " so that ", " because ", " in order to "];

/// Result of a heuristic bridge extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// The extracted bridge (structure/function only; other fields empty).
    pub bridge: Bridge,
    /// Provenance of the extraction.
    pub method: BridgeMethod,
}

/// Extracts a `{structure, function}` bridge from `decision_text` and
/// optional `context`, preferring the highest-strength `analysis` reason as
/// the function source when one is supplied (§4.4).
#[must_use]
pub fn extract(decision_text: &str, context: Option<&str>, reasons: &[Reason]) -> Extraction {
    let mut clauses = split_clauses(decision_text);
    if let Some(context) = context {
        clauses.extend(split_clauses(context));
    }
    clauses.retain(|clause| !clause.trim().is_empty());

    let preferred_function = preferred_analysis_reason(reasons);

    let function = preferred_function.or_else(|| best_clause(&clauses, function_score));
    let structure = best_clause(
        &clauses,
        |clause| {
            let is_function_clause = function.as_deref() == Some(clause);
            if is_function_clause { 0 } else { structure_score(clause) }
        },
    )
    .or_else(|| clauses.first().cloned());

    let structure = structure.map(|text| truncate_to_cap(&text));
    let function = function.map(|text| truncate_to_cap(&text));

    let method = match (&structure, &function) {
        (None, None) => BridgeMethod::None,
        _ => BridgeMethod::Rule,
    };

    Extraction {
        bridge: Bridge {
            structure,
            function,
            tolerance: None,
            enforcement: None,
            prevention: None,
        },
        method,
    }
}

/// Returns the text of the highest-strength `analysis` reason, if any
/// (§4.4: "the highest-strength analysis reason is a preferred function
/// source").
fn preferred_analysis_reason(reasons: &[Reason]) -> Option<String> {
    reasons
        .iter()
        .filter(|reason| reason.reason_type == ReasonType::Analysis)
        .max_by(|a, b| a.strength.total_cmp(&b.strength))
        .map(|reason| reason.text.clone())
}

fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = vec![text.to_string()];
    for separator in CLAUSE_SEPARATORS {
        clauses = clauses.iter().flat_map(|clause| clause.split(separator)).map(str::trim).map(str::to_string).collect();
    }
    clauses.retain(|clause| !clause.is_empty());
    clauses
}

fn best_clause(clauses: &[String], score: impl Fn(&str) -> i32) -> Option<String> {
    clauses
        .iter()
        .map(|clause| (clause, score(clause)))
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(clause, _)| clause.clone())
}

fn function_score(clause: &str) -> i32 {
    marker_count(clause, FUNCTION_MARKERS)
}

fn structure_score(clause: &str) -> i32 {
    marker_count(clause, STRUCTURE_MARKERS)
}

fn marker_count(clause: &str, markers: &[&str]) -> i32 {
    let lower = clause.to_lowercase();
    markers.iter().filter(|marker| lower.contains(*marker)).count() as i32
}

fn truncate_to_cap(text: &str) -> String {
    if text.chars().count() <= Bridge::MAX_AUTO_EXTRACTED_LEN {
        return text.to_string();
    }
    text.chars().take(Bridge::MAX_AUTO_EXTRACTED_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_purpose_language_for_function_side() {
        let extraction = extract(
            "Use a circuit breaker in the client, to prevent cascading failures under load",
            None,
            &[],
        );
        assert_eq!(extraction.method, BridgeMethod::Rule);
        let function = extraction.bridge.function.expect("function side");
        assert!(function.to_lowercase().contains("prevent"));
    }

    #[test]
    fn prefers_highest_strength_analysis_reason_for_function() {
        let reasons = vec![
            Reason {
                reason_type: ReasonType::Analysis,
                text: "reduces tail latency under partial outages".to_string(),
                strength: 0.95,
            },
            Reason {
                reason_type: ReasonType::Pattern,
                text: "matches known retry pattern".to_string(),
                strength: 0.99,
            },
        ];
        let extraction = extract("adopt exponential backoff", None, &reasons);
        assert_eq!(extraction.bridge.function.as_deref(), Some("reduces tail latency under partial outages"));
    }

    #[test]
    fn empty_text_yields_none_method() {
        let extraction = extract("   ", None, &[]);
        assert_eq!(extraction.method, BridgeMethod::None);
        assert!(extraction.bridge.is_empty());
    }

    #[test]
    fn long_extracted_side_is_truncated_to_cap() {
        let long_clause = "to ".to_string() + &"x".repeat(Bridge::MAX_AUTO_EXTRACTED_LEN + 50);
        let extraction = extract(&long_clause, None, &[]);
        let function = extraction.bridge.function.expect("function side");
        assert_eq!(function.chars().count(), Bridge::MAX_AUTO_EXTRACTED_LEN);
    }
}
