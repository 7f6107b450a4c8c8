// decision-intel-service/src/calibration.rs
// ============================================================================
// Module: Calibration Service
// Description: Read-only Brier/accuracy/drift/reason-stat analysis over
//              reviewed decisions (§4.8).
// Purpose: Tell an agent (or operator) whether stated confidence tracks
//          actual outcomes.
// Dependencies: decision-intel-core
// ============================================================================

//! ## Overview
//! Every method here reads the store through a [`DecisionFilter`] and a
//! [`Window`] and performs pure arithmetic; nothing is mutated (§4.8: "read-
//! only, no state mutation"). `Partial` outcomes score `0.5` by default, but
//! a caller may supply an [`OutcomeScale`] override — the mapping is an
//! explicit open question (§9) the spec leaves for the implementation to
//! parameterise rather than hardcode.

use std::collections::BTreeMap;

use decision_intel_core::AgentId;
use decision_intel_core::Category;
use decision_intel_core::DecisionFilter;
use decision_intel_core::DecisionRecord;
use decision_intel_core::Outcome;
use decision_intel_core::PageRequest;
use decision_intel_core::ReasonType;
use decision_intel_core::Stakes;
use decision_intel_core::Status;
use decision_intel_core::Store;
use decision_intel_core::StoreError;
use decision_intel_core::Timestamp;
use decision_intel_core::filter::MAX_PAGE_LIMIT;
use serde::Serialize;
use thiserror::Error;

/// Rolling window presets accepted by `getCalibration` (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Days30,
    Days60,
    Days90,
    All,
}

impl Window {
    /// Translates the preset into a `date_from` bound relative to `now`;
    /// `All` has no lower bound (§4.8).
    #[must_use]
    pub fn date_from(self, now: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Days30 => Some(now.plus_millis(-30 * 24 * 60 * 60 * 1000)),
            Self::Days60 => Some(now.plus_millis(-60 * 24 * 60 * 60 * 1000)),
            Self::Days90 => Some(now.plus_millis(-90 * 24 * 60 * 60 * 1000)),
            Self::All => None,
        }
    }
}

/// Overridable mapping from [`Outcome`] to the scalar used in Brier and
/// accuracy math (§4.8, §9). Defaults to [`Outcome::default_scalar`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeScale {
    pub success: f64,
    pub partial: f64,
    pub failure: f64,
    pub abandoned: f64,
}

impl Default for OutcomeScale {
    fn default() -> Self {
        Self { success: 1.0, partial: 0.5, failure: 0.0, abandoned: 0.0 }
    }
}

impl OutcomeScale {
    fn scalar(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Success => self.success,
            Outcome::Partial => self.partial,
            Outcome::Failure => self.failure,
            Outcome::Abandoned => self.abandoned,
        }
    }
}

/// Selection criteria for a calibration query (§4.8).
#[derive(Debug, Clone, Default)]
pub struct CalibrationQuery {
    pub agent: Option<AgentId>,
    pub category: Option<Category>,
    pub stakes: Option<Stakes>,
    pub project: Option<String>,
    pub feature: Option<String>,
    pub window: Option<Window>,
}

/// One confidence bucket's aggregate stats (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBucket {
    pub label: &'static str,
    pub decisions: usize,
    pub success_rate: f64,
    pub expected_rate: f64,
    pub gap: f64,
    pub interpretation: &'static str,
}

/// Confidence variance across the selected decisions (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceVariance {
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub habituation_suspected: bool,
}

/// Full calibration report for a query (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub decisions_considered: usize,
    pub brier_score: f64,
    pub accuracy: f64,
    pub mean_confidence: f64,
    pub calibration_gap: f64,
    pub buckets: Vec<ConfidenceBucket>,
    pub variance: ConfidenceVariance,
}

/// Per-reason-type usage and calibration stats (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct ReasonTypeStats {
    pub reason_type: ReasonType,
    pub total_uses: usize,
    pub reviewed_uses: usize,
    pub success_count: usize,
    pub avg_confidence: f64,
    pub avg_strength: f64,
    pub brier_score: Option<f64>,
    pub diversity: f64,
}

/// Drift comparison between a recent window and an older baseline (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub recent_brier: f64,
    pub baseline_brier: f64,
    pub recent_accuracy: f64,
    pub baseline_accuracy: f64,
    pub drift_alert: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration store error: {0}")]
    Store(#[from] StoreError),
}

/// Read-only calibration analysis over the decision store (§4.8).
pub struct CalibrationService<'a> {
    store: &'a dyn Store,
    scale: OutcomeScale,
}

impl<'a> CalibrationService<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store, scale: OutcomeScale::default() }
    }

    #[must_use]
    pub fn with_scale(mut self, scale: OutcomeScale) -> Self {
        self.scale = scale;
        self
    }

    fn reviewed_records(&self, filter: &DecisionFilter) -> Result<Vec<DecisionRecord>, CalibrationError> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.list(filter, PageRequest { offset, limit: MAX_PAGE_LIMIT })?;
            let fetched = page.items.len();
            out.extend(page.items.into_iter().filter(|record| record.status == Status::Reviewed && record.outcome.is_some()));
            if fetched < MAX_PAGE_LIMIT || offset + fetched >= page.total {
                break;
            }
            offset += fetched;
        }
        Ok(out)
    }

    fn filter_for(&self, query: &CalibrationQuery, now: Timestamp) -> DecisionFilter {
        let mut filter = DecisionFilter {
            category: query.category,
            stakes: query.stakes,
            agent: query.agent.clone(),
            project: query.project.clone(),
            status: Some(Status::Reviewed),
            ..DecisionFilter::default()
        };
        if let Some(window) = query.window {
            filter.date_range.from = window.date_from(now);
        }
        filter
    }

    /// Computes the full calibration report (§4.8).
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] on a store failure.
    pub fn get_calibration(&self, query: &CalibrationQuery, now: Timestamp) -> Result<CalibrationReport, CalibrationError> {
        let filter = self.filter_for(query, now);
        let mut records = self.reviewed_records(&filter)?;
        if let Some(feature) = &query.feature {
            records.retain(|record| record.project_context.feature.as_deref() == Some(feature.as_str()));
        }
        Ok(self.report_for(&records))
    }

    fn report_for(&self, records: &[DecisionRecord]) -> CalibrationReport {
        let n = records.len();
        if n == 0 {
            return CalibrationReport {
                decisions_considered: 0,
                brier_score: 0.0,
                accuracy: 0.0,
                mean_confidence: 0.0,
                calibration_gap: 0.0,
                buckets: bucket_defs().into_iter().map(|(lo, hi, label)| ConfidenceBucket {
                    label,
                    decisions: 0,
                    success_rate: 0.0,
                    expected_rate: bucket_midpoint(lo, hi),
                    gap: 0.0,
                    interpretation: "insufficient_data",
                }).collect(),
                variance: ConfidenceVariance { stddev: 0.0, min: 0.0, max: 0.0, habituation_suspected: false },
            };
        }

        let scalars: Vec<f64> = records.iter().map(|record| self.scale.scalar(record.outcome.expect("reviewed"))).collect();
        let confidences: Vec<f64> = records.iter().map(|record| record.confidence).collect();

        let brier = scalars.iter().zip(&confidences).map(|(s, c)| (c - s).powi(2)).sum::<f64>() / n as f64;
        let accuracy = scalars.iter().filter(|s| **s >= 0.5).count() as f64 / n as f64;
        let mean_confidence = confidences.iter().sum::<f64>() / n as f64;
        let calibration_gap = accuracy - mean_confidence;

        let buckets = bucket_defs()
            .into_iter()
            .map(|(lo, hi, label)| {
                let in_bucket: Vec<usize> = (0..n).filter(|&i| in_bucket_range(confidences[i], lo, hi)).collect();
                let count = in_bucket.len();
                let success_rate = if count == 0 {
                    0.0
                } else {
                    in_bucket.iter().filter(|&&i| scalars[i] >= 0.5).count() as f64 / count as f64
                };
                let expected_rate = bucket_midpoint(lo, hi);
                let gap = success_rate - expected_rate;
                let interpretation = if count == 0 {
                    "insufficient_data"
                } else if gap.abs() < 0.05 {
                    "well_calibrated"
                } else if gap < -0.15 {
                    "overconfident"
                } else if gap < 0.0 {
                    "slightly_overconfident"
                } else if gap > 0.15 {
                    "underconfident"
                } else {
                    "slightly_underconfident"
                };
                ConfidenceBucket { label, decisions: count, success_rate, expected_rate, gap, interpretation }
            })
            .collect();

        let mean = mean_confidence;
        let variance_value = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n as f64;
        let stddev = variance_value.sqrt();
        let min = confidences.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = confidences.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let habituation_suspected = stddev < 0.05 && n >= 10;

        CalibrationReport {
            decisions_considered: n,
            brier_score: brier,
            accuracy,
            mean_confidence,
            calibration_gap,
            buckets,
            variance: ConfidenceVariance { stddev, min, max, habituation_suspected },
        }
    }

    /// Computes per-reason-type usage and calibration stats (§4.8).
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] on a store failure.
    pub fn get_reason_stats(&self, query: &CalibrationQuery, now: Timestamp) -> Result<Vec<ReasonTypeStats>, CalibrationError> {
        let filter = self.filter_for(query, now);
        let records = self.reviewed_records(&filter)?;

        let mut totals: BTreeMap<ReasonType, Vec<(f64, f64, f64, usize)>> = BTreeMap::new();
        let mut diversity_numerator: BTreeMap<ReasonType, f64> = BTreeMap::new();

        for record in &records {
            let distinct_types = record.reasons.iter().map(|r| r.reason_type).collect::<std::collections::BTreeSet<_>>().len().max(1);
            let scalar = self.scale.scalar(record.outcome.expect("reviewed"));
            for reason in &record.reasons {
                totals.entry(reason.reason_type).or_default().push((record.confidence, reason.strength, scalar, distinct_types));
                *diversity_numerator.entry(reason.reason_type).or_insert(0.0) += distinct_types as f64;
            }
        }

        Ok(totals
            .into_iter()
            .map(|(reason_type, uses)| {
                let reviewed_uses = uses.len();
                let success_count = uses.iter().filter(|(_, _, scalar, _)| *scalar >= 0.5).count();
                let avg_confidence = uses.iter().map(|(c, _, _, _)| c).sum::<f64>() / reviewed_uses.max(1) as f64;
                let avg_strength = uses.iter().map(|(_, s, _, _)| s).sum::<f64>() / reviewed_uses.max(1) as f64;
                let brier_score = if reviewed_uses == 0 {
                    None
                } else {
                    Some(uses.iter().map(|(c, _, scalar, _)| (c - scalar).powi(2)).sum::<f64>() / reviewed_uses as f64)
                };
                let diversity = diversity_numerator.get(&reason_type).copied().unwrap_or(0.0) / reviewed_uses.max(1) as f64;
                ReasonTypeStats {
                    reason_type,
                    total_uses: reviewed_uses,
                    reviewed_uses,
                    success_count,
                    avg_confidence,
                    avg_strength,
                    brier_score,
                    diversity,
                }
            })
            .collect())
    }

    /// Compares a recent 30-day window against an older baseline and flags
    /// drift if Brier worsens by at least 20% or accuracy drops by at least
    /// 10 percentage points (§4.8). Requires at least 90 days of reviewed
    /// history to form a baseline.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] on a store failure.
    pub fn check_drift(&self, query: &CalibrationQuery, now: Timestamp) -> Result<DriftReport, CalibrationError> {
        let mut base_query = query.clone();
        base_query.window = Some(Window::All);
        let filter = self.filter_for(&base_query, now);
        let all_records = self.reviewed_records(&filter)?;

        let ninety_days_ago = now.plus_millis(-90 * 24 * 60 * 60 * 1000);
        let earliest = all_records.iter().map(|r| r.created_at).min();
        let Some(earliest) = earliest else {
            return Ok(DriftReport {
                recent_brier: 0.0,
                baseline_brier: 0.0,
                recent_accuracy: 0.0,
                baseline_accuracy: 0.0,
                drift_alert: false,
                reason: Some("no reviewed decisions available".to_string()),
            });
        };
        if earliest > ninety_days_ago {
            return Ok(DriftReport {
                recent_brier: 0.0,
                baseline_brier: 0.0,
                recent_accuracy: 0.0,
                baseline_accuracy: 0.0,
                drift_alert: false,
                reason: Some("fewer than 90 days of reviewed history".to_string()),
            });
        }

        let thirty_days_ago = now.plus_millis(-30 * 24 * 60 * 60 * 1000);
        let recent: Vec<DecisionRecord> = all_records.iter().filter(|r| r.created_at >= thirty_days_ago).cloned().collect();
        let baseline: Vec<DecisionRecord> = all_records.iter().filter(|r| r.created_at < thirty_days_ago).cloned().collect();

        let recent_report = self.report_for(&recent);
        let baseline_report = self.report_for(&baseline);

        let brier_worsened = baseline_report.brier_score > 0.0
            && recent_report.brier_score >= baseline_report.brier_score * 1.2;
        let accuracy_dropped = baseline_report.accuracy - recent_report.accuracy >= 0.10;
        let drift_alert = brier_worsened || accuracy_dropped;

        Ok(DriftReport {
            recent_brier: recent_report.brier_score,
            baseline_brier: baseline_report.brier_score,
            recent_accuracy: recent_report.accuracy,
            baseline_accuracy: baseline_report.accuracy,
            drift_alert,
            reason: if drift_alert {
                Some(if brier_worsened { "brier score worsened by 20% or more".to_string() } else { "accuracy dropped by 10 points or more".to_string() })
            } else {
                None
            },
        })
    }
}

fn bucket_defs() -> Vec<(f64, f64, &'static str)> {
    vec![
        (0.0, 0.5, "0.0-0.5"),
        (0.5, 0.7, "0.5-0.7"),
        (0.7, 0.9, "0.7-0.9"),
        (0.9, 1.0, "0.9-1.0"),
        (1.0, 1.0, "1.0"),
    ]
}

fn in_bucket_range(confidence: f64, lo: f64, hi: f64) -> bool {
    if lo == hi {
        confidence >= lo
    } else {
        confidence >= lo && confidence < hi
    }
}

fn bucket_midpoint(lo: f64, hi: f64) -> f64 {
    if lo == hi { lo } else { (lo + hi) / 2.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_intel_core::AgentId as Agent;
    use decision_intel_core::Bridge;
    use decision_intel_core::BridgeMethod;
    use decision_intel_core::DeliberationTrace;
    use decision_intel_core::ProjectContext;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct MemStore(Mutex<Vec<DecisionRecord>>);

    impl Store for MemStore {
        fn put(&self, record: DecisionRecord) -> Result<decision_intel_core::PutOutcome, StoreError> {
            self.0.lock().unwrap().push(record);
            Ok(decision_intel_core::PutOutcome::Created)
        }
        fn get(&self, id: &decision_intel_core::DecisionId) -> Result<DecisionRecord, StoreError> {
            self.0.lock().unwrap().iter().find(|r| &r.id == id).cloned().ok_or_else(|| StoreError::NotFound(id.clone()))
        }
        fn list(&self, filter: &DecisionFilter, page: PageRequest) -> Result<decision_intel_core::Page<DecisionRecord>, StoreError> {
            let all: Vec<DecisionRecord> = self.0.lock().unwrap().iter().filter(|r| {
                filter.status.map_or(true, |s| s == r.status)
            }).cloned().collect();
            let total = all.len();
            let items = all.into_iter().skip(page.offset).take(page.limit).collect();
            Ok(decision_intel_core::Page { items, total, offset: page.offset })
        }
        fn reset(&self) -> Result<(), StoreError> {
            self.0.lock().unwrap().clear();
            Ok(())
        }
    }

    fn record(confidence: f64, outcome: Outcome, created_at: Timestamp) -> DecisionRecord {
        DecisionRecord {
            id: decision_intel_core::DecisionId::parse("aaaaaaaa").unwrap(),
            created_at,
            updated_at: created_at,
            reviewed_at: Some(created_at),
            recorded_by: Agent::new("agent-1"),
            decision: "do a thing".to_string(),
            confidence,
            category: Category::Architecture,
            stakes: Stakes::Medium,
            context: None,
            status: Status::Reviewed,
            outcome: Some(outcome),
            outcome_result: None,
            lessons: None,
            reasons: Vec::new(),
            tags: BTreeSet::new(),
            pattern: None,
            bridge: Bridge::default(),
            bridge_method: BridgeMethod::None,
            deliberation: DeliberationTrace::default(),
            related: Vec::new(),
            project_context: ProjectContext::default(),
        }
    }

    #[test]
    fn brier_and_accuracy_match_even_split_scenario() {
        let now = Timestamp::now();
        let mut records = Vec::new();
        for _ in 0..5 {
            records.push(record(0.9, Outcome::Success, now));
        }
        for _ in 0..5 {
            records.push(record(0.9, Outcome::Failure, now));
        }
        let store = MemStore(Mutex::new(records));
        let service = CalibrationService::new(&store);
        let report = service.get_calibration(&CalibrationQuery::default(), now).expect("report");
        assert_eq!(report.decisions_considered, 10);
        assert!((report.brier_score - 0.405).abs() < 1e-9);
        assert!((report.accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_input_yields_zeroed_report() {
        let store = MemStore(Mutex::new(Vec::new()));
        let service = CalibrationService::new(&store);
        let report = service.get_calibration(&CalibrationQuery::default(), Timestamp::now()).expect("report");
        assert_eq!(report.decisions_considered, 0);
        assert_eq!(report.brier_score, 0.0);
    }

    #[test]
    fn habituation_flag_trips_on_low_variance() {
        let now = Timestamp::now();
        let records: Vec<DecisionRecord> = (0..10).map(|i| record(0.8, if i % 2 == 0 { Outcome::Success } else { Outcome::Failure }, now)).collect();
        let store = MemStore(Mutex::new(records));
        let service = CalibrationService::new(&store);
        let report = service.get_calibration(&CalibrationQuery::default(), now).expect("report");
        assert!(report.variance.habituation_suspected);
    }
}
