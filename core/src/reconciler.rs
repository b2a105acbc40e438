//! Recovery reconciler.
//!
//! Merges evidence into one reconstructed state. For each field the
//! candidate from the most reliable source wins; ties go to the most
//! recently probed source, then to the lexicographically smallest source id,
//! so the same evidence always yields the same state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ThresholdConfig;
use crate::evidence::{ContextElement, ContextField, SourceEvidence, normalize_value};
use crate::snapshot::SessionId;

/// Confidence below which a reconstruction loses validation points.
const LOW_CONFIDENCE: f64 = 70.0;

/// Best-effort state rebuilt from surviving evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedState {
    pub session_id: SessionId,
    /// 0-100.
    pub confidence: f64,
    /// One resolved element per field.
    pub elements: BTreeMap<ContextField, ContextElement>,
    pub missing_fields: Vec<ContextField>,
    pub recommended_actions: Vec<String>,
    /// Fields whose candidates disagreed.
    pub conflicts: Vec<ContextField>,
    pub sources_total: usize,
    pub sources_available: usize,
    pub reconstructed_at: DateTime<Utc>,
}

impl ReconstructedState {
    pub fn value(&self, field: ContextField) -> Option<&str> {
        self.elements.get(&field).map(|e| e.value.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }
}

/// Score of a reconstruction against the essentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionValidation {
    pub valid: bool,
    pub score: f64,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    manual_verification_confidence: f64,
    availability_bonus: f64,
    pass_score: f64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::from_thresholds(&ThresholdConfig::default())
    }
}

impl Reconciler {
    pub fn from_thresholds(thresholds: &ThresholdConfig) -> Self {
        Self {
            manual_verification_confidence: thresholds.manual_verification_confidence,
            availability_bonus: thresholds.availability_bonus,
            pass_score: thresholds.reconstruction_pass_score,
        }
    }

    pub fn reconstruct(
        &self,
        session_id: &SessionId,
        evidence: &[SourceEvidence],
    ) -> ReconstructedState {
        let sources_total = evidence.len();
        let available: Vec<&SourceEvidence> = evidence.iter().filter(|e| e.available).collect();
        let sources_available = available.len();

        let mut candidates: BTreeMap<ContextField, Vec<ContextElement>> = BTreeMap::new();
        for source in &available {
            for (field, value) in &source.extracted_fields {
                candidates.entry(*field).or_default().push(ContextElement {
                    field: *field,
                    value: value.clone(),
                    source_id: source.source_id.clone(),
                    confidence: source.reliability_score,
                    extracted_at: source.probed_at,
                });
            }
        }

        let mut elements = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (field, mut group) in candidates {
            let distinct: BTreeSet<String> = group
                .iter()
                .map(|e| normalize_value(field, &e.value))
                .collect();
            if distinct.len() > 1 {
                conflicts.push(field);
            }
            group.sort_by(precedence);
            if let Some(winner) = group.into_iter().next() {
                elements.insert(field, winner);
            }
        }

        let missing_fields: Vec<ContextField> = ContextField::ESSENTIAL
            .into_iter()
            .filter(|field| !elements.contains_key(field))
            .collect();

        if elements.is_empty() {
            tracing::warn!(
                session = %session_id,
                sources = sources_total,
                "No evidence resolved; manual recovery required"
            );
            return ReconstructedState {
                session_id: session_id.clone(),
                confidence: 0.0,
                elements,
                missing_fields,
                recommended_actions: vec![
                    "Perform manual recovery: no source yielded usable state".to_string(),
                ],
                conflicts,
                sources_total,
                sources_available,
                reconstructed_at: Utc::now(),
            };
        }

        let mean =
            elements.values().map(|e| e.confidence).sum::<f64>() / elements.len() as f64;
        let coverage = sources_available as f64 / sources_total as f64;
        let confidence = (mean + self.availability_bonus * coverage).min(100.0);

        let mut recommended_actions: Vec<String> = missing_fields
            .iter()
            .map(|field| recovery_hint(*field).to_string())
            .collect();
        if confidence < self.manual_verification_confidence {
            recommended_actions
                .push("Manually verify the reconstructed state before continuing".to_string());
        }

        ReconstructedState {
            session_id: session_id.clone(),
            confidence,
            elements,
            missing_fields,
            recommended_actions,
            conflicts,
            sources_total,
            sources_available,
            reconstructed_at: Utc::now(),
        }
    }

    /// Score a reconstruction: -20 for low confidence, -15 per missing
    /// essential, -10 per conflicting field.
    pub fn validate_reconstruction(&self, state: &ReconstructedState) -> ReconstructionValidation {
        let mut score: f64 = 100.0;
        let mut issues = Vec::new();

        if state.confidence < LOW_CONFIDENCE {
            score -= 20.0;
            issues.push(format!(
                "Low reconstruction confidence: {:.1}%",
                state.confidence
            ));
        }
        for field in &state.missing_fields {
            score -= 15.0;
            issues.push(format!("Missing essential field: {field}"));
        }
        for field in &state.conflicts {
            score -= 10.0;
            issues.push(format!("Conflicting values for {field}"));
        }

        let score = score.max(0.0);
        ReconstructionValidation {
            valid: score >= self.pass_score,
            score,
            issues,
        }
    }
}

/// Higher confidence first, then newer, then smaller source id.
fn precedence(a: &ContextElement, b: &ContextElement) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.extracted_at.cmp(&a.extracted_at))
        .then_with(|| a.source_id.cmp(&b.source_id))
}

fn recovery_hint(field: ContextField) -> &'static str {
    match field {
        ContextField::SessionId => "Re-establish the session id from the latest status file or commit",
        ContextField::Phase => "Confirm the current phase against the project plan",
        ContextField::Progress => "Re-estimate progress from completed tasks",
        ContextField::CompilationStatus => "Run the build to re-establish compilation status",
        ContextField::NextActions => "Re-derive next actions from open issues and the plan",
        ContextField::Timestamp => "Record a fresh snapshot to restore the timestamp",
        ContextField::CommitCount | ContextField::LatestCommit => "Inspect the commit history",
        ContextField::ProjectLayout => "Inspect the project layout",
    }
}
