//! Consistency validator.
//!
//! Cross-checks the tracked fields across layers. Advisory only: it reports
//! and proposes resolutions but never writes to a layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::evidence::{ContextField, SourceEvidence, normalize_value};

/// Fields compared across layers.
pub const TRACKED_FIELDS: [ContextField; 4] = [
    ContextField::SessionId,
    ContextField::Progress,
    ContextField::Phase,
    ContextField::Timestamp,
];

/// Field values as reported by one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub layer_id: String,
    /// Reliability of the layer, 0-100.
    pub authority: f64,
    pub fields: BTreeMap<ContextField, String>,
}

impl LayerSnapshot {
    pub fn new(layer_id: impl Into<String>, authority: f64) -> Self {
        Self {
            layer_id: layer_id.into(),
            authority,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: ContextField, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// `None` for unavailable evidence.
    pub fn from_evidence(evidence: &SourceEvidence) -> Option<Self> {
        evidence.available.then(|| Self {
            layer_id: evidence.source_id.clone(),
            authority: evidence.reliability_score,
            fields: evidence.extracted_fields.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ValueMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub issue_type: IssueType,
    pub field: ContextField,
    pub description: String,
    /// Layers that disagree with the authoritative value.
    pub affected_layers: Vec<String>,
    pub severity: ConsistencySeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub layers_checked: usize,
    pub issues: Vec<ConsistencyIssue>,
    pub consistency_score: f64,
    pub overall_consistent: bool,
    pub checked_at: DateTime<Utc>,
}

/// Proposed value for a conflicting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub field: ContextField,
    pub chosen_value: String,
    pub source_layer: String,
    pub overridden_layers: Vec<String>,
}

/// Coverage and redundancy summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyAnalysis {
    /// Number of layers reporting each tracked field.
    pub field_coverage: BTreeMap<ContextField, usize>,
    /// Share of tracked field slots filled across all layers, 0-100.
    pub redundancy_effectiveness: f64,
    pub consistency_score: f64,
    pub recommendations: Vec<String>,
}

/// Outcome of comparing one field across layers.
struct FieldComparison<'a> {
    authoritative: &'a LayerSnapshot,
    value: String,
    reporters: Vec<&'a LayerSnapshot>,
    disagreeing: Vec<&'a LayerSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    penalty_per_issue: f64,
}

impl Default for ConsistencyValidator {
    fn default() -> Self {
        Self {
            penalty_per_issue: 5.0,
        }
    }
}

impl ConsistencyValidator {
    pub fn new(penalty_per_issue: f64) -> Self {
        Self { penalty_per_issue }
    }

    /// One issue per tracked field with more than one distinct value.
    pub fn cross_validate(&self, layers: &[LayerSnapshot]) -> ConsistencyReport {
        let mut issues = Vec::new();
        for field in TRACKED_FIELDS {
            let Some(cmp) = compare(field, layers) else {
                continue;
            };
            if cmp.disagreeing.is_empty() {
                continue;
            }
            let affected: Vec<String> = cmp
                .disagreeing
                .iter()
                .map(|l| l.layer_id.clone())
                .collect();
            let values: BTreeSet<String> = cmp
                .reporters
                .iter()
                .filter_map(|l| l.fields.get(&field))
                .map(|v| normalize_value(field, v))
                .collect();
            issues.push(ConsistencyIssue {
                issue_type: IssueType::ValueMismatch,
                field,
                description: format!(
                    "{field} differs across layers: {} (authoritative {} from {})",
                    values.into_iter().collect::<Vec<_>>().join(", "),
                    cmp.value,
                    cmp.authoritative.layer_id
                ),
                affected_layers: affected,
                severity: severity(field, &cmp),
            });
        }

        let consistency_score = self.score(issues.len());
        if !issues.is_empty() {
            tracing::warn!(
                issues = issues.len(),
                score = consistency_score,
                "Layers disagree"
            );
        }
        ConsistencyReport {
            layers_checked: layers.len(),
            overall_consistent: issues.is_empty(),
            issues,
            consistency_score,
            checked_at: Utc::now(),
        }
    }

    /// `max(0, 100 - penalty * issues)`; never increases with more issues.
    pub fn score(&self, issue_count: usize) -> f64 {
        (100.0 - self.penalty_per_issue * issue_count as f64).max(0.0)
    }

    /// Authoritative value for every conflicting tracked field.
    pub fn resolve_conflicts(&self, layers: &[LayerSnapshot]) -> Vec<ConflictResolution> {
        TRACKED_FIELDS
            .into_iter()
            .filter_map(|field| {
                let cmp = compare(field, layers)?;
                if cmp.disagreeing.is_empty() {
                    return None;
                }
                Some(ConflictResolution {
                    field,
                    chosen_value: cmp.authoritative.fields.get(&field)?.clone(),
                    source_layer: cmp.authoritative.layer_id.clone(),
                    overridden_layers: cmp
                        .disagreeing
                        .iter()
                        .map(|l| l.layer_id.clone())
                        .collect(),
                })
            })
            .collect()
    }

    pub fn analyze_consistency(&self, layers: &[LayerSnapshot]) -> ConsistencyAnalysis {
        let report = self.cross_validate(layers);
        let field_coverage: BTreeMap<ContextField, usize> = TRACKED_FIELDS
            .into_iter()
            .map(|field| {
                let count = layers
                    .iter()
                    .filter(|l| l.fields.contains_key(&field))
                    .count();
                (field, count)
            })
            .collect();

        let slots = layers.len() * TRACKED_FIELDS.len();
        let filled: usize = field_coverage.values().sum();
        let redundancy_effectiveness = if slots == 0 {
            0.0
        } else {
            filled as f64 / slots as f64 * 100.0
        };

        let mut recommendations = Vec::new();
        if !report.issues.is_empty() {
            let fields: Vec<&str> = report.issues.iter().map(|i| i.field.as_str()).collect();
            recommendations.push(format!(
                "Store a fresh snapshot to resynchronise layers ({})",
                fields.join(", ")
            ));
        }
        for (field, count) in &field_coverage {
            if *count < 2 {
                recommendations.push(format!(
                    "{field} is held by {count} layer(s); redundancy needs at least two"
                ));
            }
        }
        if redundancy_effectiveness < 80.0 && slots > 0 {
            recommendations.push(format!(
                "Redundancy effectiveness is {redundancy_effectiveness:.0}%; check failing layers"
            ));
        }

        ConsistencyAnalysis {
            field_coverage,
            redundancy_effectiveness,
            consistency_score: report.consistency_score,
            recommendations,
        }
    }
}

fn compare<'a>(field: ContextField, layers: &'a [LayerSnapshot]) -> Option<FieldComparison<'a>> {
    let reporters: Vec<&LayerSnapshot> = layers
        .iter()
        .filter(|l| l.fields.contains_key(&field))
        .collect();
    let authoritative = *reporters.iter().max_by(|a, b| {
        a.authority
            .total_cmp(&b.authority)
            .then_with(|| b.layer_id.cmp(&a.layer_id))
    })?;
    let value = normalize_value(field, authoritative.fields.get(&field)?);
    let disagreeing = reporters
        .iter()
        .copied()
        .filter(|l| {
            l.fields
                .get(&field)
                .is_some_and(|v| normalize_value(field, v) != value)
        })
        .collect();
    Some(FieldComparison {
        authoritative,
        value,
        reporters,
        disagreeing,
    })
}

/// Session id splits are always critical. Otherwise severity follows the
/// share of reporting authority that disagrees.
fn severity(field: ContextField, cmp: &FieldComparison<'_>) -> ConsistencySeverity {
    if field == ContextField::SessionId {
        return ConsistencySeverity::Critical;
    }
    let total: f64 = cmp.reporters.iter().map(|l| l.authority).sum();
    let against: f64 = cmp.disagreeing.iter().map(|l| l.authority).sum();
    let share = if total > 0.0 { against / total } else { 0.0 };
    if share >= 0.5 {
        ConsistencySeverity::High
    } else if share >= 0.25 {
        ConsistencySeverity::Medium
    } else {
        ConsistencySeverity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn progress_layers(values: &[(&str, f64, &str)]) -> Vec<LayerSnapshot> {
        values
            .iter()
            .map(|(id, authority, progress)| {
                LayerSnapshot::new(*id, *authority).with_field(ContextField::Progress, *progress)
            })
            .collect()
    }

    #[test]
    fn agreeing_layers_are_consistent() {
        let layers = progress_layers(&[("a", 90.0, "40"), ("b", 70.0, "40.0")]);
        let report = ConsistencyValidator::default().cross_validate(&layers);
        assert!(report.overall_consistent);
        assert_eq!(report.consistency_score, 100.0);
    }

    #[test]
    fn minority_disagreement_is_one_issue_against_authority() {
        let layers = progress_layers(&[("a", 90.0, "40"), ("b", 70.0, "40"), ("c", 60.0, "55")]);
        let validator = ConsistencyValidator::default();
        let report = validator.cross_validate(&layers);

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].affected_layers, vec!["c".to_string()]);
        assert_eq!(report.issues[0].severity, ConsistencySeverity::Medium);
        assert_eq!(report.consistency_score, 95.0);

        let resolutions = validator.resolve_conflicts(&layers);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].chosen_value, "40");
        assert_eq!(resolutions[0].source_layer, "a");
    }

    #[test]
    fn session_split_is_critical() {
        let layers = vec![
            LayerSnapshot::new("a", 90.0).with_field(ContextField::SessionId, "s1"),
            LayerSnapshot::new("b", 60.0).with_field(ContextField::SessionId, "s2"),
        ];
        let report = ConsistencyValidator::default().cross_validate(&layers);
        assert_eq!(report.issues[0].severity, ConsistencySeverity::Critical);
    }

    #[test]
    fn score_never_increases_with_more_issues() {
        let validator = ConsistencyValidator::default();
        let scores: Vec<f64> = (0..30).map(|n| validator.score(n)).collect();
        assert!(scores.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(validator.score(25), 0.0);
    }

    #[test]
    fn analysis_flags_thin_coverage() {
        let layers = vec![
            LayerSnapshot::new("a", 90.0)
                .with_field(ContextField::SessionId, "s1")
                .with_field(ContextField::Progress, "10"),
            LayerSnapshot::new("b", 80.0).with_field(ContextField::SessionId, "s1"),
        ];
        let analysis = ConsistencyValidator::default().analyze_consistency(&layers);
        assert_eq!(analysis.field_coverage[&ContextField::SessionId], 2);
        assert_eq!(analysis.field_coverage[&ContextField::Phase], 0);
        assert_eq!(analysis.redundancy_effectiveness, 37.5);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.starts_with("progress is held by 1"))
        );
    }
}
