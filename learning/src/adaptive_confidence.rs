//! Adjusts fix proposals using `DecisionStore` aggregates at the three
//! points the generator and reviewer consult: confidence stepping, prompt
//! feedback, and the auto-approve guard.

use alayasiki_core::code_model::{Confidence, FixType};

use crate::decision_store::{
    approval_rate, rejection_patterns, DecisionStore, RejectionPattern, MIN_DECISIONS_FOR_LEARNING,
};
use crate::error::LearningError;

pub const LOW_APPROVAL_THRESHOLD: f32 = 0.3;
pub const HIGH_APPROVAL_THRESHOLD: f32 = 0.9;
const AUTO_APPROVE_THRESHOLD: f32 = 0.5;
const REJECTION_PATTERN_THRESHOLD: f32 = 0.5;

pub struct AdaptiveConfidence<'a> {
    store: &'a DecisionStore,
}

impl<'a> AdaptiveConfidence<'a> {
    pub fn new(store: &'a DecisionStore) -> Self {
        Self { store }
    }

    /// Steps `base_confidence` up or down for `fix_type` within `repository`
    /// (when given), based on the approval rate of the last
    /// `MIN_DECISIONS_FOR_LEARNING`-or-more matching decisions. Below that
    /// threshold, there isn't enough signal and `base_confidence` passes
    /// through unchanged.
    pub async fn adjust_confidence(
        &self,
        base_confidence: Confidence,
        fix_type: FixType,
        repository: Option<&str>,
    ) -> Result<Confidence, LearningError> {
        let matching = self.matching_decisions(fix_type, repository).await?;
        if matching.len() < MIN_DECISIONS_FOR_LEARNING {
            return Ok(base_confidence);
        }

        let rate = approval_rate(&matching);
        if rate <= LOW_APPROVAL_THRESHOLD {
            Ok(base_confidence.step_down())
        } else if rate >= HIGH_APPROVAL_THRESHOLD {
            Ok(base_confidence.step_up_capped_at_medium())
        } else {
            Ok(base_confidence)
        }
    }

    /// Renders a "Historical Feedback" system-prompt block when any
    /// rejection pattern has rejected at least half of all matching
    /// decisions (with enough decisions to trust the signal). Returns
    /// `None` when no pattern crosses the threshold.
    pub async fn prompt_adjustment(
        &self,
        repository: Option<&str>,
    ) -> Result<Option<String>, LearningError> {
        let decisions = self.store.filter(repository, None).await?;
        if decisions.len() < MIN_DECISIONS_FOR_LEARNING {
            return Ok(None);
        }

        let patterns = rejection_patterns(&decisions);
        let significant: Vec<&RejectionPattern> =
            patterns.iter().filter(|p| p.rejection_rate >= REJECTION_PATTERN_THRESHOLD).collect();
        if significant.is_empty() {
            return Ok(None);
        }

        let low_approval_fix_types = low_approval_fix_types(&decisions);

        let mut block = String::from("Historical Feedback:\n");
        for pattern in &significant {
            block.push_str(&format!(
                "- Frequently rejected for {:?} ({:.0}% of decisions)\n",
                pattern.reason,
                pattern.rejection_rate * 100.0
            ));
            for comment in &pattern.sample_comments {
                block.push_str(&format!("  \"{comment}\"\n"));
            }
        }
        if !low_approval_fix_types.is_empty() {
            block.push_str(&format!("- Low approval fix types: {low_approval_fix_types:?}\n"));
        }

        Ok(Some(block))
    }

    /// `true` when `fix_type`'s approval rate is below 0.5 — the reviewer
    /// should not auto-approve even a high-confidence fix of this type.
    pub async fn should_skip_auto_approve(
        &self,
        fix_type: FixType,
        repository: Option<&str>,
    ) -> Result<bool, LearningError> {
        let matching = self.matching_decisions(fix_type, repository).await?;
        if matching.is_empty() {
            return Ok(false);
        }
        Ok(approval_rate(&matching) < AUTO_APPROVE_THRESHOLD)
    }

    async fn matching_decisions(
        &self,
        fix_type: FixType,
        repository: Option<&str>,
    ) -> Result<Vec<alayasiki_core::code_model::FixDecision>, LearningError> {
        let decisions = self.store.filter(repository, None).await?;
        Ok(decisions.into_iter().filter(|d| d.fix_type == fix_type).collect())
    }
}

fn low_approval_fix_types(decisions: &[alayasiki_core::code_model::FixDecision]) -> Vec<FixType> {
    let mut fix_types: Vec<FixType> = Vec::new();
    for decision in decisions {
        if !fix_types.contains(&decision.fix_type) {
            fix_types.push(decision.fix_type);
        }
    }

    fix_types
        .into_iter()
        .filter(|fix_type| {
            let matching: Vec<_> = decisions.iter().filter(|d| d.fix_type == *fix_type).cloned().collect();
            matching.len() >= MIN_DECISIONS_FOR_LEARNING && approval_rate(&matching) < AUTO_APPROVE_THRESHOLD
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alayasiki_core::code_model::{DecisionKind, FixDecision, RejectionReason};
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn decision(
        id: &str,
        decision: DecisionKind,
        reason: Option<RejectionReason>,
        fix_type: FixType,
        repository: &str,
        ts_secs: i64,
    ) -> FixDecision {
        FixDecision {
            id: id.to_string(),
            fix_id: format!("fix-{id}"),
            decision,
            rejection_reason: reason,
            rejection_comment: reason.map(|_| "style does not match our conventions".to_string()),
            fix_type,
            confidence: Confidence::Medium,
            finding_type: "null_check".to_string(),
            file_path: "a.py".to_string(),
            repository: repository.to_string(),
            timestamp: DateTime::<Utc>::from_timestamp(ts_secs, 0).unwrap(),
            characteristics: Default::default(),
        }
    }

    async fn store_with(decisions: Vec<FixDecision>) -> DecisionStore {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let store = DecisionStore::new(path);
        for decision in decisions {
            store.record(decision).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn confidence_unchanged_below_minimum_decision_count() {
        let store = store_with(vec![decision(
            "1",
            DecisionKind::Rejected,
            Some(RejectionReason::TooRisky),
            FixType::Security,
            "repo-a",
            1,
        )])
        .await;

        let adaptive = AdaptiveConfidence::new(&store);
        let result = adaptive.adjust_confidence(Confidence::High, FixType::Security, None).await.unwrap();
        assert_eq!(result, Confidence::High);
    }

    #[tokio::test]
    async fn confidence_steps_down_on_low_approval_rate() {
        let mut decisions = Vec::new();
        for i in 0..10 {
            decisions.push(decision(
                &i.to_string(),
                DecisionKind::Rejected,
                Some(RejectionReason::TooRisky),
                FixType::Security,
                "repo-a",
                i,
            ));
        }
        let store = store_with(decisions).await;

        let adaptive = AdaptiveConfidence::new(&store);
        let result = adaptive.adjust_confidence(Confidence::High, FixType::Security, None).await.unwrap();
        assert_eq!(result, Confidence::Medium);
    }

    #[tokio::test]
    async fn confidence_never_promotes_medium_to_high() {
        let mut decisions = Vec::new();
        for i in 0..10 {
            decisions.push(decision(&i.to_string(), DecisionKind::Approved, None, FixType::Security, "repo-a", i));
        }
        let store = store_with(decisions).await;

        let adaptive = AdaptiveConfidence::new(&store);
        let result = adaptive.adjust_confidence(Confidence::Medium, FixType::Security, None).await.unwrap();
        assert_eq!(result, Confidence::Medium);
    }

    #[tokio::test]
    async fn prompt_adjustment_surfaces_frequent_rejection_reason() {
        let mut decisions = Vec::new();
        for i in 0..8 {
            decisions.push(decision(
                &i.to_string(),
                DecisionKind::Rejected,
                Some(RejectionReason::StyleMismatch),
                FixType::Simplify,
                "repo-a",
                i,
            ));
        }
        for i in 8..10 {
            decisions.push(decision(&i.to_string(), DecisionKind::Approved, None, FixType::Simplify, "repo-a", i));
        }
        let store = store_with(decisions).await;

        let adaptive = AdaptiveConfidence::new(&store);
        let block = adaptive.prompt_adjustment(None).await.unwrap();
        let block = block.expect("rejection rate exceeds threshold");
        assert!(block.contains("Historical Feedback"));
        assert!(block.contains("StyleMismatch"));
    }

    #[tokio::test]
    async fn should_skip_auto_approve_below_half_approval() {
        let mut decisions = Vec::new();
        for i in 0..3 {
            decisions.push(decision(&i.to_string(), DecisionKind::Approved, None, FixType::Remove, "repo-a", i));
        }
        for i in 3..10 {
            decisions.push(decision(
                &i.to_string(),
                DecisionKind::Rejected,
                Some(RejectionReason::NotNeeded),
                FixType::Remove,
                "repo-a",
                i,
            ));
        }
        let store = store_with(decisions).await;

        let adaptive = AdaptiveConfidence::new(&store);
        assert!(adaptive.should_skip_auto_approve(FixType::Remove, None).await.unwrap());
    }
}
