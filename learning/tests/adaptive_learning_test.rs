use alayasiki_core::code_model::{Confidence, DecisionKind, FixDecision, FixType, RejectionReason};
use chrono::{DateTime, Utc};
use learning::{AdaptiveConfidence, DecisionStore};
use tempfile::tempdir;

fn decision(id: &str, decision: DecisionKind, fix_type: FixType, repository: &str, ts_secs: i64) -> FixDecision {
    FixDecision {
        id: id.to_string(),
        fix_id: format!("fix-{id}"),
        decision,
        rejection_reason: if decision == DecisionKind::Rejected { Some(RejectionReason::IncorrectLogic) } else { None },
        rejection_comment: None,
        fix_type,
        confidence: Confidence::Medium,
        finding_type: "off_by_one".to_string(),
        file_path: "src/lib.rs".to_string(),
        repository: repository.to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(ts_secs, 0).unwrap(),
        characteristics: Default::default(),
    }
}

#[tokio::test]
async fn decisions_persist_across_store_instances_and_drive_confidence_adjustment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("decisions.jsonl");

    {
        let store = DecisionStore::new(&path);
        for i in 0..12 {
            let kind = if i < 2 { DecisionKind::Approved } else { DecisionKind::Rejected };
            store.record(decision(&i.to_string(), kind, FixType::Extract, "repo-a", i)).await.unwrap();
        }
    }

    let reopened = DecisionStore::new(&path);
    let adaptive = AdaptiveConfidence::new(&reopened);

    let adjusted = adaptive
        .adjust_confidence(Confidence::High, FixType::Extract, Some("repo-a"))
        .await
        .unwrap();
    assert_eq!(adjusted, Confidence::Medium);

    assert!(adaptive.should_skip_auto_approve(FixType::Extract, Some("repo-a")).await.unwrap());
}

#[tokio::test]
async fn repository_scoping_keeps_statistics_independent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("decisions.jsonl");
    let store = DecisionStore::new(&path);

    for i in 0..10 {
        store.record(decision(&format!("a{i}"), DecisionKind::Rejected, FixType::Security, "repo-a", i)).await.unwrap();
    }
    for i in 0..10 {
        store.record(decision(&format!("b{i}"), DecisionKind::Approved, FixType::Security, "repo-b", i)).await.unwrap();
    }

    let adaptive = AdaptiveConfidence::new(&store);
    assert!(adaptive.should_skip_auto_approve(FixType::Security, Some("repo-a")).await.unwrap());
    assert!(!adaptive.should_skip_auto_approve(FixType::Security, Some("repo-b")).await.unwrap());
}
