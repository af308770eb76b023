//! Append-only JSONL log of human fix decisions. Grounded on
//! `core/src/audit.rs`'s `JsonlAuditSink`: a single-writer lock serializes
//! appends, each of which is flushed before `record` returns. Unlike the
//! audit sink, reads serve statistics queries (`approval_rate`,
//! `rejection_patterns`, `trend`) so the decoded decisions are cached in
//! memory after the first load rather than re-parsed per query.

use std::path::{Path, PathBuf};

use alayasiki_core::code_model::{DecisionKind, FixDecision, RejectionReason};
use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::LearningError;

/// Below this many matching decisions, statistics are considered
/// insufficiently supported to drive an automated adjustment.
pub const MIN_DECISIONS_FOR_LEARNING: usize = 10;

pub struct DecisionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Option<Vec<FixDecision>>>,
}

impl DecisionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()), cache: RwLock::new(None) }
    }

    fn resolved_path(&self) -> PathBuf {
        expand_tilde(&self.path)
    }

    /// Loads the entire file into memory if it has not already been loaded.
    /// The in-memory cache is the source of truth for every subsequent read
    /// in the process lifetime.
    async fn ensure_loaded(&self) -> Result<(), LearningError> {
        {
            let cache = self.cache.read().await;
            if cache.is_some() {
                return Ok(());
            }
        }

        let path = self.resolved_path();
        let decisions = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str::<FixDecision>)
                .collect::<Result<Vec<_>, _>>()?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let mut cache = self.cache.write().await;
        *cache = Some(decisions);
        Ok(())
    }

    /// Appends `decision` to the JSONL file and to the in-memory cache.
    /// Writes are serialized by `write_lock`; the file is flushed before
    /// this returns.
    pub async fn record(&self, decision: FixDecision) -> Result<(), LearningError> {
        self.ensure_loaded().await?;
        let _permit = self.write_lock.lock().await;

        let path = self.resolved_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let line = serde_json::to_string(&decision)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut cache = self.cache.write().await;
        cache.get_or_insert_with(Vec::new).push(decision);
        Ok(())
    }

    /// All decisions, in file order (oldest first).
    pub async fn all(&self) -> Result<Vec<FixDecision>, LearningError> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().await;
        Ok(cache.clone().unwrap_or_default())
    }

    /// Decisions matching `repository` (if given) and at-or-after `since`
    /// (if given). A linear scan over the in-memory cache, per the decided
    /// approach for a dataset this store is sized for.
    pub async fn filter(
        &self,
        repository: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FixDecision>, LearningError> {
        let all = self.all().await?;
        Ok(all
            .into_iter()
            .filter(|decision| match repository {
                Some(repo) => decision.repository == repo,
                None => true,
            })
            .filter(|decision| match since {
                Some(since) => decision.timestamp >= since,
                None => true,
            })
            .collect())
    }
}

/// `(approved + modified) / total`, or `0.0` for an empty slice.
pub fn approval_rate(decisions: &[FixDecision]) -> f32 {
    if decisions.is_empty() {
        return 0.0;
    }
    let approved = decisions.iter().filter(|d| d.counts_as_approval()).count();
    approved as f32 / decisions.len() as f32
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectionPattern {
    pub reason: RejectionReason,
    pub count: usize,
    pub rejection_rate: f32,
    pub sample_comments: Vec<String>,
}

/// Groups rejected decisions by `rejection_reason` and computes, for each
/// reason, its share of the full decision set (not just of rejections) —
/// this is what §4.6's `rejection_rate ≥ 0.5` threshold is checked against.
pub fn rejection_patterns(decisions: &[FixDecision]) -> Vec<RejectionPattern> {
    if decisions.is_empty() {
        return Vec::new();
    }

    let total = decisions.len();
    let mut reasons: Vec<RejectionReason> = Vec::new();
    for decision in decisions {
        if decision.decision == DecisionKind::Rejected {
            if let Some(reason) = decision.rejection_reason {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        }
    }

    reasons
        .into_iter()
        .map(|reason| {
            let matching: Vec<&FixDecision> = decisions
                .iter()
                .filter(|d| {
                    d.decision == DecisionKind::Rejected && d.rejection_reason == Some(reason)
                })
                .collect();

            let sample_comments = matching
                .iter()
                .filter_map(|d| d.rejection_comment.as_deref())
                .take(3)
                .map(|comment| truncate_chars(comment, 200))
                .collect();

            RejectionPattern {
                reason,
                count: matching.len(),
                rejection_rate: matching.len() as f32 / total as f32,
                sample_comments,
            }
        })
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Splits `decisions` (assumed sorted oldest-first) into two halves and
/// compares their approval rates: `Improving` if the second half exceeds
/// the first by more than 0.1, `Declining` if the reverse, else `Stable`.
pub fn trend(decisions: &[FixDecision]) -> Trend {
    if decisions.len() < 2 {
        return Trend::Stable;
    }

    let mut sorted = decisions.to_vec();
    sorted.sort_by_key(|d| d.timestamp);

    let midpoint = sorted.len() / 2;
    let first_half_rate = approval_rate(&sorted[..midpoint]);
    let second_half_rate = approval_rate(&sorted[midpoint..]);

    if second_half_rate - first_half_rate > 0.1 {
        Trend::Improving
    } else if first_half_rate - second_half_rate > 0.1 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Some(path_str) = path.to_str() else { return path.to_path_buf() };
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
