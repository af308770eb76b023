//! Typed entitlement-gating service, following the same typed-policy-object
//! shape as [`crate::auth::Authorizer`]: a small service object with a
//! `check`-style gate rather than a bag of booleans the caller has to
//! interpret itself.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use thiserror::Error;

use crate::code_model::{AccessLevel, Entitlement, Tier};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntitlementError {
    #[error("auto-fix is not available on the {tier:?} tier")]
    Unavailable {
        tier: Tier,
        access: AccessLevel,
        upgrade_url: Option<String>,
        addon_url: Option<String>,
    },
    #[error("monthly auto-fix limit reached: {used}/{limit}")]
    LimitExceeded {
        used: i64,
        limit: i64,
        resets_at: DateTime<Utc>,
    },
}

const PRICING_URL: &str = "https://repotoire.dev/pricing";
const ADDON_URL: &str = "https://repotoire.dev/addons/autofix";

/// First instant of the next UTC calendar month.
pub fn next_month_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid calendar date")
}

/// Validates entitlement gates and records usage. Holds no state of its
/// own: the `Entitlement` snapshot is supplied by, and returned to, the
/// caller's external accounting collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Entitlements;

impl Entitlements {
    pub fn new() -> Self {
        Self
    }

    /// Pre-flight gate run before any LLM call in `generate_fix`.
    pub fn check(&self, entitlement: &Entitlement, now: DateTime<Utc>) -> Result<(), EntitlementError> {
        if !entitlement.is_available() {
            let upgrade_url = matches!(entitlement.tier, Tier::Free).then(|| PRICING_URL.to_string());
            let addon_url = (matches!(entitlement.tier, Tier::Pro)
                && matches!(entitlement.access, AccessLevel::Addon))
            .then(|| ADDON_URL.to_string());
            return Err(EntitlementError::Unavailable {
                tier: entitlement.tier,
                access: entitlement.access,
                upgrade_url,
                addon_url,
            });
        }

        if !entitlement.is_within_limit() {
            return Err(EntitlementError::LimitExceeded {
                used: entitlement.monthly_runs_used,
                limit: entitlement.monthly_runs_limit,
                resets_at: next_month_boundary(now),
            });
        }

        Ok(())
    }

    /// Clamp a requested candidate count to the entitlement's ceiling.
    pub fn clamp_n(&self, requested_n: u32, entitlement: &Entitlement) -> u32 {
        requested_n.min(entitlement.max_n)
    }

    /// Record a successful (or confirmed-non-refundable) run, incrementing
    /// the monthly usage counter. Enterprise tier with an unlimited quota
    /// skips accounting entirely.
    pub fn record_usage(&self, entitlement: &Entitlement) -> Entitlement {
        if entitlement.monthly_runs_limit < 0 {
            return *entitlement;
        }
        let mut updated = *entitlement;
        updated.monthly_runs_used += 1;
        updated
    }
}
