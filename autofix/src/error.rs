//! Typed error taxonomy for `BestOfNGenerator::generate`. Entitlement
//! failures and "no candidate survived" are surfaced to the caller;
//! per-candidate verification failure is never one of these (§7's fifth
//! kind is an internal filter, not an error).

use thiserror::Error;

use alayasiki_core::entitlements::EntitlementError;

#[derive(Debug, Error)]
pub enum AutoFixError {
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error("no candidate passed syntax/import/test verification")]
    NoVerifiedCandidates,

    #[error("no candidate satisfied require_all_tests_pass")]
    NoCandidatePassedAllTests,

    #[error("top-ranked candidate score {top_score:.3} is below the configured minimum {min_score:.3}")]
    BelowMinScore { top_score: f32, min_score: f32 },
}
