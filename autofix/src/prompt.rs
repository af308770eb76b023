//! Builds the LLM prompt for one candidate and parses the model's JSON
//! response back into the pieces of a `FixProposal`.

use alayasiki_core::code_model::{CodeChange, Evidence, Finding};
use alayasiki_core::llm::{ChatMessage, GenerateRequest, ResponseFormat};
use serde::Deserialize;

const BASE_SYSTEM_PROMPT: &str = "You are an automated code-fix generator. \
Given a finding, propose a minimal, correct fix. Respond with a single JSON \
object with keys: title, description, rationale, evidence (an object with \
documentation_refs, best_practice_notes, similar_patterns, rag_snippets \
arrays of strings), and changes (an array of objects with file_path, \
original_code, fixed_code, start_line, end_line).";

/// Builds the request for one candidate. `historical_feedback`, when
/// present, is appended verbatim to the system prompt (the "Historical
/// Feedback" block `AdaptiveConfidence` renders from `DecisionStore`
/// aggregates).
pub fn build_request(
    finding: &Finding,
    rag_snippets: &[String],
    temperature: f32,
    seed: u64,
    historical_feedback: Option<&str>,
) -> GenerateRequest {
    let mut system = BASE_SYSTEM_PROMPT.to_string();
    if let Some(feedback) = historical_feedback {
        system.push_str("\n\n");
        system.push_str(feedback);
    }

    let mut user_message = format!(
        "Finding: {}\nSeverity: {:?}\nDescription: {}\nAffected files: {}\n",
        finding.title,
        finding.severity,
        finding.description,
        finding.affected_files.join(", "),
    );
    if !rag_snippets.is_empty() {
        user_message.push_str("\nRelevant code retrieved from the repository:\n");
        for snippet in rag_snippets {
            user_message.push_str(snippet);
            user_message.push('\n');
        }
    }

    GenerateRequest::new(vec![ChatMessage::user(user_message)])
        .with_system(system)
        .with_temperature(temperature)
        .with_seed(seed)
        .with_response_format(ResponseFormat::Json)
}

#[derive(Debug, Deserialize, Default)]
struct RawEvidence {
    #[serde(default)]
    documentation_refs: Vec<String>,
    #[serde(default)]
    best_practice_notes: Vec<String>,
    #[serde(default)]
    similar_patterns: Vec<String>,
    #[serde(default)]
    rag_snippets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    file_path: String,
    original_code: String,
    fixed_code: String,
    start_line: u32,
    end_line: u32,
}

#[derive(Debug, Deserialize)]
struct RawFix {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    evidence: RawEvidence,
    #[serde(default)]
    changes: Vec<RawChange>,
}

/// A parsed model response, ready to be assembled into a `FixProposal`.
/// `parseable` is `false` when the model output could not be parsed as the
/// expected JSON shape; the caller should then treat the candidate as
/// unverifiable (per §4.5 step 2) and skip sandboxing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFix {
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub evidence: Evidence,
    pub changes: Vec<CodeChange>,
    pub parseable: bool,
}

/// Parses the model's raw text output as JSON, tolerating the common
/// ```json ... ``` code-fence wrapping. On parse failure, falls back to
/// `title = "Auto-generated fix"` with no changes and `parseable = false`.
pub fn parse_model_output(raw: &str) -> ParsedFix {
    let unwrapped = strip_code_fence(raw);

    match serde_json::from_str::<RawFix>(unwrapped) {
        Ok(parsed) => ParsedFix {
            title: parsed.title.unwrap_or_else(|| "Auto-generated fix".to_string()),
            description: parsed.description,
            rationale: parsed.rationale,
            evidence: Evidence {
                documentation_refs: parsed.evidence.documentation_refs,
                best_practice_notes: parsed.evidence.best_practice_notes,
                similar_patterns: parsed.evidence.similar_patterns,
                rag_snippets: parsed.evidence.rag_snippets,
            },
            changes: parsed
                .changes
                .into_iter()
                .map(|change| CodeChange {
                    file_path: change.file_path,
                    original_code: change.original_code,
                    fixed_code: change.fixed_code,
                    start_line: change.start_line,
                    end_line: change.end_line,
                })
                .collect(),
            parseable: true,
        },
        Err(_) => ParsedFix {
            title: "Auto-generated fix".to_string(),
            description: String::new(),
            rationale: String::new(),
            evidence: Evidence::default(),
            changes: Vec::new(),
            parseable: false,
        },
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else { return trimmed };
    let after_open = after_open.strip_prefix("json").unwrap_or(after_open);
    let after_open = after_open.trim_start_matches('\n');
    after_open.strip_suffix("```").map(str::trim_end).unwrap_or(after_open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alayasiki_core::code_model::Severity;

    fn finding() -> Finding {
        Finding {
            title: "Unbounded recursion".to_string(),
            description: "Function recurses without a base case guard".to_string(),
            severity: Severity::High,
            affected_files: vec!["src/lib.rs".to_string()],
            line_start: Some(10),
        }
    }

    #[test]
    fn build_request_appends_historical_feedback_to_system_prompt() {
        let request = build_request(&finding(), &[], 0.7, 42, Some("Historical Feedback:\nfoo"));
        assert!(request.system.unwrap().contains("Historical Feedback"));
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.seed, Some(42));
    }

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"title":"Fix it","description":"d","rationale":"r","evidence":{},"changes":[{"file_path":"a.py","original_code":"x","fixed_code":"y","start_line":1,"end_line":1}]}"#;
        let parsed = parse_model_output(raw);
        assert!(parsed.parseable);
        assert_eq!(parsed.title, "Fix it");
        assert_eq!(parsed.changes.len(), 1);
    }

    #[test]
    fn parses_json_wrapped_in_code_fence() {
        let raw = "```json\n{\"title\":\"Fix it\",\"changes\":[]}\n```";
        let parsed = parse_model_output(raw);
        assert!(parsed.parseable);
        assert_eq!(parsed.title, "Fix it");
    }

    #[test]
    fn malformed_output_falls_back_to_unverifiable_candidate() {
        let parsed = parse_model_output("not json at all");
        assert!(!parsed.parseable);
        assert_eq!(parsed.title, "Auto-generated fix");
        assert!(parsed.changes.is_empty());
    }
}
