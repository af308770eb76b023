//! `Sandbox`: isolated verification of a candidate fix. Grounded on the
//! isolated-execution intent described for the out-of-scope execution
//! environment collaborator — the core needs *a* working implementation to
//! be testable end-to-end, so `InProcessSandbox` applies changes to a
//! temporary copy of the repository and shells out to the configured
//! import-check and test commands under a hard wall-clock timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use alayasiki_core::code_model::{CodeChange, VerificationResult};

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Applies `changes` to a fresh copy of `repo_path`, runs the import
    /// check and the project's test command, and returns the outcome.
    /// Never returns an `Err`: infrastructural failures (copy failure,
    /// process spawn failure, timeout) are folded into the returned
    /// `VerificationResult`'s `error` field and counted as failing tests,
    /// per §4.5's "timeouts are treated as failures, not errors".
    async fn verify(
        &self,
        fix_id: &str,
        repo_path: &Path,
        changes: &[CodeChange],
        test_command: &[String],
        import_check_command: &[String],
        timeout: Duration,
    ) -> VerificationResult;
}

/// Applies `change.fixed_code.trim()` by locating `change.original_code.trim()`
/// as a literal substring of the target file and replacing its first
/// occurrence. This matches the source's literal-substring behavior rather
/// than a line-anchored diff/patch (decided open question, see
/// `DESIGN.md`): it is sensitive to whitespace drift and, when
/// `original_code` occurs more than once, only the first match is touched.
fn apply_change(file_contents: &str, change: &CodeChange) -> Option<String> {
    let needle = change.original_code.trim();
    if needle.is_empty() {
        return None;
    }
    let replacement = change.fixed_code.trim();
    file_contents
        .find(needle)
        .map(|index| {
            let mut updated = String::with_capacity(file_contents.len());
            updated.push_str(&file_contents[..index]);
            updated.push_str(replacement);
            updated.push_str(&file_contents[index + needle.len()..]);
            updated
        })
}

pub struct InProcessSandbox;

impl InProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessSandbox {
    fn copy_repo(repo_path: &Path, dest: &Path) -> std::io::Result<()> {
        copy_dir_recursive(repo_path, dest)
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

async fn run_command(
    program_and_args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<(bool, String), String> {
    let Some((program, args)) = program_and_args.split_first() else {
        return Ok((true, String::new()));
    };

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).stdout(Stdio::piped()).stderr(Stdio::piped());

    let spawned = match command.spawn() {
        Ok(child) => child,
        Err(err) => return Err(format!("failed to spawn {program}: {err}")),
    };

    match tokio::time::timeout(timeout, spawned.wait_with_output()).await {
        Ok(Ok(output)) => {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            Ok((output.status.success(), combined))
        }
        Ok(Err(err)) => Err(format!("process error: {err}")),
        Err(_) => Err(format!("timed out after {timeout:?}")),
    }
}

/// Parses a pytest-style `"N passed, M failed"` summary line; falls back to
/// treating a successful exit with no recognizable summary as one passing,
/// zero failing test.
fn parse_test_counts(output: &str, succeeded: bool) -> (u32, u32, u32) {
    let passed = extract_count(output, "passed");
    let failed = extract_count(output, "failed");
    if passed == 0 && failed == 0 {
        return if succeeded { (1, 0, 1) } else { (0, 1, 1) };
    }
    (passed, failed, passed + failed)
}

fn extract_count(output: &str, label: &str) -> u32 {
    for word in output.split_whitespace().collect::<Vec<_>>().windows(2) {
        if word[1].starts_with(label) {
            if let Ok(count) = word[0].trim_end_matches(',').parse::<u32>() {
                return count;
            }
        }
    }
    0
}

#[async_trait]
impl Sandbox for InProcessSandbox {
    async fn verify(
        &self,
        fix_id: &str,
        repo_path: &Path,
        changes: &[CodeChange],
        test_command: &[String],
        import_check_command: &[String],
        timeout: Duration,
    ) -> VerificationResult {
        let started = Instant::now();
        let workdir = std::env::temp_dir().join(format!("autofix-sandbox-{fix_id}"));
        let _ = std::fs::remove_dir_all(&workdir);

        if let Err(err) = Self::copy_repo(repo_path, &workdir) {
            return VerificationResult {
                fix_id: fix_id.to_string(),
                tests_passed: 0,
                tests_failed: 0,
                tests_total: 0,
                syntax_valid: false,
                import_valid: None,
                type_valid: None,
                error: Some(format!("failed to copy repo into sandbox: {err}")),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        if let Some(error) = apply_changes_to_workdir(&workdir, changes) {
            let _ = std::fs::remove_dir_all(&workdir);
            return VerificationResult {
                fix_id: fix_id.to_string(),
                tests_passed: 0,
                tests_failed: 0,
                tests_total: 0,
                syntax_valid: false,
                import_valid: None,
                type_valid: None,
                error: Some(error),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }

        let import_valid = match run_command(import_check_command, &workdir, timeout).await {
            Ok((ok, _)) => Some(ok),
            Err(_) => Some(false),
        };

        let (tests_passed, tests_failed, tests_total, error) =
            match run_command(test_command, &workdir, timeout).await {
                Ok((ok, output)) => {
                    let (passed, failed, total) = parse_test_counts(&output, ok);
                    (passed, failed, total, None)
                }
                Err(err) => (0, 1, 1, Some(err)),
            };

        let _ = std::fs::remove_dir_all(&workdir);

        VerificationResult {
            fix_id: fix_id.to_string(),
            tests_passed,
            tests_failed,
            tests_total,
            syntax_valid: true,
            import_valid,
            type_valid: None,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn apply_changes_to_workdir(workdir: &Path, changes: &[CodeChange]) -> Option<String> {
    for change in changes {
        let target: PathBuf = workdir.join(&change.file_path);
        let contents = match std::fs::read_to_string(&target) {
            Ok(contents) => contents,
            Err(err) => return Some(format!("could not read {}: {err}", change.file_path)),
        };

        match apply_change(&contents, change) {
            Some(updated) => {
                if let Err(err) = std::fs::write(&target, updated) {
                    return Some(format!("could not write {}: {err}", change.file_path));
                }
            }
            None => return Some(format!("original_code not found verbatim in {}", change.file_path)),
        }
    }
    None
}
