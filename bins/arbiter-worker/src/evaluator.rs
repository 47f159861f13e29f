/// Result Classifier - Language-Agnostic Verdicts
///
/// **Core Responsibility:**
/// Turn the raw outcome of one sandboxed run into a verdict.
///
/// **Critical Properties:**
/// - Knows nothing about bubblewrap, languages or storage
/// - Pure function: (task result, expected output) → verdict
///
/// **Classification Order (first match wins):**
/// 1. Timed out → TIMED_OUT, even if a return code is present
/// 2. Non-zero (or missing) return code → CRASHED, even if output matches
/// 3. Output equal after normalization → VALID
/// 4. Otherwise → INVALID
///
/// **Normalization Rules:**
/// - Trim leading and trailing ASCII whitespace: YES
/// - Ignore newline differences at the ends (\n vs \r\n): YES (via trim)
/// - Internal whitespace and case: compared exactly

use crate::sandbox::TaskResult;
use arbiter_common::types::{TestRun, Verdict};

/// Strip leading and trailing whitespace. Works on bytes so non-UTF-8
/// output is compared as-is.
fn normalize_output(output: &[u8]) -> &[u8] {
    output.trim_ascii()
}

pub fn classify(result: &TaskResult, expected_output: &str) -> Verdict {
    if result.timed_out {
        Verdict::TimedOut
    } else if result.return_code != Some(0) {
        Verdict::Crashed
    } else if normalize_output(&result.stdout) == normalize_output(expected_output.as_bytes()) {
        Verdict::Valid
    } else {
        Verdict::Invalid
    }
}

/// Fill a pending run from its task result
pub fn record(run: &mut TestRun, result: &TaskResult, expected_output: &str) {
    run.verdict = classify(result, expected_output);
    run.stdout = Some(String::from_utf8_lossy(&result.stdout).into_owned());
    run.stderr = Some(String::from_utf8_lossy(&result.stderr).into_owned());
    run.return_code = result.return_code;
    run.elapsed_time_ms = result.elapsed.as_millis() as u64;
}
