use crucible_types::ExecutionStatus;

use crate::wire::CanonicalResult;

/// Substrings whose presence in stdout marks an execution as failed
/// even when the sandbox reported a zero return code. Python tracebacks
/// routinely land on stdout in pool-managed sandboxes.
pub const ERROR_MARKERS: [&str; 10] = [
    "Error:",
    "Traceback",
    "Exception:",
    "ImportError:",
    "ModuleNotFoundError:",
    "SyntaxError:",
    "NameError:",
    "TypeError:",
    "ValueError:",
    "AttributeError:",
];

/// Outcome of classifying one canonical result. Streams may have been
/// relocated relative to the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FailureClassifier {
    markers: Vec<&'static str>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            markers: ERROR_MARKERS.to_vec(),
        }
    }
}

impl FailureClassifier {
    pub fn classify(&self, result: CanonicalResult) -> ClassifiedResult {
        let CanonicalResult {
            mut stdout,
            mut stderr,
            return_code,
            status_hint,
            success_hint,
        } = result;

        let error_in_stdout = self.markers.iter().any(|m| stdout.contains(m));
        // Any stderr content at all counts, whitespace included.
        let failed = !stderr.is_empty()
            || error_in_stdout
            || status_hint.as_deref() == Some("Failed")
            || return_code.unwrap_or(0) != 0
            || success_hint == Some(false);

        // A traceback printed to stdout belongs on stderr for reporting,
        // but only when stderr carried nothing of its own.
        if error_in_stdout && stderr.is_empty() {
            stderr = std::mem::take(&mut stdout);
        }

        // The direct shape always carries a concrete return code; a
        // failure it reported with code 0 is recorded as 1 so the code
        // agrees with the verdict.
        let return_code = if failed && success_hint.is_some() && return_code.unwrap_or(0) == 0 {
            Some(1)
        } else {
            return_code
        };

        let status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        ClassifiedResult {
            status,
            stdout,
            stderr,
            return_code,
        }
    }
}
