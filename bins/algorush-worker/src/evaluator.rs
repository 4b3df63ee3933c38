/// Test Evaluator - Language-Agnostic Verdicts
///
/// **Core Responsibility:**
/// Compare raw execution outcomes against expected outputs and reduce the
/// per-test results into a submission verdict.
///
/// **Critical Properties:**
/// - Knows nothing about Docker, workspaces or language runtimes
/// - Pure functions: (outcomes, test cases) → results → summary
///
/// **Normalization Rules (Applied to Both Sides):**
/// - Trim leading and trailing whitespace
/// - Collapse internal whitespace runs to a single space
/// - Drop whitespace just inside `[`, `(`, `{` and `]`, `)`, `}`
/// - Drop whitespace around commas
/// - Case sensitivity: YES (exact match required)
///
/// **Verdict Rules:**
/// - Accepted iff every test passed
/// - No tests at all is an Error, never a vacuous Accepted
use algorush_common::types::{
    FailureKind, GradeStatus, GradeSummary, TestCase, TestResult, TestStatus,
};

use crate::engine::{CompileOutcome, ExecutionOutcome};

/// Canonical form of program output for comparison.
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(output: &str) -> String {
    let mut normalized = String::with_capacity(output.len());
    let mut pending_space = false;

    for c in output.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            let after_tight = normalized.ends_with(is_opener) || normalized.ends_with(',');
            let before_tight = is_closer(c) || c == ',';
            if !normalized.is_empty() && !after_tight && !before_tight {
                normalized.push(' ');
            }
            pending_space = false;
        }
        normalized.push(c);
    }

    normalized
}

fn is_opener(c: char) -> bool {
    matches!(c, '[' | '(' | '{')
}

fn is_closer(c: char) -> bool {
    matches!(c, ']' | ')' | '}')
}

/// Result for a test whose program did not compile. The diagnostics are
/// echoed verbatim.
pub fn compile_failure(test_case: &TestCase, compile: &CompileOutcome) -> TestResult {
    let error = if compile.timed_out {
        format!("Compilation timed out after {}ms", compile.elapsed_ms)
    } else {
        compile.stderr.clone()
    };

    TestResult {
        input: test_case.input.clone(),
        expected_output: test_case.expected_output.clone(),
        actual_output: compile.stderr.clone(),
        passed: false,
        hidden: test_case.hidden,
        status: TestStatus::CompileError,
        timed_out: compile.timed_out,
        elapsed_ms: compile.elapsed_ms,
        error: Some(error),
    }
}

/// Result for a test that was refused before reaching the sandbox.
pub fn rejected(test_case: &TestCase, reason: String) -> TestResult {
    TestResult {
        input: test_case.input.clone(),
        expected_output: test_case.expected_output.clone(),
        actual_output: String::new(),
        passed: false,
        hidden: test_case.hidden,
        status: TestStatus::RuntimeError,
        timed_out: false,
        elapsed_ms: 0,
        error: Some(reason),
    }
}

/// Evaluate a single execution outcome
///
/// Priority:
/// 1. Timeout
/// 2. Non-zero exit (runtime error)
/// 3. Output on stderr (runtime error)
/// 4. Output comparison
///
/// `compile_ms` is added to the elapsed time when the program was compiled
/// for this test alone.
pub fn evaluate_test(outcome: &ExecutionOutcome, test_case: &TestCase, compile_ms: u64) -> TestResult {
    let elapsed_ms = compile_ms + outcome.elapsed_ms;

    let (status, error) = if outcome.timed_out {
        (
            TestStatus::TimeLimitExceeded,
            Some(format!("Time limit exceeded after {}ms", outcome.elapsed_ms)),
        )
    } else if outcome.exit_code != Some(0) {
        let error = if outcome.stderr.trim().is_empty() {
            match outcome.exit_code {
                Some(code) => format!("Process exited with code {}", code),
                None => "Process exit code unavailable".to_string(),
            }
        } else {
            outcome.stderr.clone()
        };
        (TestStatus::RuntimeError, Some(error))
    } else if !outcome.stderr.trim().is_empty() {
        // anything on stderr is a runtime fault even with a clean exit
        (TestStatus::RuntimeError, Some(outcome.stderr.clone()))
    } else if normalize(&outcome.stdout) == normalize(&test_case.expected_output) {
        (TestStatus::Passed, None)
    } else {
        (TestStatus::WrongAnswer, None)
    };

    TestResult {
        input: test_case.input.clone(),
        expected_output: test_case.expected_output.clone(),
        actual_output: outcome.stdout.clone(),
        passed: status == TestStatus::Passed,
        hidden: test_case.hidden,
        status,
        timed_out: outcome.timed_out,
        elapsed_ms,
        error,
    }
}

/// Reduce per-test results into the submission verdict.
pub fn aggregate(results: Vec<TestResult>) -> GradeSummary {
    let total_count = results.len();
    if total_count == 0 {
        return GradeSummary::failed(FailureKind::NoTestCases, "no test cases to grade", 0);
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let total_elapsed: u64 = results.iter().map(|r| r.elapsed_ms).sum();
    let avg_elapsed_ms = (total_elapsed as f64 / total_count as f64).round() as u64;

    let status = if passed_count == total_count {
        GradeStatus::Accepted
    } else {
        GradeStatus::WrongAnswer
    };

    GradeSummary {
        results,
        passed_count,
        total_count,
        avg_elapsed_ms,
        status,
        error: None,
    }
}
