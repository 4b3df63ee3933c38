/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// Drive assembler → workspace → sandbox → evaluator for every test case and
/// hand back one `GradeSummary`.
///
/// **Architecture:**
/// 1. Merge the submission into the template (assembler.rs); failure aborts
///    the run with a `GradeSummary { status: Error }`
/// 2. Per test case, in a fresh workspace: write source and input, compile,
///    run (engine.rs)
/// 3. Score outputs (evaluator.rs) and aggregate
///
/// Per-test failures (compile error, runtime error, timeout) become failed
/// `TestResult`s and grading continues. Sandbox faults and cancellation
/// abort the whole run with an error.
///
/// ## Compile-once mode
/// With `GraderConfig::compile_once` the program is compiled a single time
/// and the artifact is copied into a fresh workspace per test case. The
/// default recompiles per test case to tolerate per-attempt toolchain variance.
use crate::assembler;
use crate::config::LanguageConfig;
use crate::engine::Sandbox;
use crate::error::{AssemblyError, GradeError, Result};
use crate::evaluator;
use crate::workspace::WorkspaceManager;
use algorush_common::config::GraderConfig;
use algorush_common::types::{FailureKind, GradeSummary, TestCase, TestResult, TestStatus};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Safety limit to keep pathological inputs out of the sandbox
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub struct Grader<S> {
    sandbox: S,
    workspaces: WorkspaceManager,
    config: GraderConfig,
}

impl<S: Sandbox> Grader<S> {
    pub fn new(sandbox: S, config: GraderConfig) -> Self {
        Self {
            sandbox,
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            config,
        }
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    /// Grade `submission` against `test_cases`.
    ///
    /// Results keep the order of `test_cases`. Extraction and template
    /// problems come back as `Ok` with `status == Error`; only conditions
    /// that make grading impossible are `Err`.
    pub async fn grade(
        &self,
        language: &LanguageConfig,
        template: &str,
        test_cases: &[TestCase],
        submission: &str,
        cancel: &CancellationToken,
    ) -> Result<GradeSummary> {
        let start = Instant::now();
        info!(
            language = %language.name,
            test_count = test_cases.len(),
            source_size = submission.len(),
            compile_once = self.config.compile_once,
            max_parallel_tests = self.config.max_parallel_tests,
            "Starting grading run"
        );

        let program = match assembler::assemble(template, submission, &language.solution_unit) {
            Ok(program) => program,
            Err(AssemblyError::Extraction(message)) => {
                warn!(reason = %message, "Submission rejected");
                return Ok(GradeSummary::failed(
                    FailureKind::Extraction,
                    message,
                    test_cases.len(),
                ));
            }
            Err(AssemblyError::Template(message)) => {
                error!(reason = %message, "Problem template is malformed");
                return Ok(GradeSummary::failed(
                    FailureKind::Template,
                    message,
                    test_cases.len(),
                ));
            }
        };

        let results = if test_cases.is_empty() {
            Vec::new()
        } else if self.config.compile_once {
            self.grade_compile_once(language, &program, test_cases, cancel).await?
        } else {
            self.grade_per_test(language, &program, test_cases, cancel).await?
        };

        log_failures(&results);
        let summary = evaluator::aggregate(results);

        info!(
            status = ?summary.status,
            passed = summary.passed_count,
            total = summary.total_count,
            avg_elapsed_ms = summary.avg_elapsed_ms,
            wall_ms = start.elapsed().as_millis() as u64,
            "Grading run complete"
        );
        Ok(summary)
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn parallelism(&self) -> usize {
        self.config.max_parallel_tests.max(1)
    }

    /// Reference path: every test case compiles and runs in its own workspace.
    async fn grade_per_test(
        &self,
        language: &LanguageConfig,
        program: &str,
        test_cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Result<Vec<TestResult>> {
        stream::iter(test_cases.iter().enumerate())
            .map(|(idx, test_case)| self.compile_and_run(language, program, idx, test_case, cancel))
            .buffered(self.parallelism())
            .try_collect()
            .await
    }

    async fn compile_and_run(
        &self,
        language: &LanguageConfig,
        program: &str,
        idx: usize,
        test_case: &TestCase,
        cancel: &CancellationToken,
    ) -> Result<TestResult> {
        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }
        if let Some(rejection) = oversized_input(test_case) {
            return Ok(rejection);
        }

        let timeout = self.test_timeout();
        self.workspaces
            .with_workspace(|ws| async move {
                ws.write_file(&language.source_file, program).await?;
                ws.write_file(&language.input_file, &test_case.input).await?;

                debug!(test_num = idx + 1, workspace = %ws.id(), "Compiling");
                let compile = self.sandbox.compile(language, &ws, cancel).await?;
                if !compile.ok {
                    return Ok(evaluator::compile_failure(test_case, &compile));
                }

                debug!(test_num = idx + 1, workspace = %ws.id(), "Running");
                let outcome = self.sandbox.run(language, &ws, timeout, cancel).await?;
                Ok(evaluator::evaluate_test(&outcome, test_case, compile.elapsed_ms))
            })
            .await
    }

    /// Compile once, then run the artifact in a fresh workspace per test case.
    async fn grade_compile_once(
        &self,
        language: &LanguageConfig,
        program: &str,
        test_cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Result<Vec<TestResult>> {
        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }

        let (compile, artifact) = self
            .workspaces
            .with_workspace(|ws| async move {
                ws.write_file(&language.source_file, program).await?;
                let compile = self.sandbox.compile(language, &ws, cancel).await?;
                let artifact = if compile.ok && language.compile.is_some() {
                    Some(ws.read_file(&language.artifact).await?)
                } else {
                    None
                };
                Ok((compile, artifact))
            })
            .await?;

        if !compile.ok {
            warn!("Compilation failed; all tests marked as failed");
            return Ok(test_cases
                .iter()
                .map(|tc| evaluator::compile_failure(tc, &compile))
                .collect());
        }

        debug!(
            compile_ms = compile.elapsed_ms,
            artifact_bytes = artifact.as_ref().map_or(0, Vec::len),
            "Compiled once"
        );

        let artifact = artifact.as_deref();
        // every test carries an equal share of the single compile
        let compile_share = compile.elapsed_ms / test_cases.len() as u64;
        stream::iter(test_cases.iter().enumerate())
            .map(|(idx, test_case)| {
                self.run_prebuilt(language, program, artifact, compile_share, idx, test_case, cancel)
            })
            .buffered(self.parallelism())
            .try_collect()
            .await
    }

    async fn run_prebuilt(
        &self,
        language: &LanguageConfig,
        program: &str,
        artifact: Option<&[u8]>,
        compile_share: u64,
        idx: usize,
        test_case: &TestCase,
        cancel: &CancellationToken,
    ) -> Result<TestResult> {
        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }
        if let Some(rejection) = oversized_input(test_case) {
            return Ok(rejection);
        }

        let timeout = self.test_timeout();
        self.workspaces
            .with_workspace(|ws| async move {
                match artifact {
                    Some(bytes) => ws.write_executable(&language.artifact, bytes).await?,
                    // interpreted: the source is what runs
                    None => ws.write_file(&language.source_file, program).await?,
                };
                ws.write_file(&language.input_file, &test_case.input).await?;

                debug!(test_num = idx + 1, workspace = %ws.id(), "Running prebuilt artifact");
                let outcome = self.sandbox.run(language, &ws, timeout, cancel).await?;
                Ok(evaluator::evaluate_test(&outcome, test_case, compile_share))
            })
            .await
    }
}

fn oversized_input(test_case: &TestCase) -> Option<TestResult> {
    (test_case.input.len() > MAX_TEST_INPUT_BYTES).then(|| {
        evaluator::rejected(
            test_case,
            format!(
                "Test input exceeds maximum size of {} bytes",
                MAX_TEST_INPUT_BYTES
            ),
        )
    })
}

// Cross-layer guard: surface failed attempts before aggregation
fn log_failures(results: &[TestResult]) {
    for (idx, result) in results.iter().enumerate() {
        match result.status {
            TestStatus::Passed | TestStatus::WrongAnswer => {
                debug!(test_num = idx + 1, status = ?result.status, elapsed_ms = result.elapsed_ms, "Test result");
            }
            TestStatus::CompileError => {
                warn!(test_num = idx + 1, "Compilation failed; test cannot pass");
            }
            TestStatus::RuntimeError => {
                warn!(test_num = idx + 1, elapsed_ms = result.elapsed_ms, "Runtime error; test cannot pass");
            }
            TestStatus::TimeLimitExceeded => {
                warn!(test_num = idx + 1, elapsed_ms = result.elapsed_ms, "Execution timed out; test cannot pass");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{supervise, CompileOutcome, ExecutionOutcome, Supervised};
    use crate::error::SandboxFault;
    use crate::workspace::Workspace;
    use algorush_common::types::GradeStatus;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What the "compiled program" does for a given input.
    enum FakeRun {
        Print(String),
        Delayed(u64, String),
        Crash(i64, &'static str),
        Warn(String, &'static str),
        Hang,
    }

    /// Sandbox double: "compiling" copies the source into the artifact and
    /// "running" feeds the artifact text and stdin to `program`.
    struct FakeSandbox {
        program: fn(&str, &str) -> FakeRun,
        fail_with_fault: bool,
        compiles: AtomicUsize,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FakeSandbox {
        fn new(program: fn(&str, &str) -> FakeRun) -> Self {
            Self {
                program,
                fail_with_fault: false,
                compiles: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn compile(
            &self,
            language: &LanguageConfig,
            workspace: &Workspace,
            _cancel: &CancellationToken,
        ) -> Result<CompileOutcome> {
            if self.fail_with_fault {
                return Err(SandboxFault::new("daemon unreachable").into());
            }
            self.compiles.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(workspace.path().to_path_buf());

            let source = String::from_utf8(workspace.read_file(&language.source_file).await?).unwrap();
            if source.contains("COMPILE_ERROR") {
                return Ok(CompileOutcome {
                    ok: false,
                    stderr: "solution.cpp:2:5: error: 'COMPILE_ERROR' was not declared in this scope".to_string(),
                    elapsed_ms: 4,
                    timed_out: false,
                });
            }
            workspace.write_file(&language.artifact, &source).await?;
            Ok(CompileOutcome {
                ok: true,
                stderr: String::new(),
                elapsed_ms: 30,
                timed_out: false,
            })
        }

        async fn run(
            &self,
            language: &LanguageConfig,
            workspace: &Workspace,
            timeout: Duration,
            cancel: &CancellationToken,
        ) -> Result<ExecutionOutcome> {
            self.seen.lock().unwrap().push(workspace.path().to_path_buf());
            let artifact = String::from_utf8(workspace.read_file(&language.artifact).await?).unwrap();
            let input = String::from_utf8(workspace.read_file(&language.input_file).await?).unwrap();
            let start = Instant::now();

            let exited = |stdout: String, stderr: &str, code: i64| ExecutionOutcome {
                stdout,
                stderr: stderr.to_string(),
                exit_code: Some(code),
                timed_out: false,
                elapsed_ms: start.elapsed().as_millis() as u64,
            };

            match (self.program)(&artifact, &input) {
                FakeRun::Print(out) => Ok(exited(out, "", 0)),
                FakeRun::Crash(code, stderr) => Ok(exited(String::new(), stderr, code)),
                FakeRun::Warn(out, stderr) => Ok(exited(out, stderr, 0)),
                FakeRun::Delayed(ms, out) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(exited(out, "", 0))
                }
                FakeRun::Hang => {
                    match supervise(std::future::pending::<()>(), timeout, cancel).await {
                        Supervised::Cancelled => Err(GradeError::Cancelled),
                        _ => Ok(ExecutionOutcome {
                            stdout: String::new(),
                            stderr: String::new(),
                            exit_code: None,
                            timed_out: true,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                        }),
                    }
                }
            }
        }
    }

    const TEMPLATE: &str = r#"#include <bits/stdc++.h>
using namespace std;

class Solution {
public:
    vector<int> twoSum(vector<int>& nums, int target) {
        return {};
    }
};

int main() {
    vector<int> nums; int x;
    while (cin >> x) nums.push_back(x);
    int target = nums.back(); nums.pop_back();
    vector<int> r = Solution().twoSum(nums, target);
    cout << r[0] << " " << r[1] << endl;
}
"#;

    const TWO_SUM: &str = r#"class Solution {
public:
    vector<int> twoSum(vector<int>& nums, int target) {
        unordered_map<int, int> seen;
        for (int i = 0; i < (int)nums.size(); i++) {
            auto it = seen.find(target - nums[i]);
            if (it != seen.end()) { return {it->second, i}; }
            seen[nums[i]] = i;
        }
        return {};
    }
};"#;

    /// Behaves like the two-sum program when the artifact holds a real solution.
    fn two_sum(artifact: &str, input: &str) -> FakeRun {
        if input.contains("loop") {
            return FakeRun::Hang;
        }
        if !artifact.contains("unordered_map") {
            return FakeRun::Print(String::new());
        }
        let mut nums: Vec<i64> = input
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        let target = nums.pop().unwrap_or_default();
        for i in 0..nums.len() {
            for j in i + 1..nums.len() {
                if nums[i] + nums[j] == target {
                    return FakeRun::Print(format!("{} {}\n", i, j));
                }
            }
        }
        FakeRun::Crash(139, "Segmentation fault")
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: expected.to_string(),
            hidden: false,
        }
    }

    fn config(root: &std::path::Path) -> GraderConfig {
        GraderConfig {
            workspace_root: root.to_path_buf(),
            timeout_ms: 100,
            ..Default::default()
        }
    }

    fn cpp() -> LanguageConfig {
        LanguageConfig::cpp()
    }

    fn leftover_workspaces(root: &std::path::Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_correct_submission_is_accepted() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let cases = vec![case("2 7 11 15\n9", "0 1"), case("3 2 4\n6", "1 2")];

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::Accepted);
        assert_eq!(summary.passed_count, 2);
        assert_eq!(summary.total_count, 2);
        assert!(summary.results.iter().all(|r| r.passed && r.error.is_none()));
        assert_eq!(summary.results[0].actual_output, "0 1\n");
        assert!(summary.results.iter().all(|r| r.elapsed_ms >= 30));
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_placeholder_submission_is_wrong_answer() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let placeholder = "class Solution {\npublic:\n    vector<int> twoSum(vector<int>& nums, int target) {\n        return {};\n    }\n};";

        let summary = grader
            .grade(&cpp(), TEMPLATE, &[case("2 7 11 15\n9", "0 1")], placeholder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::WrongAnswer);
        assert_eq!(summary.results[0].status, TestStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_missing_solution_unit_aborts_with_extraction_error() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = FakeSandbox::new(two_sum);
        let grader = Grader::new(sandbox, config(root.path()));

        let summary = grader
            .grade(
                &cpp(),
                TEMPLATE,
                &[case("2 7 11 15\n9", "0 1")],
                "vector<int> twoSum(vector<int>& nums, int target) { return {0, 1}; }",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::Error);
        assert_eq!(summary.passed_count, 0);
        assert_eq!(summary.total_count, 1);
        assert!(summary.results.is_empty());
        assert_eq!(summary.error.unwrap().kind, FailureKind::Extraction);
        assert_eq!(grader.sandbox.compiles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_template_is_template_error() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));

        let summary = grader
            .grade(&cpp(), "int main() {}", &[case("1", "1")], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::Error);
        assert_eq!(summary.error.unwrap().kind, FailureKind::Template);
    }

    #[tokio::test]
    async fn test_bracket_formatting_differences_pass() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(
            FakeSandbox::new(|_, _| FakeRun::Print("[ 0 , 1 ]\n".to_string())),
            config(root.path()),
        );

        let summary = grader
            .grade(&cpp(), TEMPLATE, &[case("2 7 11 15\n9", "[0,1]")], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.results[0].passed);
        assert_eq!(summary.status, GradeStatus::Accepted);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_and_grading_continues() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let cases = vec![case("2 7 11 15\n9", "0 1"), case("loop", "0 1")];
        let start = Instant::now();

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(summary.results[0].passed);
        assert!(summary.results[1].timed_out);
        assert!(!summary.results[1].passed);
        assert_eq!(summary.results[1].status, TestStatus::TimeLimitExceeded);
        assert_eq!(summary.status, GradeStatus::WrongAnswer);
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_runtime_error_is_recorded_per_test() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let cases = vec![case("1 2\n100", "0 1"), case("2 7 11 15\n9", "0 1")];

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.results[0].status, TestStatus::RuntimeError);
        assert_eq!(summary.results[0].error.as_deref(), Some("Segmentation fault"));
        assert!(summary.results[1].passed);
        assert_eq!(summary.passed_count, 1);
    }

    #[tokio::test]
    async fn test_stderr_output_fails_matching_test() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(
            FakeSandbox::new(|_, _| FakeRun::Warn("0 1\n".to_string(), "Assertion warning: bad state\n")),
            config(root.path()),
        );

        let summary = grader
            .grade(&cpp(), TEMPLATE, &[case("2 7 11 15\n9", "0 1")], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!summary.results[0].passed);
        assert_eq!(summary.results[0].status, TestStatus::RuntimeError);
        assert_eq!(summary.results[0].error.as_deref(), Some("Assertion warning: bad state\n"));
        assert_eq!(summary.status, GradeStatus::WrongAnswer);
    }

    #[tokio::test]
    async fn test_compile_error_recorded_for_every_test_per_test_mode() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let broken = "class Solution { COMPILE_ERROR };";
        let cases = vec![case("1", "1"), case("2", "2"), case("3", "3")];

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, broken, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(grader.sandbox.compiles.load(Ordering::SeqCst), 3);
        assert_eq!(summary.status, GradeStatus::WrongAnswer);
        for result in &summary.results {
            assert_eq!(result.status, TestStatus::CompileError);
            assert!(result.actual_output.contains("error: 'COMPILE_ERROR'"));
        }
    }

    #[tokio::test]
    async fn test_compile_once_compiles_a_single_time() {
        let root = tempfile::tempdir().unwrap();
        let config = GraderConfig {
            compile_once: true,
            ..config(root.path())
        };
        let grader = Grader::new(FakeSandbox::new(two_sum), config);
        let cases = vec![case("2 7 11 15\n9", "0 1"), case("3 2 4\n6", "1 2"), case("loop", "")];

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(grader.sandbox.compiles.load(Ordering::SeqCst), 1);
        assert!(summary.results[0].passed);
        assert!(summary.results[1].passed);
        assert!(summary.results[2].timed_out);
        // 30ms compile shared by three tests
        assert!(summary.results.iter().all(|r| r.elapsed_ms >= 10));
        assert!(summary.avg_elapsed_ms >= 10);

        // one build workspace plus one per test, never reused
        let seen = grader.sandbox.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_compile_once_failure_fails_every_test() {
        let root = tempfile::tempdir().unwrap();
        let config = GraderConfig {
            compile_once: true,
            ..config(root.path())
        };
        let grader = Grader::new(FakeSandbox::new(two_sum), config);

        let summary = grader
            .grade(
                &cpp(),
                TEMPLATE,
                &[case("1", "1"), case("2", "2")],
                "class Solution { COMPILE_ERROR };",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(grader.sandbox.compiles.load(Ordering::SeqCst), 1);
        assert_eq!(summary.passed_count, 0);
        assert!(summary
            .results
            .iter()
            .all(|r| r.status == TestStatus::CompileError));
    }

    #[tokio::test]
    async fn test_parallel_grading_preserves_order() {
        let root = tempfile::tempdir().unwrap();
        let config = GraderConfig {
            max_parallel_tests: 4,
            ..config(root.path())
        };
        // earlier tests finish later
        let grader = Grader::new(
            FakeSandbox::new(|_, input| {
                let n: u64 = input.trim().parse().unwrap_or(0);
                FakeRun::Delayed(10 * (5 - n), format!("{}\n", n))
            }),
            config,
        );
        let cases: Vec<TestCase> = (0..5).map(|n| case(&n.to_string(), &n.to_string())).collect();

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::Accepted);
        for (result, case) in summary.results.iter().zip(&cases) {
            assert_eq!(result.input, case.input);
        }
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_test_cases_is_error() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));

        let summary = grader
            .grade(&cpp(), TEMPLATE, &[], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, GradeStatus::Error);
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.passed_count, 0);
        assert_eq!(summary.error.unwrap().kind, FailureKind::NoTestCases);
    }

    #[tokio::test]
    async fn test_sandbox_fault_aborts_run() {
        let root = tempfile::tempdir().unwrap();
        let mut sandbox = FakeSandbox::new(two_sum);
        sandbox.fail_with_fault = true;
        let grader = Grader::new(sandbox, config(root.path()));

        let err = grader
            .grade(&cpp(), TEMPLATE, &[case("1", "1")], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GradeError::Sandbox(_)));
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_hung_run() {
        let root = tempfile::tempdir().unwrap();
        let config = GraderConfig {
            timeout_ms: 60_000,
            ..config(root.path())
        };
        let grader = Grader::new(FakeSandbox::new(two_sum), config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let start = Instant::now();

        let err = grader
            .grade(&cpp(), TEMPLATE, &[case("loop", "1"), case("1 2\n3", "0 1")], TWO_SUM, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GradeError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[tokio::test]
    async fn test_oversized_input_is_rejected_before_sandbox() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let huge = "1 ".repeat(MAX_TEST_INPUT_BYTES / 2 + 1);

        let summary = grader
            .grade(&cpp(), TEMPLATE, &[case(&huge, "1")], TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.results[0].status, TestStatus::RuntimeError);
        assert_eq!(grader.sandbox.compiles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hidden_results_graded_but_filterable() {
        let root = tempfile::tempdir().unwrap();
        let grader = Grader::new(FakeSandbox::new(two_sum), config(root.path()));
        let mut hidden = case("3 3\n6", "0 1");
        hidden.hidden = true;
        let cases = vec![case("2 7 11 15\n9", "0 1"), hidden];

        let summary = grader
            .grade(&cpp(), TEMPLATE, &cases, TWO_SUM, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.passed_count, 2);
        assert!(summary.results[1].hidden);
        let visible = summary.visible();
        assert_eq!(visible.results.len(), 1);
        assert_eq!(visible.passed_count, 2);
    }
}
