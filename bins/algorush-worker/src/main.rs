use algorush_common::config::GraderConfig;
use algorush_common::types::{GradeRequest, GradeResponse, Language};
use algorush_worker::config::LanguageConfigManager;
use algorush_worker::engine::DockerEngine;
use algorush_worker::error::GradeError;
use algorush_worker::executor::Grader;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("AlgoRush worker booting...");

    let config = GraderConfig::from_env().map_err(|e| {
        error!("Invalid grader configuration: {}", e);
        e
    })?;

    let languages = LanguageConfigManager::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let engine = DockerEngine::connect(config.clone()).await?;
    for name in languages.list_languages() {
        if let Ok(language) = name.parse::<Language>() {
            let lang = languages.get_config(&language)?;
            engine.ensure_image(&lang.image).await?;
        }
    }

    info!(
        timeout_ms = config.timeout_ms,
        compile_timeout_ms = config.compile_timeout_ms,
        workspace_root = %config.workspace_root.display(),
        compile_once = config.compile_once,
        max_parallel_tests = config.max_parallel_tests,
        "Worker configured"
    );

    let grader = Grader::new(engine, config);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        warn!("Received shutdown signal, cancelling in-flight grading...");
        shutdown.cancel();
    });

    worker_loop(&grader, &languages, &cancel).await?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Install the subscriber. `ALGORUSH_LOG_FORMAT=json` switches to JSON lines
/// for log collectors; stdout carries responses, so logs always go to stderr.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if wants_json_logs(std::env::var("ALGORUSH_LOG_FORMAT").ok().as_deref()) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn wants_json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
}

/// Grade one JSON request per stdin line, answering with one JSON line on stdout.
async fn worker_loop(
    grader: &Grader<DockerEngine>,
    languages: &LanguageConfigManager,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(grader, languages, &line, cancel).await;

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        stdout.write_all(payload.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

#[instrument(skip_all)]
async fn handle_line(
    grader: &Grader<DockerEngine>,
    languages: &LanguageConfigManager,
    line: &str,
    cancel: &CancellationToken,
) -> GradeResponse {
    let request: GradeRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Malformed grade request");
            return GradeResponse::errored(Uuid::nil(), format!("invalid request: {}", e));
        }
    };

    let id = request.id;
    info!(
        request_id = %id,
        language = %request.language,
        test_cases = request.test_cases.len(),
        source_size = request.submission.len(),
        "Received grade request"
    );

    let language = match languages.get_config(&request.language) {
        Ok(language) => language,
        Err(e) => {
            error!(request_id = %id, error = %e, "Language not configured");
            return GradeResponse::errored(id, e.to_string());
        }
    };

    match grader
        .grade(language, &request.template, &request.test_cases, &request.submission, cancel)
        .await
    {
        Ok(summary) => {
            info!(
                request_id = %id,
                status = ?summary.status,
                passed = summary.passed_count,
                total = summary.total_count,
                "Grade request complete"
            );
            GradeResponse::graded(id, summary)
        }
        Err(GradeError::Cancelled) => {
            warn!(request_id = %id, "Grade request cancelled");
            GradeResponse::errored(id, GradeError::Cancelled.to_string())
        }
        Err(e) => {
            error!(request_id = %id, error = %e, "Grading failed");
            GradeResponse::errored(id, e.to_string())
        }
    }
}
