//! The tool verbs: JSON arguments in, one formatted string reply out.

use serde::Deserialize;
use tracing::debug;

use ocmem_core::{MemoryError, Result, WriteOutcome};
use ocmem_engine::{MemoryService, Observation, SearchResponse, SessionSummary, TaskEntry};

/// Dispatch one verb invocation. Errors are rendered as one-line
/// `Error: <kind>: <message>` replies; quality/privacy refusals come back
/// as `Rejected: <reason>` through the outcome itself.
pub async fn dispatch(service: &MemoryService, verb: &str, args: &serde_json::Value) -> String {
    debug!(verb, "dispatching verb");
    match run_verb(service, verb, args).await {
        Ok(reply) => reply,
        Err(e) => format!("Error: {}: {}", e.kind(), e.message()),
    }
}

async fn run_verb(
    service: &MemoryService,
    verb: &str,
    args: &serde_json::Value,
) -> Result<String> {
    match verb {
        "primer" => Ok(service.primer()),
        "search" => search(service, args).await,
        "log" => log(service, args).await,
        "session_end" => session_end(service, args).await,
        "update_tasks" => update_tasks(service, args),
        "observe" => observe(service, args).await,
        "read" => read(service, args),
        other => Err(MemoryError::Config(format!("unknown verb: {other}"))),
    }
}

fn bad_args(verb: &str, e: serde_json::Error) -> MemoryError {
    MemoryError::Config(format!("invalid arguments for {verb}: {e}"))
}

// ── search ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    max_tokens: Option<usize>,
}

async fn search(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    let args: SearchArgs =
        serde_json::from_value(args.clone()).map_err(|e| bad_args("search", e))?;
    // 0 means "use the configured default".
    let max_tokens = args.max_tokens.filter(|v| *v > 0);
    let response = service
        .search(&args.query, args.scope.as_deref(), max_tokens)
        .await?;
    Ok(format_search(&response))
}

fn format_search(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return "No matching memories found.".to_string();
    }

    let mut blocks: Vec<String> = response
        .results
        .iter()
        .map(|hit| {
            format!(
                "[salience: {:.2} | reinforcement: {} | {}]\n{}",
                hit.salience, hit.reinforcement, hit.uri, hit.content
            )
        })
        .collect();

    let mut trailer = format!(
        "[total tokens: {} | budget remaining: {}]",
        response.total_tokens, response.budget_remaining
    );
    if response.partial {
        trailer.push_str(" (partial)");
    }
    blocks.push(trailer);
    blocks.join("\n\n")
}

// ── log ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LogArgs {
    content: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

async fn log(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    let args: LogArgs = serde_json::from_value(args.clone()).map_err(|e| bad_args("log", e))?;
    let outcome = service.log(&args.content, args.kind.as_deref()).await?;
    Ok(outcome.reply())
}

// ── session_end ─────────────────────────────────────────────────

async fn session_end(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    let summary: SessionSummary =
        serde_json::from_value(args.clone()).map_err(|e| bad_args("session_end", e))?;
    let journal = service.session_end(summary).await?;
    Ok(format!(
        "Session summary written to {journal}. PRIMER.md and TASKS.md updated."
    ))
}

// ── update_tasks ────────────────────────────────────────────────

fn update_tasks(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    // The payload is a JSON array; a wrapping `{"tasks": [...]}` object is
    // accepted too.
    let raw = if args.is_array() {
        args
    } else {
        args.get("tasks").unwrap_or(args)
    };
    let tasks: Vec<TaskEntry> =
        serde_json::from_value(raw.clone()).map_err(|e| bad_args("update_tasks", e))?;
    let count = service.update_tasks(tasks)?;
    Ok(format!(
        "TASKS.md updated with {count} tasks. PRIMER.md refreshed."
    ))
}

// ── observe ─────────────────────────────────────────────────────

async fn observe(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    let obs: Observation =
        serde_json::from_value(args.clone()).map_err(|e| bad_args("observe", e))?;
    if obs.action.trim().is_empty() {
        return Err(MemoryError::Config("observe requires an action".into()));
    }
    let (journal, insight) = service.observe(obs).await?;
    let mut reply = format!("Observation recorded in journal/{journal}.");
    if let Some(outcome) = insight {
        let action = match &outcome {
            WriteOutcome::Appended { .. } => Some("appended"),
            WriteOutcome::Reinforced { .. } => Some("reinforced"),
            WriteOutcome::ConflictUpdated { .. } => Some("replaced"),
            WriteOutcome::Rejected { .. } => None,
        };
        if let (Some(action), Some(path)) = (action, outcome_path(&outcome)) {
            reply.push_str(&format!(" Insight also saved to {path} ({action})."));
        }
    }
    Ok(reply)
}

fn outcome_path(outcome: &WriteOutcome) -> Option<&str> {
    match outcome {
        WriteOutcome::Appended { path, .. }
        | WriteOutcome::Reinforced { path, .. }
        | WriteOutcome::ConflictUpdated { path, .. } => Some(path),
        WriteOutcome::Rejected { .. } => None,
    }
}

// ── read ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

fn read(service: &MemoryService, args: &serde_json::Value) -> Result<String> {
    let args: ReadArgs = serde_json::from_value(args.clone()).map_err(|e| bad_args("read", e))?;
    service.read_file(&args.path)
}
