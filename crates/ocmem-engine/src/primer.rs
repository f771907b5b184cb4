//! Primer, journal, and task builders: thin template renderers over the
//! Markdown corpus. No model calls — pure file extraction and assembly.

use std::path::{Path, PathBuf};

use chrono::{Duration, Local};
use serde::Deserialize;
use tracing::info;

use ocmem_core::Result;

use crate::chunker::{detect_session_section, SessionSection};
use crate::frontmatter::Document;
use crate::fsio::atomic_write;

const EMPTY_PLACEHOLDER: &str = "(none recorded)";

// ── Extraction ──────────────────────────────────────────────────

/// Last `max_items` bullet items from a file's body.
fn extract_items(path: &Path, max_items: usize) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let doc = Document::parse(&text);
    let items: Vec<String> = doc
        .body
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- ").map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    let skip = items.len().saturating_sub(max_items);
    items.into_iter().skip(skip).collect()
}

/// "Completed" bullets from the last `days` journal files, date-prefixed,
/// capped at 10.
fn extract_recent_completed(journal_dir: &Path, days: i64) -> Vec<String> {
    let mut entries = Vec::new();
    let today = Local::now().date_naive();

    for i in 0..days {
        let date = today - Duration::days(i);
        let path = journal_dir.join(format!("{date}.md"));
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };

        let mut in_completed = false;
        let mut session = String::new();
        for line in text.lines() {
            let stripped = line.trim();
            if let Some(heading) = stripped.strip_prefix("## ") {
                session = heading.trim().to_string();
                in_completed = false;
                continue;
            }
            if let Some(heading) = stripped.strip_prefix("### ") {
                in_completed =
                    detect_session_section(heading) == Some(SessionSection::Completed);
                continue;
            }
            if in_completed {
                if let Some(item) = stripped.strip_prefix("- ") {
                    let prefix = if session.is_empty() {
                        date.to_string()
                    } else {
                        format!("{date} {session}")
                    };
                    entries.push(format!("{prefix}: {item}"));
                }
            }
        }
    }

    entries.truncate(10);
    entries
}

fn read_tasks_body(path: &Path) -> String {
    let Ok(text) = std::fs::read_to_string(path) else {
        return EMPTY_PLACEHOLDER.to_string();
    };
    let doc = Document::parse(&text);
    let body = doc.body.trim();
    if body.is_empty() {
        EMPTY_PLACEHOLDER.to_string()
    } else {
        body.to_string()
    }
}

fn bullets_or_placeholder(items: &[String]) -> String {
    if items.is_empty() {
        EMPTY_PLACEHOLDER.to_string()
    } else {
        items
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Primer ──────────────────────────────────────────────────────

/// Assemble the primer body from fixed sources. Pure template work.
pub fn build_primer(
    global_root: &Path,
    project_memory_dir: Option<&Path>,
    project_name: &str,
    project_description: &str,
) -> String {
    let entities = bullets_or_placeholder(&extract_items(&global_root.join("user/entities.md"), 5));
    let preferences =
        bullets_or_placeholder(&extract_items(&global_root.join("user/preferences.md"), 5));

    let project_info = if project_name.is_empty() {
        EMPTY_PLACEHOLDER.to_string()
    } else if project_description.is_empty() {
        format!("- {project_name}")
    } else {
        format!("- {project_name} | {project_description}")
    };

    let recent = match project_memory_dir {
        Some(dir) => extract_recent_completed(&dir.join("journal"), 3),
        None => Vec::new(),
    };
    let recent_context = bullets_or_placeholder(&recent);

    let tasks = match project_memory_dir {
        Some(dir) => read_tasks_body(&dir.join("TASKS.md")),
        None => EMPTY_PLACEHOLDER.to_string(),
    };

    format!(
        "## User Identity\n{entities}\n\n## Project\n{project_info}\n\n\
         ## Preferences\n{preferences}\n\n## Recent Context (last 3 days)\n\
         {recent_context}\n\n## Active Tasks\n{tasks}\n"
    )
}

/// Render the full `primer` verb reply: standing instructions plus the
/// assembled context.
pub fn render_primer_reply(
    global_root: &Path,
    project_memory_dir: Option<&Path>,
    project_name: &str,
    project_description: &str,
) -> String {
    let body = build_primer(global_root, project_memory_dir, project_name, project_description);

    let mut parts = Vec::new();
    if let Ok(text) = std::fs::read_to_string(global_root.join("user/instructions.md")) {
        let instructions = Document::parse(&text).body.trim().to_string();
        if !instructions.is_empty() {
            parts.push(format!("# Instructions\n\n{instructions}"));
        }
    }
    parts.push(format!("# Context\n\n{body}"));
    parts.join("\n\n")
}

/// Build and write `PRIMER.md` into the project memory directory.
pub fn write_primer(
    global_root: &Path,
    project_memory_dir: &Path,
    project_name: &str,
    project_description: &str,
) -> Result<PathBuf> {
    let content = build_primer(
        global_root,
        Some(project_memory_dir),
        project_name,
        project_description,
    );
    let path = project_memory_dir.join("PRIMER.md");
    atomic_write(&path, &content)?;
    info!(path = %path.display(), "PRIMER.md updated");
    Ok(path)
}

// ── Session journal ─────────────────────────────────────────────

/// A field that may arrive as a string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(s) if s.trim().is_empty() => Vec::new(),
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v.into_iter().filter(|s| !s.trim().is_empty()).collect(),
        }
    }
}

impl Default for StringOrList {
    fn default() -> Self {
        StringOrList::Many(Vec::new())
    }
}

/// Structured session summary from the `session_end` verb.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSummary {
    pub request: String,
    pub learned: StringOrList,
    pub completed: StringOrList,
    pub next_steps: StringOrList,
}

fn push_section(lines: &mut Vec<String>, heading: &str, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("### {heading}"));
    for item in items {
        lines.push(format!("- {item}"));
    }
    lines.push(String::new());
}

/// Append a timestamped session block to today's journal file. Returns the
/// journal path.
pub fn write_session_journal(project_memory_dir: &Path, summary: SessionSummary) -> Result<PathBuf> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let path = project_memory_dir.join("journal").join(format!("{today}.md"));
    let time = Local::now().format("%H:%M");

    let mut lines = vec![format!("## Session {time}"), String::new()];
    if !summary.request.trim().is_empty() {
        lines.push("### Request".into());
        lines.push(summary.request.trim().to_string());
        lines.push(String::new());
    }
    push_section(&mut lines, "Learned", summary.learned.into_vec());
    push_section(&mut lines, "Completed", summary.completed.into_vec());
    push_section(&mut lines, "Next steps", summary.next_steps.into_vec());
    let block = lines.join("\n").trim_end().to_string();

    let mut doc = if path.is_file() {
        let mut doc = Document::parse(&std::fs::read_to_string(&path)?);
        doc.body = format!("{}\n\n---\n\n{block}\n", doc.body.trim_end());
        doc
    } else {
        let mut doc = Document::parse("");
        doc.meta.set("type", "journal");
        doc.meta.set("created", &today);
        doc.meta.set("sessions", "0");
        doc.body = format!("{block}\n");
        doc
    };
    let sessions = doc.meta.get_int("sessions").unwrap_or(0) + 1;
    doc.meta.set("sessions", sessions.to_string());
    doc.meta.set("updated", &today);

    atomic_write(&path, &doc.render())?;
    info!(path = %path.display(), "session summary written");
    Ok(path)
}

/// A structured observation about a coding action (the `observe` verb).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub action: String,
    pub result: String,
    pub files: String,
    pub insight: String,
}

/// Append a timestamped observation block to today's journal.
pub fn write_observation(project_memory_dir: &Path, obs: &Observation) -> Result<PathBuf> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let path = project_memory_dir.join("journal").join(format!("{today}.md"));
    let time = Local::now().format("%H:%M");

    let mut lines = vec![format!("### [{time}] {}", obs.action.trim())];
    if !obs.result.trim().is_empty() {
        lines.push(format!("- **Result:** {}", obs.result.trim()));
    }
    if !obs.files.trim().is_empty() {
        lines.push(format!("- **Files:** {}", obs.files.trim()));
    }
    if !obs.insight.trim().is_empty() {
        lines.push(format!("- **Insight:** {}", obs.insight.trim()));
    }
    let block = lines.join("\n");

    let mut doc = if path.is_file() {
        let mut doc = Document::parse(&std::fs::read_to_string(&path)?);
        doc.body = format!("{}\n\n{block}\n", doc.body.trim_end());
        doc
    } else {
        let mut doc = Document::parse("");
        doc.meta.set("type", "journal");
        doc.meta.set("created", &today);
        doc.meta.set("sessions", "0");
        doc.body = format!("{block}\n");
        doc
    };
    doc.meta.set("updated", &today);

    atomic_write(&path, &doc.render())?;
    Ok(path)
}

// ── Tasks ───────────────────────────────────────────────────────

/// One entry of the `update_tasks` verb payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskEntry {
    pub title: String,
    pub status: String,
    pub progress: String,
    pub next_step: String,
    pub related_files: Vec<String>,
}

/// Rewrite `TASKS.md` from the given entries.
pub fn write_tasks(project_memory_dir: &Path, tasks: &[TaskEntry]) -> Result<PathBuf> {
    let mut lines: Vec<String> = Vec::new();
    for task in tasks {
        let checkbox = if task.status == "done" { "[x]" } else { "[ ]" };
        let title = if task.title.is_empty() {
            "Untitled"
        } else {
            &task.title
        };
        lines.push(format!("- {checkbox} {title}"));
        if !task.progress.is_empty() {
            lines.push(format!("  - progress: {}", task.progress));
        }
        if !task.next_step.is_empty() {
            lines.push(format!("  - next step: {}", task.next_step));
        }
        if !task.related_files.is_empty() {
            lines.push(format!("  - related files: {}", task.related_files.join(", ")));
        }
    }

    let mut doc = Document::parse("");
    doc.meta.set("type", "tasks");
    doc.meta.set("updated", Local::now().format("%Y-%m-%d").to_string());
    doc.body = lines.join("\n");

    let path = project_memory_dir.join("TASKS.md");
    atomic_write(&path, &doc.render())?;
    info!(count = tasks.len(), "TASKS.md updated");
    Ok(path)
}
