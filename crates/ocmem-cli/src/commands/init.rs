//! `ocmem init`: scaffold the global and project memory trees.

use std::path::{Path, PathBuf};

use chrono::Local;

use ocmem_core::Result;

use super::Provider;

const GITIGNORE_CONTENT: &str = "\
# OpenClaw Memory (keep markdown, ignore the derived index)
index.db
index.db-wal
index.db-shm
";

pub(super) fn cmd_init(
    global_root: Option<PathBuf>,
    provider: Option<Provider>,
    name: &str,
    global_only: bool,
) -> Result<()> {
    let global_root =
        global_root.unwrap_or_else(ocmem_config::schema::default_global_root);
    let project_dir = std::env::current_dir()?;
    let project_name = if name.is_empty() {
        project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        name.to_string()
    };
    let provider = provider.unwrap_or_else(detect_provider);

    println!("OpenClaw Memory — initializing\n");

    init_global(&global_root)?;
    if global_only {
        println!("\nDone (global only).");
        return Ok(());
    }

    init_project(&project_dir, &project_name, provider)?;

    println!("\nSetup complete.");
    println!("  Global memory : {}", global_root.display());
    println!("  Project memory: {}", project_dir.join(".openclaw_memory").display());
    println!("  Provider      : {}", provider.as_str());

    match provider {
        Provider::Openai if std::env::var("OPENAI_API_KEY").is_err() => {
            println!("\n  NOTE: set OPENAI_API_KEY in the environment.");
        }
        Provider::Ollama => {
            println!("\n  NOTE: make sure Ollama is running (ollama serve)");
            println!("        and the model is pulled: ollama pull nomic-embed-text");
        }
        _ => {}
    }
    Ok(())
}

/// Pick the best available provider: an OpenAI key wins, then a reachable
/// Ollama, then fully offline local embeddings.
fn detect_provider() -> Provider {
    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return Provider::Openai;
    }
    let ollama_up = std::net::TcpStream::connect_timeout(
        &"127.0.0.1:11434".parse().unwrap(),
        std::time::Duration::from_secs(2),
    )
    .is_ok();
    if ollama_up {
        return Provider::Ollama;
    }
    Provider::Local
}

fn init_global(global_root: &Path) -> Result<()> {
    let user_dir = global_root.join("user");
    let mut created = Vec::new();

    if !user_dir.exists() {
        std::fs::create_dir_all(&user_dir)?;
        created.push("user/".to_string());
    }

    let today = Local::now().format("%Y-%m-%d").to_string();
    let templates = [
        ("preferences.md", "preference", 4),
        ("instructions.md", "instruction", 5),
        ("entities.md", "entity", 3),
    ];
    for (file, kind, importance) in templates {
        let path = user_dir.join(file);
        if path.exists() {
            continue;
        }
        std::fs::write(
            &path,
            format!(
                "---\ntype: {kind}\nimportance: {importance}\nreinforcement: 0\n\
                 created: {today}\nupdated: {today}\nstatus: active\n---\n"
            ),
        )?;
        created.push(file.to_string());
    }

    if created.is_empty() {
        println!("[1/3] Global memory: already exists (skipped)");
    } else {
        println!("[1/3] Global memory initialized: {}", global_root.display());
        for c in &created {
            println!("       + {c}");
        }
    }
    Ok(())
}

fn init_project(project_dir: &Path, project_name: &str, provider: Provider) -> Result<()> {
    let memory_dir = project_dir.join(".openclaw_memory");
    let mut created = Vec::new();

    for sub in ["journal", "agent"] {
        let dir = memory_dir.join(sub);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            created.push(format!("{sub}/"));
        }
    }

    let toml_path = project_dir.join(".openclaw_memory.toml");
    if !toml_path.exists() {
        std::fs::write(
            &toml_path,
            format!(
                "[project]\nname = \"{project_name}\"\ndescription = \"\"\n\n\
                 [embedding]\nprovider = \"{}\"\n\n[privacy]\nenabled = true\n\n\
                 [search]\ndefault_max_tokens = 1500\n",
                provider.as_str()
            ),
        )?;
        created.push(".openclaw_memory.toml".to_string());
    }

    let tasks_path = memory_dir.join("TASKS.md");
    if !tasks_path.exists() {
        std::fs::write(&tasks_path, "---\ntype: tasks\nupdated: ''\n---\n")?;
        created.push("TASKS.md".to_string());
    }

    if created.is_empty() {
        println!("[2/3] Project memory: already exists (skipped)");
    } else {
        println!("[2/3] Project memory initialized: .openclaw_memory/");
        for c in &created {
            println!("       + {c}");
        }
    }

    // Keep the derived index out of version control.
    let gitignore = memory_dir.join(".gitignore");
    if gitignore.exists() {
        println!("[3/3] Gitignore: already exists (skipped)");
    } else {
        std::fs::write(&gitignore, GITIGNORE_CONTENT)?;
        println!("[3/3] Gitignore: .openclaw_memory/.gitignore");
    }
    Ok(())
}
