use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use ocmem_core::{MemoryError, Result};

use crate::schema::MemoryConfig;

/// Loads the merged configuration.
///
/// Precedence, lowest first: built-in defaults → global
/// `~/.openclaw_memory/config.toml` → project `.openclaw_memory.toml` →
/// `OPENCLAW_<SECTION>_<FIELD>` environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and merge all layers, detecting the project root from `cwd`.
    pub fn load(cwd: Option<&Path>, global_root: Option<PathBuf>) -> Result<MemoryConfig> {
        let global_root = global_root.unwrap_or_else(crate::schema::default_global_root);
        let cwd = match cwd {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let project_root = detect_project_root(&cwd);

        let mut merged = toml::Table::new();
        merge_file(&mut merged, &global_root.join("config.toml"))?;
        if let Some(ref root) = project_root {
            // Either location is accepted; the bare project-root file wins.
            let nested = root.join(".openclaw_memory").join(".openclaw_memory.toml");
            let bare = root.join(".openclaw_memory.toml");
            if bare.is_file() {
                merge_file(&mut merged, &bare)?;
            } else {
                merge_file(&mut merged, &nested)?;
            }
        }
        apply_env_overrides(&mut merged);

        let mut config: MemoryConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e| MemoryError::Config(format!("invalid configuration: {e}")))?;
        config.global_root = global_root;
        config.project_root = project_root;

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{w}");
                }
            }
            Err(e) => return Err(MemoryError::Config(e)),
        }

        debug!(
            global_root = %config.global_root.display(),
            project = ?config.project_root,
            provider = %config.embedding.provider,
            "configuration loaded"
        );
        Ok(config)
    }
}

/// Parse a TOML file into the accumulator, deep-merging tables.
fn merge_file(target: &mut toml::Table, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path)?;
    let parsed: toml::Table = toml::from_str(&raw)
        .map_err(|e| MemoryError::Config(format!("failed to parse {}: {e}", path.display())))?;
    deep_merge(target, parsed);
    Ok(())
}

fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `OPENCLAW_SECTION_FIELD=value` environment overrides.
///
/// The value is coerced to bool/integer/float when it parses as one, so
/// `OPENCLAW_EMBEDDING_DIMENSION=768` lands as an integer.
fn apply_env_overrides(cfg: &mut toml::Table) {
    const PREFIX: &str = "OPENCLAW_";
    for (key, val) in std::env::vars() {
        let Some(rest) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let Some((section, field)) = rest.split_once('_') else {
            continue;
        };
        let section = section.to_ascii_lowercase();
        let field = field.to_ascii_lowercase();

        let entry = cfg
            .entry(section)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(table) = entry {
            table.insert(field, coerce_value(&val));
        }
    }
}

fn coerce_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

/// Detect the project root: walk up looking for `.openclaw_memory.toml`
/// (directly or inside `.openclaw_memory/`), then fall back to the git
/// top-level.
pub fn detect_project_root(cwd: &Path) -> Option<PathBuf> {
    for dir in cwd.ancestors() {
        if dir.join(".openclaw_memory.toml").is_file()
            || dir
                .join(".openclaw_memory")
                .join(".openclaw_memory.toml")
                .is_file()
        {
            return Some(dir.to_path_buf());
        }
    }

    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(cwd)
        .output()
        .ok()?;
    if output.status.success() {
        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !top.is_empty() {
            return Some(PathBuf::from(top));
        }
    }
    None
}

/// Create the on-disk directory skeleton for both scopes.
pub fn ensure_directories(config: &MemoryConfig) -> Result<()> {
    std::fs::create_dir_all(config.global_user_dir())?;
    if let Some(dir) = config.project_memory_dir() {
        std::fs::create_dir_all(dir.join("journal"))?;
        std::fs::create_dir_all(dir.join("agent"))?;
    }
    Ok(())
}
