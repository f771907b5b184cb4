use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use ocmem_config::ConfigLoader;

mod index;
mod init;
mod serve;

/// OpenClaw Memory — local, file-backed memory service for AI coding agents
#[derive(Parser)]
#[command(name = "ocmem", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Override the global memory root (default ~/.openclaw_memory)
    #[arg(long, global = true)]
    global_root: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the memory service (default)
    Serve {
        /// Transport: line-delimited stdio or SSE on a port
        #[arg(long, value_enum, default_value_t = Transport::Stdio)]
        transport: Transport,

        /// Port for the SSE transport
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },
    /// Initialize memory for the current project (one-command setup)
    Init {
        /// Embedding provider (default: auto-detect)
        #[arg(long, value_enum)]
        provider: Option<Provider>,

        /// Project name (default: directory name)
        #[arg(long, default_value = "")]
        name: String,

        /// Only initialize the global ~/.openclaw_memory/
        #[arg(long)]
        global_only: bool,
    },
    /// Index memory files and exit
    Index,
    /// Show per-scope index statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Transport {
    Stdio,
    Sse,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Openai,
    Ollama,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Ollama => "ollama",
            Provider::Local => "local",
        }
    }
}

impl Cli {
    pub async fn run(self) -> ocmem_core::Result<()> {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or("warn")
        };

        // The stdio transport owns stdout; logs go to stderr regardless.
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();

        let command = self.command.unwrap_or(Commands::Serve {
            transport: Transport::Stdio,
            port: 8765,
        });

        match command {
            Commands::Serve { transport, port } => {
                let config = ConfigLoader::load(None, self.global_root)?;
                serve::cmd_serve(config, transport, port).await
            }
            Commands::Init {
                provider,
                name,
                global_only,
            } => init::cmd_init(self.global_root, provider, &name, global_only),
            Commands::Index => {
                let config = ConfigLoader::load(None, self.global_root)?;
                index::cmd_index(config).await
            }
            Commands::Stats => {
                let config = ConfigLoader::load(None, self.global_root)?;
                index::cmd_stats(config).await
            }
        }
    }
}
