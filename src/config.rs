//! Server configuration: defaults, environment overrides, CLI flags.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Root directory under which per-project review state is persisted.
    pub data_root: PathBuf,
    /// Port the HTTP control plane tries first before falling back to an OS-assigned one.
    pub preferred_port: u16,
    /// Seconds of no control-plane traffic before the server shuts itself down.
    pub idle_timeout_secs: u64,
    /// SSE keep-alive interval.
    pub heartbeat_interval_secs: u64,
    /// Upper bound on how long `ask_questions` blocks before returning a timeout result.
    pub ask_questions_timeout_secs: u64,
    /// Fallback project scope used when a request omits its own `project` parameter.
    #[serde(default)]
    pub default_project: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./.plan-review"),
            preferred_port: 3030,
            idle_timeout_secs: 1800,
            heartbeat_interval_secs: 30,
            ask_questions_timeout_secs: 600,
            default_project: None,
        }
    }
}

impl ServerConfig {
    /// Apply `PLAN_REVIEW_*` environment variable overrides on top of defaults.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PLAN_REVIEW_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PLAN_REVIEW_PORT") {
            if let Ok(port) = v.parse() {
                self.preferred_port = port;
            }
        }
        if let Ok(v) = std::env::var("PLAN_REVIEW_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.idle_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("PLAN_REVIEW_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.heartbeat_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("PLAN_REVIEW_ASK_QUESTIONS_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.ask_questions_timeout_secs = secs;
            }
        }
        self
    }

    /// Apply CLI flags on top of env-overridden defaults. CLI always wins.
    pub fn apply_cli(mut self, cli: &ServeArgs) -> Self {
        if let Some(dir) = &cli.data_root {
            self.data_root = dir.clone();
        }
        if let Some(port) = cli.port {
            self.preferred_port = port;
        }
        if let Some(project) = &cli.project {
            self.default_project = Some(project.display().to_string());
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Parser, Debug)]
#[command(name = "plan-review", about = "Human-in-the-loop plan review server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Start the server, serving both the agent tool surface and the HTTP control plane.
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Which transport the agent tool surface listens on.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Default project scope for requests that don't specify their own `project`
    /// parameter. Unset by default, so every request must then name its project.
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Override the data root that reviews are persisted under.
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Override the preferred HTTP control-plane port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.preferred_port, 3030);
        assert_eq!(cfg.idle_timeout_secs, 1800);
    }

    #[test]
    fn test_cli_project_becomes_default_project() {
        let args = ServeArgs {
            transport: Transport::Stdio,
            project: Some(PathBuf::from("/srv/widgets")),
            data_root: None,
            port: None,
        };
        let cfg = ServerConfig::default().apply_cli(&args);
        assert_eq!(cfg.default_project.as_deref(), Some("/srv/widgets"));
    }

    #[test]
    fn test_env_override_port() {
        // SAFETY: test-only, no concurrent access to this var in this process.
        unsafe {
            std::env::set_var("PLAN_REVIEW_PORT", "9999");
        }
        let cfg = ServerConfig::default().apply_env_overrides();
        assert_eq!(cfg.preferred_port, 9999);
        unsafe {
            std::env::remove_var("PLAN_REVIEW_PORT");
        }
    }
}
