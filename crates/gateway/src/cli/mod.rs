pub mod ask;
pub mod config;

use clap::{Parser, Subcommand};

/// ChatRelay: proxies website chat widgets to hosted assistants.
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the relay server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Send a single message through the relay and print the reply.
    Ask {
        /// The message to send.
        message: String,
        /// Tenant WordPress site URL (used for key lookup and tool submission).
        #[arg(long)]
        site: String,
        /// Name of the stored API key on the tenant site.
        #[arg(long)]
        key_name: String,
        /// Assistant id.
        #[arg(long)]
        assistant: String,
        /// Thread to resume.
        #[arg(long)]
        thread: Option<String>,
        /// Webhook URL forwarded with tool submissions.
        #[arg(long)]
        webhook: Option<String>,
        /// Print the full response body as JSON instead of the reply text.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `CR_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used. A missing file yields the defaults.
///
/// [`Config`]: cr_domain::config::Config
pub fn load_config() -> anyhow::Result<(cr_domain::config::Config, String)> {
    let config_path = std::env::var("CR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<cr_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(cr_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
