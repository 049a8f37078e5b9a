use std::path::PathBuf;

use clap::Parser;

/// Routing proxy between Anthropic-Messages-API clients and a fleet of upstream LLM providers
#[derive(Debug, Parser)]
#[command(name = "ccrouter", about = "Routes Anthropic Messages API requests across configured LLM providers")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "./ccrouter.json", env = "CCROUTER_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "CCROUTER_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}
