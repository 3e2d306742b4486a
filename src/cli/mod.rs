// CLI module for chatbridge
// Author: kelexine (https://github.com/kelexine)

use crate::config::AppConfig;
use clap::Parser;

/// chatbridge - OpenAI-compatible gateway for a ChatGPT-style conversation backend
#[derive(Parser, Debug, Default)]
#[command(name = "chatbridge", version, about, long_about = None)]
pub struct Args {
    /// Path to a configuration file (defaults to ~/.chatbridge/config.toml)
    #[arg(short, long, env = "CHATBRIDGE_CONFIG")]
    pub config: Option<String>,

    /// Override the bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from(["chatbridge", "--port", "9000", "--host", "0.0.0.0"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = Args::parse_from(["chatbridge"]);
        let mut config = AppConfig::default();
        let before = config.server.port;
        args.apply(&mut config);
        assert_eq!(config.server.port, before);
    }
}
