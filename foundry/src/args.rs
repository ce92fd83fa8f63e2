use std::path::PathBuf;

use clap::Parser;

/// Foundry generation job orchestrator
#[derive(Debug, Parser)]
#[command(name = "foundry", about = "Runs image, 3D model and video generation jobs across providers")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "foundry.toml", env = "FOUNDRY_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "FOUNDRY_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info", env = "FOUNDRY_LOG")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["foundry"]).unwrap();

        assert_eq!(args.config, PathBuf::from("foundry.toml"));
        assert!(args.listen.is_none());
        assert_eq!(args.log_filter, "info");
    }

    #[test]
    fn listen_override_parses_socket_address() {
        let args = Args::try_parse_from(["foundry", "--config", "dev.toml", "--listen", "127.0.0.1:4000"]).unwrap();

        assert_eq!(args.config, PathBuf::from("dev.toml"));
        assert_eq!(args.listen, Some("127.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn invalid_listen_address_is_rejected() {
        assert!(Args::try_parse_from(["foundry", "--listen", "not-an-address"]).is_err());
    }
}
