//! Command-line interface definition using clap
//!
//! The CLI surface is deliberately a single flag: everything else lives in
//! the config file.

use clap::Parser;
use std::path::PathBuf;

/// Log-shipping server: framed log streams in, rotated files out
#[derive(Parser, Debug)]
#[command(name = "logcarrier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = "/usr/local/etc/logcarrier.yaml"
    )]
    pub config: PathBuf,

    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let cli = Cli::parse_from(["logcarrier"]);
        assert_eq!(
            cli.config,
            PathBuf::from("/usr/local/etc/logcarrier.yaml")
        );
        assert!(!cli.verbose);
    }

    #[test]
    fn test_explicit_config_path() {
        let cli = Cli::parse_from(["logcarrier", "-c", "/tmp/lc.yaml", "-v"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/lc.yaml"));
        assert!(cli.verbose);
    }
}
