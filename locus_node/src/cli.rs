// locus_node/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Locus: multi-sensor localisation node.
///
/// Runs synthetic course, pose and range sources through their update
/// bridges into a shared filter and reports the resulting estimate.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the TOML configuration file. Missing files fall back to
    /// the built-in defaults.
    #[arg(short, long, default_value = "config/locus.toml")]
    pub config: PathBuf,

    /// Overrides `simulation.duration_seconds`.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Overrides `simulation.seed`.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["locus_node"]);
        assert_eq!(cli.config, PathBuf::from("config/locus.toml"));
        assert_eq!(cli.duration, None);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "locus_node",
            "-c",
            "other.toml",
            "-d",
            "2.5",
            "--seed",
            "3",
            "--print-config",
        ]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert_eq!(cli.duration, Some(2.5));
        assert_eq!(cli.seed, Some(3));
        assert!(cli.print_config);
    }
}
