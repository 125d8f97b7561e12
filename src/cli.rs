use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "posefocus", version, about = "Camera-driven focus session tracker")]
pub struct Cli {
    /// Settings file (JSON). Defaults to settings.json in the data directory.
    #[arg(long, global = true, env = "POSEFOCUS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a session driven by a recorded frame script (JSON lines).
    Run {
        #[arg(long)]
        script: PathBuf,

        /// Stop manually after this many seconds if the session is still running.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Print the scoreboard.
    Scores,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "posefocus",
            "run",
            "--script",
            "frames.jsonl",
            "--seconds",
            "90",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { script, seconds } => {
                assert_eq!(script, PathBuf::from("frames.jsonl"));
                assert_eq!(seconds, Some(90));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["posefocus", "scores", "--config", "/tmp/s.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::Scores));
    }

    #[test]
    fn run_requires_script() {
        assert!(Cli::try_parse_from(["posefocus", "run"]).is_err());
    }
}
