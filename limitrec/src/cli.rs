use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ./limitrec.toml, then the user config directory)
    #[arg(short, long, global = true, env = "LIMITREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a live stream until it ends or Ctrl-C is pressed
    Record {
        /// Stream page URL or channel name
        url: String,

        /// Password for password-protected streams
        #[arg(long, env = "LIMITREC_STREAM_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,

        /// Confirm the recording without prompting
        #[arg(short, long)]
        yes: bool,

        /// Retries after the first attempt (defaults to the configured value)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Disable automatic retries
        #[arg(long)]
        no_retry: bool,

        /// Stop the capture after this many minutes
        #[arg(long)]
        timeout_minutes: Option<u64>,

        /// best, worst, hd, medium or low
        #[arg(long, default_value = "best")]
        quality: String,

        /// Name used for the output file instead of the channel
        #[arg(long)]
        name: Option<String>,

        /// Fail instead of recording the page URL when no manifest is seen
        #[arg(long)]
        no_degraded: bool,
    },

    /// Check that external tools are installed
    Doctor {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the effective configuration
    Config {
        /// Print the merged configuration as TOML
        #[arg(long)]
        show: bool,
    },

    /// Describe a stream URL without opening it
    Classify {
        url: String,

        #[arg(long)]
        json: bool,
    },

    /// Log in and refresh the cached cookies
    Login {
        #[arg(long)]
        headless: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_record_arguments() {
        let args = Args::try_parse_from([
            "limitrec",
            "-v",
            "record",
            "https://twitcasting.tv/alice",
            "--yes",
            "--max-retries",
            "1",
            "--quality",
            "hd",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Record {
                url,
                yes,
                max_retries,
                quality,
                ..
            } => {
                assert_eq!(url, "https://twitcasting.tv/alice");
                assert!(yes);
                assert_eq!(max_retries, Some(1));
                assert_eq!(quality, "hd");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["limitrec", "-v", "-q", "doctor"]).is_err());
    }
}
