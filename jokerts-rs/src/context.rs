use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;

#[derive(Debug, Parser)]
#[clap(name = "jokerts")]
#[clap(about = "jokerts captures MPEG transport streams and discovers the programs they carry.", long_about = None)]
#[clap(version)]
pub(crate) struct Cli {
    /// Configuration file.{n}
    /// Defaults to `jokerts.toml` in the working directory when present.
    #[clap(short = 'f', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Directory for rotated log files.{n}
    /// Logs go to stderr only when neither this nor the config file sets one.
    #[clap(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Output format for program listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Capture a transport stream.{n}
    /// The source is replayed through the streaming engine, realigned on
    /// packet boundaries and written to the output.
    #[clap(name = "capture")]
    Capture {
        /// The source.{n}
        /// A TS file, or '-' to read from stdin.
        #[clap(short = 'i', long = "input", value_name = "file", required = true)]
        source: String,

        /// The location of the output.{n}
        /// If '-' is specified, the stream is written to stdout.
        #[clap(short = 'o', long = "output", value_name = "file", required = true)]
        output: String,

        /// Stop after this many megabytes have been written.
        #[clap(short = 'l', long, value_name = "MB")]
        limit: Option<u64>,

        /// Discover programs while capturing and print them at the end.
        #[clap(short = 'p', long)]
        programs: bool,

        /// Count packets on a PID (decimal or 0x-prefixed hex).{n}
        /// May be given several times.
        #[clap(long = "count-pid", value_name = "PID", value_parser = maybe_hex::<u16>)]
        count_pid: Vec<u16>,

        /// Packet queue ceiling in bytes.
        #[clap(long, value_name = "BYTES")]
        queue_size: Option<usize>,

        /// Number of transfer buffers kept in flight.
        #[clap(long, value_name = "N")]
        buffers: Option<usize>,

        /// Hide the progress bar.
        #[clap(short = 'q', long)]
        quiet: bool,
    },
    /// List the programs carried by a transport stream.
    #[clap(name = "programs")]
    Programs {
        /// The source.{n}
        /// A TS file, or '-' to read from stdin.
        #[clap(short = 'i', long = "input", value_name = "file", required = true)]
        source: String,

        /// Output format.
        #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_args() {
        let cli = Cli::try_parse_from([
            "jokerts", "capture", "-i", "in.ts", "-o", "-", "--limit", "10", "-p", "--count-pid", "0x11",
            "--count-pid", "256",
        ])
        .unwrap();

        match cli.command {
            Commands::Capture {
                source,
                output,
                limit,
                programs,
                count_pid,
                ..
            } => {
                assert_eq!(source, "in.ts");
                assert_eq!(output, "-");
                assert_eq!(limit, Some(10));
                assert!(programs);
                assert_eq!(count_pid, vec![0x11, 256]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_programs_format() {
        let cli = Cli::try_parse_from(["jokerts", "programs", "-i", "-", "--format", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Programs { format, .. } => assert_eq!(format, OutputFormat::Json),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
