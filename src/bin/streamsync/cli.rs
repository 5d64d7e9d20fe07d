use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "streamsync",
    version,
    about = "Discover, bind and read network sensor streams",
    long_about = "Normalize stream channel metadata, inspect persisted stream bindings and run\n\
                  clock-synchronized consumers against simulated streams."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (JSON); built-in defaults when absent
    #[arg(long, global = true, env = "STREAMSYNC_CONFIG")]
    pub config: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the canonical channel list of a raw stream description
    Normalize(NormalizeArgs),
    /// List persisted stream bindings
    Bindings(BindingsArgs),
    /// Run consumers against simulated streams and report statistics
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct NormalizeArgs {
    /// File holding the raw description (XML or JSON)
    #[arg(long)]
    pub file: String,

    /// Declared channel count of the stream
    #[arg(long)]
    pub channels: usize,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct BindingsArgs {
    /// Binding file (default: the configured bindings path)
    #[arg(long)]
    pub file: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Independent consumers per stream
    #[arg(long, default_value_t = 2)]
    pub consumers: usize,

    /// Seconds to stream
    #[arg(long, default_value_t = 2.0)]
    pub duration: f64,

    /// Channels of the simulated EEG stream
    #[arg(long, default_value_t = 8)]
    pub channels: usize,

    /// Sample rate of the simulated EEG stream (Hz)
    #[arg(long, default_value_t = 256.0)]
    pub rate: f64,

    /// 0-based channel indices to bind (default: all)
    #[arg(long, num_args = 1..)]
    pub select: Option<Vec<usize>>,

    /// Also simulate a stream on a remote host with a skewed clock
    #[arg(long, default_value_t = false)]
    pub remote: bool,

    /// Save the demo bindings to this file
    #[arg(long)]
    pub save_bindings: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
