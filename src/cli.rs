//! Command-line interface definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::report::Format;

#[derive(Parser, Debug)]
#[command(name = "exercheck", version)]
#[command(about = "Check and submit programming-course exercises", long_about = None)]
pub struct Cli {
    /// Log verbosity on stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the checks for an exercise against the current directory
    Check(CheckArgs),

    /// Submit the current directory for remote evaluation
    Submit(SubmitArgs),

    /// Manage downloaded check specifications
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Exercise slug, e.g. cs50/hello
    pub slug: String,

    /// Language of the code (detected from file extensions if omitted)
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Format::Human)]
    pub output: Format,

    /// Load checks from PATH instead of the cache or the server
    #[arg(short = 'd', long, visible_alias = "dev", value_name = "PATH")]
    pub local: Option<PathBuf>,

    /// Run only this check and its prerequisites (repeatable)
    #[arg(long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// Refresh the checks from the server even if the cache is fresh
    #[arg(short, long)]
    pub update: bool,

    /// Include each check's log in the report
    #[arg(long)]
    pub log: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Exercise slug, e.g. cs50/hello
    pub slug: String,

    /// Language of the code (detected from file extensions if omitted)
    #[arg(short = 'L', long)]
    pub language: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Format::Human)]
    pub output: Format,

    /// Read the submission file list from checks at PATH
    #[arg(short = 'd', long, visible_alias = "dev", value_name = "PATH")]
    pub local: Option<PathBuf>,

    /// Message stored with the submission
    #[arg(short, long)]
    pub message: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Return right after uploading instead of waiting for the result
    #[arg(long = "async")]
    pub async_mode: bool,

    /// Seconds to wait for the evaluation result
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    pub timeout: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// List cached check specifications
    List,

    /// Remove cached check specifications
    Clear {
        /// Only this course/stage
        slug: Option<String>,

        /// Only this language
        #[arg(short = 'L', long)]
        language: Option<String>,
    },
}
