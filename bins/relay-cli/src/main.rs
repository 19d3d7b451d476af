mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "code-relay")]
#[command(about = "Code Relay - run and grade submissions against question testcases", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a submission against the visible testcases (or custom input)
    Run {
        /// Question file (JSON)
        #[arg(short, long)]
        question: PathBuf,

        /// Source file to execute
        #[arg(short, long)]
        source: PathBuf,

        /// Language name or alias (e.g., python3, cpp, Java)
        #[arg(short, long)]
        language: String,

        /// Custom stdin instead of the visible testcases
        #[arg(long)]
        input: Option<String>,

        /// Expected output for the custom input
        #[arg(long, requires = "input")]
        expected: Option<String>,
    },

    /// Grade a submission against every testcase
    Submit {
        /// Question file (JSON)
        #[arg(short, long)]
        question: PathBuf,

        /// Source file to execute
        #[arg(short, long)]
        source: PathBuf,

        /// Language name or alias
        #[arg(short, long)]
        language: String,

        /// Drop hidden testcase details from the output
        #[arg(long, default_value = "false")]
        redact: bool,
    },

    /// List supported languages
    Languages,

    /// Validate a question file without executing anything
    Check {
        /// Question file (JSON)
        #[arg(short, long)]
        question: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.json);

    match cli.command {
        Commands::Run {
            question,
            source,
            language,
            input,
            expected,
        } => {
            commands::run(&question, &source, &language, input, expected).await?;
        }
        Commands::Submit {
            question,
            source,
            language,
            redact,
        } => {
            commands::submit(&question, &source, &language, redact).await?;
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
        Commands::Check { question } => {
            commands::check(&question)?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
