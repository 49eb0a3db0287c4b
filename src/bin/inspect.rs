use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use atundo::config::{AtConfig, UndoConfig};
use atundo::undo::executor::undo_executor_for;
use atundo::undo::UndoLogCodec;

#[derive(Parser)]
#[command(author, version, about = "atundo inspector - decode undo log rows and check configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a rollback_info payload and show the statements that would undo it
    Decode {
        /// Value of the row's context column
        #[arg(short, long, default_value = "serializerKey=json&compressorTypeKey=none")]
        context: String,

        /// Payload as hex
        #[arg(long, conflicts_with = "file")]
        hex: Option<String>,

        /// File holding the raw payload
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate a JSON configuration file and print the effective settings
    Config {
        /// Configuration file path
        path: PathBuf,
    },
}

fn read_payload(hex_arg: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>> {
    match (hex_arg, file) {
        (Some(text), _) => {
            let text = text.trim().trim_start_matches("0x");
            hex::decode(text).context("payload is not valid hex")
        }
        (None, Some(path)) => fs::read(&path).with_context(|| format!("cannot read {}", path.display())),
        (None, None) => bail!("either --hex or --file is required"),
    }
}

fn decode(context: &str, payload: &[u8]) -> Result<()> {
    let codec = UndoLogCodec::from_config(&UndoConfig::default())?;
    let branch_log = codec.decode(context, payload)?;

    println!("{}", serde_json::to_string_pretty(&branch_log)?);
    println!();
    println!("Undo statements, in replay order:");
    for log in branch_log.logs.iter().rev() {
        let executor = undo_executor_for(log)?;
        for compensation in executor.compensations()? {
            let args: Vec<String> = compensation.args.iter().map(|a| a.value.to_string()).collect();
            println!("  {}  -- [{}]", compensation.sql, args.join(", "));
        }
    }
    Ok(())
}

fn check_config(path: &PathBuf) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let config = AtConfig::from_json(&text)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Decode { context, hex, file } => {
            let payload = read_payload(hex, file)?;
            decode(&context, &payload)
        }
        Commands::Config { path } => check_config(&path),
    }
}
