mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{CheckConfigArgs, LabelsArgs};

/// mixtrain: interleaved image-text / text-only multimodal training utilities.
#[derive(Parser)]
#[command(name = "mixtrain", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for checking configs and inspecting label masks.
#[derive(Subcommand)]
enum Command {
    /// Load a training config and everything it references.
    CheckConfig {
        /// Path to the training config TOML file.
        #[arg(long, default_value = "configs/train.toml")]
        config: PathBuf,
    },
    /// Tokenize a text and print the labels the trainer would use.
    Labels {
        /// Path to a HuggingFace tokenizer.json.
        #[arg(long)]
        tokenizer: PathBuf,
        /// Text to tokenize.
        #[arg(long)]
        text: String,
        /// Use text-only labels (mask everything before the first media token).
        #[arg(long)]
        text_only: bool,
        /// Pad token; defaults to the tokenizer's own.
        #[arg(long)]
        pad_token: Option<String>,
        /// Media placeholder literal.
        #[arg(long, default_value = "<image>")]
        media_token: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { config } => pipeline::run_check_config(CheckConfigArgs { config }),
        Command::Labels {
            tokenizer,
            text,
            text_only,
            pad_token,
            media_token,
        } => pipeline::run_labels(LabelsArgs {
            tokenizer,
            text,
            text_only,
            pad_token,
            media_token,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_labels() {
        let cli = Cli::try_parse_from([
            "mixtrain",
            "labels",
            "--tokenizer",
            "tok.json",
            "--text",
            "<image> a cat",
            "--text-only",
        ])
        .unwrap();
        match cli.command {
            Command::Labels {
                text_only,
                media_token,
                pad_token,
                ..
            } => {
                assert!(text_only);
                assert_eq!(media_token, "<image>");
                assert!(pad_token.is_none());
            }
            _ => panic!("expected labels subcommand"),
        }
    }

    #[test]
    fn test_parse_check_config_default_path() {
        let cli = Cli::try_parse_from(["mixtrain", "check-config"]).unwrap();
        match cli.command {
            Command::CheckConfig { config } => {
                assert_eq!(config, PathBuf::from("configs/train.toml"))
            }
            _ => panic!("expected check-config subcommand"),
        }
    }
}
