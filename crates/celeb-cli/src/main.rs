use anyhow::{Context, Result};
use celeb_config::Config;
use celeb_core::{ClassRegistry, ImageSource, Pipeline};
use celeb_summary::{get_celebrity_summary, pretty_name_from_label, GeminiClient, SummaryGenerator};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "celeb", about = "Sports celebrity classifier CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the faces in an image file
    Classify {
        /// Image file, or a text file holding a base64 / data URL payload with --base64
        path: PathBuf,
        /// Treat PATH as base64 text instead of an encoded image
        #[arg(long)]
        base64: bool,
    },
    /// Print a short profile for a class label (e.g. "virat_kohli")
    Describe { label: String },
    /// List the classes the model knows
    Classes,
}

/// `RUST_LOG` directives, warnings and errors when unset.
fn log_filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives.unwrap_or_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable JSON.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Classify { path, base64 } => {
            let shown = path.display().to_string();
            let source = if base64 {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                ImageSource::Base64(text)
            } else {
                ImageSource::Path(path)
            };

            let mut pipeline = Pipeline::load(&config.artifact_paths()).context("loading artifacts")?;
            let results = pipeline.classify(&source)?;
            if results.is_empty() {
                tracing::warn!(path = %shown, "no face with two visible eyes found");
            }
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Describe { label } => {
            let generator = config.gemini_config().map(GeminiClient::new).transpose()?;
            let summary =
                get_celebrity_summary(generator.as_ref().map(|g| g as &dyn SummaryGenerator), &label).await;
            let out = json!({
                "label": label,
                "name": pretty_name_from_label(&label),
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Classes => {
            let registry = ClassRegistry::load(&config.artifact_paths().class_dictionary)?;
            println!("{}", serde_json::to_string_pretty(&registry)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_shown_by_default() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            log_filter(Some("debug".to_string())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }

    #[test]
    fn test_parse_classify_path() {
        let cli = Cli::try_parse_from(["celeb", "classify", "team.jpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Classify { ref path, base64: false } if path == &PathBuf::from("team.jpg")
        ));
    }

    #[test]
    fn test_parse_classify_base64() {
        let cli = Cli::try_parse_from(["celeb", "classify", "--base64", "payload.txt"]).unwrap();
        assert!(matches!(cli.command, Commands::Classify { base64: true, .. }));
    }

    #[test]
    fn test_parse_describe_requires_label() {
        assert!(Cli::try_parse_from(["celeb", "describe"]).is_err());
        let cli = Cli::try_parse_from(["celeb", "describe", "roger_federer"]).unwrap();
        assert!(matches!(cli.command, Commands::Describe { ref label } if label == "roger_federer"));
    }
}
