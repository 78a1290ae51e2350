//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// ArtReport - marketing reports for fine art photographs
///
/// Critiques a photograph, previews it on print mediums, researches pricing,
/// product copy, campaigns and social channels with local models, then
/// writes everything into a single HTML report.
///
/// Examples:
///   artreport --photo ./dunes.jpg --title "Dunes at dusk"
///   artreport --photo ./dunes.jpg --mediums Metal,Canvas --tags desert,sand
///   artreport --print-graph
///   artreport --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Photograph to analyse
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["init_config", "print_graph"]
    )]
    pub photo: Option<PathBuf>,

    /// Catalog id of the photograph; also names its project folder
    ///
    /// Defaults to the file name without extension.
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Title of the photograph
    #[arg(long)]
    pub title: Option<String>,

    /// Description of the photograph
    #[arg(long)]
    pub description: Option<String>,

    /// Tags (comma-separated)
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Option<Vec<String>>,

    /// Categories (comma-separated)
    #[arg(long, value_name = "CATEGORIES", value_delimiter = ',')]
    pub categories: Option<Vec<String>>,

    /// Analyse only these configured mediums (comma-separated)
    ///
    /// Example: --mediums Metal,Canvas
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub mediums: Option<Vec<String>>,

    /// Print the workflow graph as a Mermaid diagram and exit
    #[arg(long)]
    pub print_graph: bool,

    /// Root folder for projects and reports
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Chat model for research and writing
    #[arg(short, long, env = "ARTREPORT_MODEL")]
    pub model: Option<String>,

    /// Vision model for the critique
    #[arg(long)]
    pub vision_model: Option<String>,

    /// Image generation model for medium previews
    #[arg(long)]
    pub image_model: Option<String>,

    /// Temperature for LLM responses (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .artreport.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .artreport.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref id) = self.id {
            if id.trim().is_empty() || id.contains(['/', '\\']) {
                return Err(format!("Invalid photo id: '{}'", id));
            }
        }

        if self.print_graph {
            return Ok(());
        }

        if let Some(ref photo) = self.photo {
            if !photo.is_file() {
                return Err(format!("Photo file does not exist: {}", photo.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::WARN
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// The catalog id: `--id`, else the photo's file stem.
    pub fn photo_id(&self) -> Option<String> {
        self.id.clone().or_else(|| {
            self.photo
                .as_ref()
                .and_then(|p| p.file_stem())
                .map(|stem| stem.to_string_lossy().replace(' ', "_"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["artreport"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_photo_required() {
        assert!(Args::try_parse_from(["artreport"]).is_err());
        assert!(Args::try_parse_from(["artreport", "--init-config"]).is_ok());
        assert!(Args::try_parse_from(["artreport", "--print-graph"]).is_ok());
    }

    #[test]
    fn test_lists_split_on_commas() {
        let args = parse(&["--photo", "a.jpg", "--tags", "desert,sand", "--mediums", "Metal,Canvas"]);
        assert_eq!(args.tags.unwrap(), vec!["desert", "sand"]);
        assert_eq!(args.mediums.unwrap(), vec!["Metal", "Canvas"]);
    }

    #[test]
    fn test_photo_id() {
        let args = parse(&["--photo", "/tmp/sand dunes.jpg"]);
        assert_eq!(args.photo_id().unwrap(), "sand_dunes");

        let args = parse(&["--photo", "/tmp/a.jpg", "--id", "dunes-01"]);
        assert_eq!(args.photo_id().unwrap(), "dunes-01");
    }

    #[test]
    fn test_validation_missing_photo() {
        let args = parse(&["--photo", "/definitely/not/here.jpg"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["--print-graph", "-v", "-q"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_bad_id() {
        let args = parse(&["--print-graph", "--id", "../escape"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["--print-graph"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::WARN);
    }
}
