use clap::Parser;
use std::path::PathBuf;

/// A terminal coding assistant that reads and edits your project
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project directory the assistant may read and modify
    #[arg(default_value = ".")]
    pub project_dir: PathBuf,

    /// Run this prompt first, then continue interactively
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Agent model for this run, as provider/model
    #[arg(short, long)]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["bronie"]);
        assert_eq!(cli.project_dir, PathBuf::from("."));
        assert!(cli.prompt.is_none());
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::parse_from([
            "bronie",
            "../app",
            "--prompt",
            "fix it",
            "-m",
            "ollama/llama3",
            "--config",
            "/tmp/c.toml",
        ]);
        assert_eq!(cli.project_dir, PathBuf::from("../app"));
        assert_eq!(cli.prompt.as_deref(), Some("fix it"));
        assert_eq!(cli.model.as_deref(), Some("ollama/llama3"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
