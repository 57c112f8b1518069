use anyhow::Result;
use bronie::agent::Session;
use bronie::cli::Cli;
use bronie::gateway::ProviderRouter;
use bronie::tool_registry::ToolRegistry;
use bronie::tools::builtin_tools;
use bronie::{config, logging, ui};
use clap::Parser;
use console::style;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => config::load_or_create_at(path)?,
        None => config::load_or_create()?,
    };
    if let Some(model) = cli.model.clone() {
        config.models.agent = model;
    }
    let config = Arc::new(config);

    match logging::init(&config) {
        Ok(path) => tracing::debug!(path = %path.display(), "logging initialized"),
        Err(e) => eprintln!("{} {e:#}", style("Warning: logging disabled:").yellow()),
    }

    let (registry, errors) = ToolRegistry::from_table(builtin_tools());
    for e in &errors {
        eprintln!("{} {e}", style("Warning:").yellow());
    }
    let registry = Arc::new(registry);
    let router = ProviderRouter::from_config(&config);

    let session = Session::new(config.clone(), registry, router, &cli.project_dir)?;

    println!("project: {}", session.project_root().display());
    println!("tools: {}", session.tool_names().join(", "));
    println!("model: {}", session.models().agent);
    println!("{}", style("Type :help for commands.").dim());

    let mut app = ui::App::new(session);
    app.run(cli.prompt).await?;

    Ok(())
}
