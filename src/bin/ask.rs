use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sumai_agent::agent::{AgentQuery, PropertyAgent};
use sumai_agent::config::AppConfig;
use sumai_agent::db::Database;
use sumai_agent::models::ExplicitMode;

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Run one message through the property agent and print the JSON result")]
struct Cli {
    /// The question, e.g. "船橋市の3LDKで5000万円以下"
    message: String,
    /// Force a handler: `geo` or `area`
    #[arg(long)]
    mode: Option<String>,
    /// Search radius in metres for geo searches
    #[arg(long)]
    radius: Option<f64>,
    #[arg(long, default_value = "cli")]
    session: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;
    let agent = PropertyAgent::from_config(db, &config);

    let response = agent
        .analyze_query(AgentQuery {
            message: cli.message,
            session_id: cli.session,
            mode: ExplicitMode::parse(cli.mode.as_deref()),
            radius_m: cli.radius,
            history: vec![],
        })
        .await;

    let body = serde_json::to_string_pretty(&response).context("failed to encode response")?;
    println!("{body}");
    Ok(())
}
