use anyhow::Result;
use tracing_subscriber::EnvFilter;

use sumai_agent::agent::PropertyAgent;
use sumai_agent::chat::ChatService;
use sumai_agent::db::Database;
use sumai_agent::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;
    let agent = PropertyAgent::from_config(db.clone(), &config);
    let chat = ChatService::new(db, agent);

    run_server(config, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
