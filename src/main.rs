use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use wgadmin::{
    database::Database,
    exec::{self, Shell},
    service::{self, Wgadmin},
    ui,
};

#[derive(Debug, Parser)]
struct Config {
    #[clap(long, short, env = "DB")]
    db: String,
    #[clap(flatten)]
    service: service::Config,
    #[clap(flatten)]
    exec: exec::Config,

    #[clap(flatten)]
    api: ui::web::Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    pretty_env_logger::init();

    let config = Config::parse();

    let database = Database::new(&config.db).await?;

    let runner = Arc::new(Shell::new(config.exec));
    let service = Wgadmin::new(config.service, runner, database)?;

    for f in ui::run(config.api, service) {
        f.await??;

        warn!("frontend stopped")
    }

    Ok(())
}
