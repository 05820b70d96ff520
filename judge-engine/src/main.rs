use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use judge_engine::repository::PgSubmissionStore;
use judge_engine::{service, Config, JudgeService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "judge_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = Arc::new(PgSubmissionStore::connect(&config.database_url).await?);

    let judge = Arc::new(JudgeService::new(config, store));
    judge.start();
    service::install_global(judge.clone());

    tracing::info!("judge engine started; submissions will be judged as they arrive");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down; draining in-flight jobs");
    judge.stop().await;

    Ok(())
}
