use chrono::Local;
use clap::Parser;
use opendump::{config::Config, info_time, process::process_dataset, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let start_time = Local::now();
    let config = Config::parse();
    process_dataset(&config).await?;
    info_time!(start_time, "Full program time:");

    Ok(())
}
