// src/bin/bulk_scrape.rs
use clap::Parser;
use wash_scrape::cli::{self, Cli};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    cli::run(Cli::parse()).await
}
