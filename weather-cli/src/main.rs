//! Binary crate for the `weather-etl` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and interactive configuration
//! - Logging setup
//! - Driving single runs or the recurring schedule
//! - Printing read queries as JSON

use clap::Parser;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
