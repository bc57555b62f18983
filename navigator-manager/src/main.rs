use anyhow::Result;
use clap::Parser;

use navigator_manager::args::Args;
use navigator_manager::server::run_manager;

#[tokio::main]
async fn main() -> Result<()> {
    navigator_common::init_tracing();

    let args = Args::parse();
    run_manager(args).await
}
