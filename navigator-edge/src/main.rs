use anyhow::Result;
use clap::Parser;

use navigator_edge::args::Args;
use navigator_edge::server::run_edge;

#[tokio::main]
async fn main() -> Result<()> {
    navigator_common::init_tracing();

    let args = Args::parse();
    run_edge(args).await
}
