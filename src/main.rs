use clap::Parser;
use hydromet_pipeline::cli::{run, Cli};
use hydromet_pipeline::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
