use clap::Parser;
use cnclink::{init_logging, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;
    cnclink::cli::run(cli).await
}
