//! `certdeploy-server` binary entry point.
use clap::Parser;
use certdeploy::cli::{self, ServerArgs};

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();
    if let Err(err) = cli::run_server(args).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
