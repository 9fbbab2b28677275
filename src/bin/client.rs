//! `certdeploy-client` binary entry point.
use clap::Parser;
use certdeploy::cli::{self, ClientArgs};

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    if let Err(err) = cli::run_client(args).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
