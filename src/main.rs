use clap::Parser;
use travel_quality_eval::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let code = match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
