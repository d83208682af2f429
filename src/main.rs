use std::process::ExitCode;

use clap::Parser;
use log::error;

use finance_dashboard::app;
use finance_dashboard::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}
