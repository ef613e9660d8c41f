use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = ficpack::cli::Cli::parse();
    ficpack::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        ficpack::cli::Command::Build(args) => {
            ficpack::build::run(args).await.context("build")?;
        }
        ficpack::cli::Command::Normalize(args) => {
            ficpack::normalize::run(args).context("normalize")?;
        }
    }

    Ok(())
}
