type Result<T> = color_eyre::eyre::Result<T>;

mod cli;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Config};
use testbed::environment::Environment;
use testbed::{suite, Runner, TestStatus};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli, &Environment::from_process())?;

    let cases: Vec<_> = suite::self_check_cases()
        .into_iter()
        .filter(|case| config.selects(case.name()))
        .collect();

    if config.list {
        for case in &cases {
            println!("{}", case.name());
        }
        return Ok(());
    }

    info!("testbed running {} checks", cases.len());
    let runner = Runner::new(config.harness);
    let summary = runner.run_all(cases).await;

    for result in &summary.results {
        println!("{result}");
        if !matches!(result.status, TestStatus::Passed) {
            for detail in &result.details {
                println!("    {}: {}", detail.name, detail.content);
            }
        }
    }
    println!("{} passed, {} failed", summary.passed(), summary.failed());

    if let Some(code) = summary.exit {
        info!("leaving with propagated exit code {}", code);
        std::process::exit(code);
    }
    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
