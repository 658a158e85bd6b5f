#![allow(clippy::result_large_err)]

use clap::Parser;
use miette::Diagnostic;
use miette::Result;
use thiserror::Error;
use tokio::task::JoinError;

use crate::cli::Cli;
use crate::fixture::FixtureBuilder;
use crate::outputter::OutPutter;
use crate::outputter::RunSummary;
use crate::parser::AuthQuest;
use crate::runner::Runner;
use crate::runner::RunnerError;
use crate::runner::ScenarioReport;
use crate::validator::IR;
use crate::validator::ValidationError;
use crate::validator::Validator;

mod asserter;
mod cli;
mod credential;
mod fixture;
mod logging;
mod outputter;
mod parser;
mod runner;
mod validator;

#[derive(Error, Debug, Diagnostic)]
pub enum AuthQuestError {
    #[error("Failed to read suite file `{path}`")]
    FileError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse toml file")]
    TomlParsing(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("No scenario name contains `{0}`")]
    #[diagnostic(help("check the `name` of the scenarios in the suite file"))]
    NoMatchingScenario(String),

    #[error(transparent)]
    RunnerError(#[from] RunnerError),

    #[error("Outputter task failed: {0}")]
    OutputterError(#[from] JoinError),
}

/// Loads the suite file and turns it into validated scenarios.
///
/// Fixture data is generated here, once per run, and rendered into every
/// scenario before anything is sent.
fn load_and_validate_config(cli: &Cli) -> Result<IR, AuthQuestError> {
    let contents = std::fs::read_to_string(&cli.path).map_err(|source| {
        AuthQuestError::FileError {
            path: cli.path.clone(),
            source,
        }
    })?;
    let auth_quest: AuthQuest = toml::from_str(&contents)?;

    let fixture = FixtureBuilder::new(&auth_quest.fixture).build();
    tracing::info!(
        run_id = fixture.run_id,
        register_email = %fixture.register_email,
        "generated fixture data"
    );

    let mut ir = Validator::new(&auth_quest, &contents, &cli.path, fixture)
        .with_base_url(cli.base_url.clone())
        .validate()?;

    if let Some(filter) = &cli.scenario {
        ir.scenarios.retain(|scenario| scenario.name.contains(filter.as_str()));
        if ir.scenarios.is_empty() {
            return Err(AuthQuestError::NoMatchingScenario(filter.clone()));
        }
    }

    Ok(ir)
}

/// Runs the scenarios and streams their reports to the outputter task.
async fn run_pipeline(ir: IR, cli: &Cli) -> Result<RunSummary, AuthQuestError> {
    let (runner_tx, outputter_rx) = flume::unbounded::<ScenarioReport>();
    let n_scenarios = ir.scenarios.len();

    let outputter_path = cli.path.clone();
    let outputter_handle = tokio::spawn(async move {
        OutPutter::start(outputter_rx, &outputter_path, n_scenarios).await
    });

    let runner = Runner::new(ir.timeout, cli.parallel)?;
    // `runner_tx` is dropped when this returns, which ends the outputter loop.
    let run_result = runner.run_all(ir.scenarios, runner_tx).await;

    let summary = outputter_handle.await?;
    run_result?;

    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let ir = load_and_validate_config(&cli)?;
    let summary = run_pipeline(ir, &cli).await?;

    if !summary.success() {
        std::process::exit(1);
    }

    Ok(())
}
