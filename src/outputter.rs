use console::Style;
use flume::Receiver;

use crate::asserter::StepOutcome;
use crate::asserter::TestResult;
use crate::runner::ScenarioReport;
use crate::runner::StepReport;

pub struct OutPutter;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub scenarios_passed: usize,
    pub scenarios_failed: usize,
    pub steps_passed: usize,
    pub steps_failed: usize,
    pub infra_errors: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.scenarios_failed == 0
    }

    fn record(&mut self, report: &ScenarioReport) {
        if report.passed() {
            self.scenarios_passed += 1;
        } else {
            self.scenarios_failed += 1;
        }

        for step in &report.steps {
            match step.outcome {
                StepOutcome::Passed(_) => self.steps_passed += 1,
                StepOutcome::Failed(_) => self.steps_failed += 1,
                StepOutcome::InfraError(_) => self.infra_errors += 1,
                StepOutcome::Skipped(_) => self.skipped += 1,
            }
        }
    }
}

impl OutPutter {
    /// Prints scenario reports as they arrive and returns the totals once the
    /// channel closes.
    pub async fn start(
        rx: Receiver<ScenarioReport>,
        suite_path: &str,
        n_scenarios: usize,
    ) -> RunSummary {
        let style = Style::new().bold().cyan();
        let open_text = format!(
            "Running suite: {suite_path} Found {n_scenarios} scenarios: Running..."
        );

        println!("{}", style.apply_to(open_text));

        let mut i = 1;
        let mut summary = RunSummary::default();
        let mut failed: Vec<(String, StepReport)> = vec![];

        while let Ok(report) = rx.recv_async().await {
            summary.record(&report);

            let marker = if report.passed() {
                console::style("✔").green().bold()
            } else {
                console::style("╳").red().bold()
            };
            println!("[{i}/{n_scenarios}] {marker}  {}", report.name);

            for step in &report.steps {
                println!("    {}", step_line(step));
                if !step.outcome.is_pass() {
                    failed.push((report.name.clone(), step.clone()));
                }
            }

            i += 1;
        }

        print_failures(&failed);
        print_totals(&summary);

        summary
    }
}

fn step_line(step: &StepReport) -> String {
    let target = format!("{} {}", step.method, step.path);
    let label = format!("{} ({})", step.name, console::style(target).dim());

    match &step.outcome {
        StepOutcome::Passed(_) => format!(
            "{} {label} {}",
            console::style("✔").green().bold(),
            console::style("PASS!").green().bold()
        ),
        StepOutcome::Failed(results) => {
            let failed: Vec<String> = results
                .iter()
                .filter(|r| r.status == TestResult::Fail)
                .map(|r| r.expected.to_string())
                .collect();
            format!(
                "{} {label}: {} {}",
                console::style("╳").red().bold(),
                failed.join(", "),
                console::style("FAILED!").red().bold()
            )
        }
        StepOutcome::InfraError(_) => format!(
            "{} {label} {}",
            console::style("⚡").magenta().bold(),
            console::style("ERROR!").magenta().bold()
        ),
        StepOutcome::Skipped(_) => format!(
            "{} {label} {}",
            console::style("↷").yellow(),
            console::style("SKIPPED").yellow().bold()
        ),
    }
}

fn print_failures(failed: &[(String, StepReport)]) {
    if failed.is_empty() {
        return;
    }

    println!();
    println!(
        "{}",
        console::style("Summary of Failed Steps:").bold().red()
    );

    for (idx, (scenario, step)) in failed.iter().enumerate() {
        println!("\n{}. {scenario} / {}", idx + 1, step.name);

        match &step.outcome {
            StepOutcome::Failed(results) => {
                for result in results.iter().filter(|r| r.status == TestResult::Fail) {
                    println!("{result}");
                }
            }
            StepOutcome::InfraError(error) => println!(
                "  {} {}",
                console::style("Could not reach the API:").magenta(),
                console::style(error).magenta().bold()
            ),
            StepOutcome::Skipped(reason) => {
                println!("  {}", console::style(reason).yellow())
            }
            StepOutcome::Passed(_) => {}
        }
    }
}

fn print_totals(summary: &RunSummary) {
    println!();

    let totals = format!(
        "scenarios: {} passed, {} failed | steps: {} passed, {} failed, {} errors, {} skipped",
        summary.scenarios_passed,
        summary.scenarios_failed,
        summary.steps_passed,
        summary.steps_failed,
        summary.infra_errors,
        summary.skipped,
    );

    if summary.success() {
        println!("{}", console::style("All scenarios passed! 🎉").bold().green());
        println!("{}", console::style(totals).green());
    } else {
        println!("{}", console::style(totals).bold().red());
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use reqwest::Method;
    use reqwest::StatusCode;

    use super::OutPutter;
    use super::RunSummary;
    use crate::asserter::Actual;
    use crate::asserter::AssertResult;
    use crate::asserter::StepOutcome;
    use crate::asserter::TestResult;
    use crate::runner::ScenarioReport;
    use crate::runner::StepReport;
    use crate::validator::Assertion;

    fn step(name: &str, outcome: StepOutcome) -> StepReport {
        StepReport {
            name: name.into(),
            method: Method::GET,
            path: "/me".into(),
            outcome,
        }
    }

    fn status_result(status: TestResult) -> Arc<[AssertResult]> {
        Arc::from([AssertResult {
            status,
            expected: Assertion::Status(StatusCode::OK),
            actual: Actual::Status(StatusCode::UNAUTHORIZED),
        }])
    }

    #[tokio::test]
    async fn summarises_every_kind_of_outcome() {
        let (tx, rx) = flume::unbounded::<ScenarioReport>();

        tx.send_async(ScenarioReport {
            name: "passing".into(),
            steps: vec![step("ok", StepOutcome::Passed(status_result(TestResult::Pass)))],
        })
        .await
        .unwrap();

        tx.send_async(ScenarioReport {
            name: "failing".into(),
            steps: vec![
                step("login", StepOutcome::Failed(status_result(TestResult::Fail))),
                step("profile", StepOutcome::Skipped("skipped".into())),
                step("other", StepOutcome::InfraError("connection refused".into())),
            ],
        })
        .await
        .unwrap();
        drop(tx);

        let summary = OutPutter::start(rx, "suite.toml", 2).await;

        assert_eq!(
            summary,
            RunSummary {
                scenarios_passed: 1,
                scenarios_failed: 1,
                steps_passed: 1,
                steps_failed: 1,
                infra_errors: 1,
                skipped: 1,
            }
        );
        assert!(!summary.success());
    }

    #[tokio::test]
    async fn empty_run_is_a_success() {
        let (tx, rx) = flume::unbounded::<ScenarioReport>();
        drop(tx);

        assert!(OutPutter::start(rx, "suite.toml", 0).await.success());
    }
}
