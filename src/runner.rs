use std::time::Duration;

use flume::SendError;
use flume::Sender;
use futures::future::join_all;
use reqwest::Client;
use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::COOKIE;
use reqwest::header::HeaderMap;
use reqwest::header::InvalidHeaderValue;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;
use url::Url;

use crate::asserter::Assert;
use crate::asserter::StepOutcome;
use crate::credential::Credential;
use crate::credential::extract_credential;
use crate::validator::Assertion;
use crate::validator::ValidatedScenario;
use crate::validator::ValidatedStep;

const SKIPPED_PREREQUISITE: &str = "skipped due to prerequisite failure";

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("channel error")]
    ChannelError(#[from] SendError<ScenarioReport>),

    #[error("scenario task failed: {0}")]
    Join(#[from] JoinError),
}

/// A call that never produced a response we could inspect.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("could not connect to {url}: {source}")]
    Connect { url: Url, source: reqwest::Error },

    #[error("request to {url} timed out")]
    Timeout { url: Url },

    #[error("request to {url} failed: {source}")]
    Transport { url: Url, source: reqwest::Error },

    #[error("failed to read response body from {url}: {source}")]
    Body { url: Url, source: reqwest::Error },

    #[error("credential is not a valid header value: {0}")]
    InvalidCredential(#[from] InvalidHeaderValue),
}

impl RequestError {
    fn from_reqwest(url: &Url, source: reqwest::Error) -> Self {
        let url = url.clone();
        if source.is_timeout() {
            RequestError::Timeout { url }
        } else if source.is_connect() {
            RequestError::Connect { url, source }
        } else {
            RequestError::Transport { url, source }
        }
    }
}

#[derive(Debug)]
pub struct RunnerResult {
    pub name: String,
    pub method: Method,
    pub url: Url,
    pub response: Result<CapturedResponse, RequestError>,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub method: Method,
    pub path: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|step| step.outcome.is_pass())
    }
}

pub struct Runner {
    client: Client,
    parallel: bool,
}

impl Runner {
    pub fn new(timeout: Duration, parallel: bool) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RunnerError::Client)?;

        Ok(Self { client, parallel })
    }

    /// Runs every scenario and sends each finished report to `tx`.
    ///
    /// Steps inside a scenario always run in order; with `parallel` set the
    /// scenarios themselves run as separate tasks.
    pub async fn run_all(
        &self,
        scenarios: Vec<ValidatedScenario>,
        tx: Sender<ScenarioReport>,
    ) -> Result<(), RunnerError> {
        if !self.parallel {
            for scenario in scenarios {
                let report = run(&self.client, scenario).await;
                tx.send_async(report).await?;
            }
            return Ok(());
        }

        let handles = scenarios.into_iter().map(|scenario| {
            let client = self.client.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let report = run(&client, scenario).await;
                tx.send_async(report).await
            })
        });

        for result in join_all(handles).await {
            result??;
        }

        Ok(())
    }
}

/// Executes the steps of one scenario in order.
///
/// The captured credential lives only for the duration of this call. Steps
/// that replay a credential whose capturing step failed, or that require every
/// previous step to pass, are skipped instead of executed.
pub async fn run(client: &Client, scenario: ValidatedScenario) -> ScenarioReport {
    tracing::info!(scenario = %scenario.name, "running scenario");

    let mut credential: Option<Credential> = None;
    let mut capture_passed = true;
    let mut previous_passed = true;
    let mut steps = Vec::with_capacity(scenario.steps.len());

    for step in scenario.steps {
        let path = step.url.path().to_string();

        let skip_reason = if step.requires_previous && !previous_passed {
            Some(format!("{SKIPPED_PREREQUISITE}: an earlier step did not pass"))
        } else if step.use_credential && !capture_passed {
            Some(format!("{SKIPPED_PREREQUISITE}: the credential step did not pass"))
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            tracing::debug!(step = %step.name, %reason, "skipping step");
            previous_passed = false;
            // A skipped capture step leaves no credential behind it.
            if step.capture_credential {
                capture_passed = false;
                credential = None;
            }
            steps.push(StepReport {
                name: step.name,
                method: step.method,
                path,
                outcome: StepOutcome::Skipped(reason),
            });
            continue;
        }

        let ValidatedStep {
            name,
            method,
            url,
            headers,
            body,
            capture_credential,
            use_credential,
            assertions,
            ..
        } = step;

        let attached = if use_credential {
            credential.as_ref()
        } else {
            None
        };

        let response = request(
            client,
            method.clone(),
            &url,
            headers,
            body.as_ref(),
            attached,
        )
        .await;

        let runner_result = RunnerResult {
            name,
            method,
            url,
            response,
            assertions,
        };
        let outcome = runner_result.assert();
        let passed = outcome.is_pass();

        if capture_credential {
            capture_passed = passed;
            credential = runner_result
                .response
                .as_ref()
                .ok()
                .filter(|_| passed)
                .and_then(|response| extract_credential(&response.headers));

            if passed && credential.is_none() {
                tracing::warn!(
                    step = %runner_result.name,
                    "no set-cookie header, continuing without a credential"
                );
            }
        }

        previous_passed &= passed;
        steps.push(StepReport {
            name: runner_result.name,
            method: runner_result.method,
            path,
            outcome,
        });
    }

    ScenarioReport {
        name: scenario.name,
        steps,
    }
}

/// Performs one HTTP call.
///
/// `payload` is sent as a JSON body and `credential`, when given, as the
/// `Cookie` header. No retries.
pub async fn request(
    client: &Client,
    method: Method,
    url: &Url,
    headers: HeaderMap,
    payload: Option<&Value>,
    credential: Option<&Credential>,
) -> Result<CapturedResponse, RequestError> {
    let mut headers = headers;
    if let Some(credential) = credential {
        headers.insert(COOKIE, credential.header_value()?);
    }

    tracing::debug!(%method, %url, with_credential = credential.is_some(), "sending request");

    let builder = client.request(method, url.clone()).headers(headers);
    let builder = match payload {
        Some(payload) => builder.json(payload),
        None => builder,
    };

    let response = builder
        .send()
        .await
        .map_err(|e| RequestError::from_reqwest(url, e))?;

    let captured = CapturedResponse::from_response(response)
        .await
        .map_err(|source| {
            if source.is_timeout() {
                RequestError::Timeout { url: url.clone() }
            } else {
                RequestError::Body {
                    url: url.clone(),
                    source,
                }
            }
        })?;

    tracing::debug!(%url, status = %captured.status, "received response");

    Ok(captured)
}

#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_text: String,
    pub body_json: Option<serde_json::Value>,
}

impl CapturedResponse {
    pub async fn from_response(resp: Response) -> Result<Self, reqwest::Error> {
        let status = resp.status();
        let headers = resp.headers().clone();

        // Consume the body exactly once
        let body_text = resp.text().await?;

        // Not every response is JSON; the asserter decides whether that matters.
        let body_json = serde_json::from_str::<serde_json::Value>(&body_text).ok();

        Ok(Self {
            status,
            headers,
            body_text,
            body_json,
        })
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::time::Duration;

    use auth_app::AppState;
    use reqwest::Client;

    use super::Runner;
    use super::ScenarioReport;
    use super::run;
    use crate::asserter::StepOutcome;
    use crate::fixture::FixtureBuilder;
    use crate::parser::AuthQuest;
    use crate::validator::IR;
    use crate::validator::Validator;

    const BUNDLED_SUITE: &str = include_str!("../suites/auth.toml");

    async fn start_app() -> String {
        let state = AppState::new();
        state
            .seed_account("test@domain.com", "TestName", "TestFamilyName", "1234567")
            .await;
        let addr = auth_app::serve_ephemeral(state).await.unwrap();
        format!("http://{addr}")
    }

    fn load(src: &str, base_url: &str) -> IR {
        let suite: AuthQuest = toml::from_str(src).unwrap();
        let fixture = FixtureBuilder::new(&suite.fixture).build();
        let Ok(ir) = Validator::new(&suite, src, "suite.toml", fixture)
            .with_base_url(Some(base_url.to_string()))
            .validate()
        else {
            panic!("suite failed to validate");
        };
        ir
    }

    fn client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    async fn run_suite(src: &str, base_url: &str) -> Vec<ScenarioReport> {
        let ir = load(src, base_url);
        let client = client();
        let mut reports = vec![];
        for scenario in ir.scenarios {
            reports.push(run(&client, scenario).await);
        }
        reports
    }

    fn outcomes(report: &ScenarioReport) -> Vec<&StepOutcome> {
        report.steps.iter().map(|s| &s.outcome).collect()
    }

    #[tokio::test]
    async fn bundled_suite_passes_against_auth_app() {
        let base = start_app().await;
        let reports = run_suite(BUNDLED_SUITE, &base).await;

        assert_eq!(reports.len(), 7);
        for report in &reports {
            assert!(report.passed(), "scenario failed: {report:#?}");
        }
    }

    #[tokio::test]
    async fn bundled_suite_passes_when_run_in_parallel() {
        let base = start_app().await;
        let ir = load(BUNDLED_SUITE, &base);
        let runner = Runner::new(ir.timeout, true).unwrap();
        let (tx, rx) = flume::unbounded();

        runner.run_all(ir.scenarios, tx).await.unwrap();

        let reports: Vec<ScenarioReport> = rx.drain().collect();
        assert_eq!(reports.len(), 7);
        assert!(reports.iter().all(ScenarioReport::passed));
    }

    #[tokio::test]
    async fn failed_login_skips_the_profile_step() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "profile after bad login"

              [[scenarios.steps]]
              name = "login"
              method = "POST"
              url = "/login"
              body = { login = "{{login_email}}", password = "{{wrong_password}}" }
              capture_credential = true
              assert_status = 200

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              use_credential = true
              assert_status = 200
        "#;

        let reports = run_suite(src, &base).await;
        let outcomes = outcomes(&reports[0]);

        assert!(matches!(outcomes[0], StepOutcome::Failed(_)));
        assert!(
            matches!(outcomes[1], StepOutcome::Skipped(reason) if reason.starts_with("skipped due to prerequisite failure"))
        );
        assert!(!reports[0].passed());
    }

    #[tokio::test]
    async fn skipped_login_also_skips_the_profile_step() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "profile after a skipped login"

              [[scenarios.steps]]
              name = "gate"
              method = "GET"
              url = "/me"
              assert_status = 200

              [[scenarios.steps]]
              name = "login"
              method = "POST"
              url = "/login"
              body = { login = "{{login_email}}", password = "{{password}}" }
              requires_previous = true
              capture_credential = true
              assert_status = 200

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              use_credential = true
              assert_status = 200
        "#;

        let reports = run_suite(src, &base).await;
        let outcomes = outcomes(&reports[0]);

        assert!(matches!(outcomes[0], StepOutcome::Failed(_)));
        assert!(matches!(outcomes[1], StepOutcome::Skipped(_)));
        assert!(
            matches!(outcomes[2], StepOutcome::Skipped(reason) if reason.starts_with("skipped due to prerequisite failure"))
        );
        assert!(!reports[0].passed());
    }

    #[tokio::test]
    async fn missing_set_cookie_behaves_like_no_credential() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "capture from a response without cookie"

              [[scenarios.steps]]
              name = "register"
              method = "POST"
              url = "/register"
              body = { email = "{{register_email}}", givenName = "{{given_name}}", surname = "{{surname}}", password = "{{password}}" }
              capture_credential = true
              assert_status = 201

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              use_credential = true
              assert_status = 401
              assert_fields = ["message"]
        "#;

        let reports = run_suite(src, &base).await;
        assert!(reports[0].passed(), "{:#?}", reports[0]);
    }

    #[tokio::test]
    async fn requires_previous_skips_after_failure() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "chain"

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              assert_status = 200

              [[scenarios.steps]]
              name = "independent"
              method = "GET"
              url = "/me"
              assert_status = 401

              [[scenarios.steps]]
              name = "dependent"
              method = "GET"
              url = "/me"
              requires_previous = true
              assert_status = 401
        "#;

        let reports = run_suite(src, &base).await;
        let outcomes = outcomes(&reports[0]);

        assert!(matches!(outcomes[0], StepOutcome::Failed(_)));
        assert!(outcomes[1].is_pass());
        assert!(matches!(outcomes[2], StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_infrastructure_error() {
        // Grab a free port and release it so nothing is listening there.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "unreachable"

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              assert_status = 401
        "#;

        let reports = run_suite(src, &format!("http://127.0.0.1:{port}")).await;
        assert!(matches!(
            outcomes(&reports[0])[0],
            StepOutcome::InfraError(_)
        ));
    }

    #[tokio::test]
    async fn plain_text_body_is_an_infrastructure_error() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"
            routes = ["/health"]

            [[scenarios]]
            name = "health is not json"

              [[scenarios.steps]]
              name = "health"
              method = "GET"
              url = "/health"
              assert_status = 200
              assert_fields = ["status"]
        "#;

        let reports = run_suite(src, &base).await;
        assert!(matches!(
            outcomes(&reports[0])[0],
            StepOutcome::InfraError(message) if message.contains("malformed JSON body")
        ));
    }

    #[tokio::test]
    async fn failed_attempts_are_repeatable() {
        let base = start_app().await;
        let src = r#"
            [setup]
            base_url = "http://placeholder"

            [[scenarios]]
            name = "wrong password"

              [[scenarios.steps]]
              name = "login"
              method = "POST"
              url = "/login"
              body = { login = "{{login_email}}", password = "{{wrong_password}}" }
              assert_status = 401
              assert_fields = ["message"]
              assert_no_credential = true

            [[scenarios]]
            name = "missing password"

              [[scenarios.steps]]
              name = "register"
              method = "POST"
              url = "/register"
              body = { email = "{{register_email}}", givenName = "{{given_name}}", surname = "{{surname}}" }
              assert_status = 400
              assert_fields = ["message"]

            [[scenarios]]
            name = "profile without cookie"

              [[scenarios.steps]]
              name = "profile"
              method = "GET"
              url = "/me"
              assert_status = 401
              assert_fields = ["message"]
        "#;

        for _ in 0..3 {
            let reports = run_suite(src, &base).await;
            assert!(reports.iter().all(ScenarioReport::passed), "{reports:#?}");
        }
    }
}
