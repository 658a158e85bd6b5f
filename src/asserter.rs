use core::fmt;
use std::fmt::Display;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::credential::extract_credential;
use crate::runner::CapturedResponse;
use crate::runner::RunnerResult;
use crate::validator::Assertion;

const BODY_PREVIEW_LEN: usize = 120;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TestResult {
    Pass,
    Fail,
}

#[derive(Debug, Clone)]
pub struct AssertResult {
    pub status: TestResult,
    pub expected: Assertion,
    pub actual: Actual,
}

#[derive(Debug, Clone)]
pub enum Actual {
    Status(StatusCode),
    Fields { missing: Vec<String> },
    Values(Vec<(String, Option<Value>)>),
    Header(HeaderMap),
    Json(Value),
    Credential(Option<String>),
}

/// What happened to one step of a scenario.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Passed(Arc<[AssertResult]>),
    Failed(Arc<[AssertResult]>),
    /// The call could not complete, or its body could not be read as JSON.
    InfraError(String),
    /// Not executed because a step it depends on did not pass.
    Skipped(String),
}

impl StepOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, StepOutcome::Passed(_))
    }
}

impl Display for AssertResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.expected, &self.actual) {
            (TestResult::Pass, _, actual) => {
                write!(
                    f,
                    "{} {} {}",
                    console::style("✔").green().bold(),
                    console::style("PASS!").green().bold(),
                    actual
                )
            }

            (TestResult::Fail, Assertion::Status(exp), Actual::Status(act)) => {
                write!(
                    f,
                    "{} {}\n  Expected: {}\n  Actual:   {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                    console::style(format!("Expected status {exp}")).green(),
                    console::style(format!("Got status {act}")).red(),
                )
            }

            (TestResult::Fail, Assertion::Fields(_), Actual::Fields { missing }) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                writeln!(f, "  {}", console::style("Missing fields:").red())?;
                for path in missing {
                    writeln!(f, "    {}", console::style(path).yellow().bold())?;
                }
                Ok(())
            }

            (TestResult::Fail, Assertion::Values(expected), Actual::Values(actual)) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                for ((path, want), (_, got)) in expected.iter().zip(actual.iter()) {
                    if got.as_ref() == Some(want) {
                        continue;
                    }
                    let got = got
                        .as_ref()
                        .map_or_else(|| "<missing>".to_string(), Value::to_string);
                    writeln!(f, "  {}", console::style(path).yellow().bold())?;
                    writeln!(
                        f,
                        "    {} {}",
                        console::style("Expected:").green(),
                        console::style(want).green().bold()
                    )?;
                    writeln!(
                        f,
                        "    {} {}",
                        console::style("Got:").red(),
                        console::style(got).red().bold()
                    )?;
                }
                Ok(())
            }

            (
                TestResult::Fail,
                Assertion::Headers(expected_headers),
                Actual::Header(actual_headers),
            ) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                writeln!(f, "  {}", console::style("Expected headers:").green())?;
                print_headers(f, expected_headers)?;
                writeln!(f, "  {}", console::style("Actual headers:").red())?;
                print_headers(f, actual_headers)
            }

            (TestResult::Fail, Assertion::Json(expected_json), Actual::Json(actual_json)) => {
                writeln!(
                    f,
                    "{} {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                )?;
                writeln!(f, "  {}", console::style("Expected JSON:").green())?;
                writeln!(
                    f,
                    "{}",
                    console::style(serde_json::to_string_pretty(expected_json).unwrap_or_default())
                        .green()
                )?;
                writeln!(f, "  {}", console::style("Actual JSON:").red())?;
                writeln!(
                    f,
                    "{}",
                    console::style(serde_json::to_string_pretty(actual_json).unwrap_or_default())
                        .red()
                )
            }

            (TestResult::Fail, Assertion::NoCredential, Actual::Credential(got)) => {
                write!(
                    f,
                    "{} {}\n  Expected: {}\n  Actual:   {}",
                    console::style("✘").red().bold(),
                    console::style("FAIL!").red().bold(),
                    console::style("no session cookie").green(),
                    console::style(format!(
                        "session cookie {}",
                        got.as_deref().unwrap_or_default()
                    ))
                    .red(),
                )
            }

            _ => {
                writeln!(
                    f,
                    "{} {} (unhandled combination)",
                    console::style("⚠").yellow(),
                    console::style("UNKNOWN RESULT").yellow().bold()
                )
            }
        }
    }
}

fn print_headers(f: &mut fmt::Formatter<'_>, headers: &HeaderMap) -> fmt::Result {
    for (k, v) in headers.iter() {
        let value = v.to_str().unwrap_or("<invalid utf8>");
        writeln!(
            f,
            "    {}: {}",
            console::style(k.as_str()).yellow().bold(),
            console::style(value)
        )?;
    }
    Ok(())
}

impl Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::Status(_) => write!(f, "Status test"),
            Assertion::Fields(_) => write!(f, "Fields test"),
            Assertion::Values(_) => write!(f, "Values test"),
            Assertion::Headers(_) => write!(f, "Header test"),
            Assertion::Json(_) => write!(f, "JSON test"),
            Assertion::NoCredential => write!(f, "No credential test"),
        }
    }
}

impl Display for Actual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actual::Status(status_code) => write!(f, "Got status {status_code}"),
            Actual::Fields { missing } if missing.is_empty() => write!(f, "Got all fields"),
            Actual::Fields { missing } => write!(f, "Missing fields [{}]", missing.join(", ")),
            Actual::Values(values) => {
                let values: Vec<String> = values
                    .iter()
                    .map(|(path, value)| match value {
                        Some(value) => format!("{path} = {value}"),
                        None => format!("{path} = <missing>"),
                    })
                    .collect();
                write!(f, "Got values {{{}}}", values.join(", "))
            }
            Actual::Header(header_map) => {
                let headers: Vec<String> = header_map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_str().unwrap_or("<invalid utf8>")))
                    .collect();
                write!(f, "Got headers {{{}}}", headers.join(", "))
            }
            Actual::Json(value) => write!(f, "Got json: {value}"),
            Actual::Credential(None) => write!(f, "Got no session cookie"),
            Actual::Credential(Some(cookie)) => write!(f, "Got session cookie {cookie}"),
        }
    }
}

pub trait Assert {
    fn assert(&self) -> StepOutcome;
}

impl Assert for RunnerResult {
    fn assert(&self) -> StepOutcome {
        let response = match &self.response {
            Ok(response) => response,
            Err(error) => return StepOutcome::InfraError(error.to_string()),
        };

        let needs_body = self.assertions.iter().any(|a| {
            matches!(
                a,
                Assertion::Fields(_) | Assertion::Values(_) | Assertion::Json(_)
            )
        });

        let body = match (&response.body_json, needs_body) {
            (Some(json), _) => Some(json),
            (None, false) => None,
            (None, true) => {
                return StepOutcome::InfraError(format!(
                    "malformed JSON body ({}): {}",
                    response.status,
                    preview(&response.body_text)
                ));
            }
        };

        let results: Arc<[AssertResult]> = self
            .assertions
            .iter()
            .map(|a| assert_one(a, response, body))
            .collect();

        if results.iter().all(|r| r.status == TestResult::Pass) {
            StepOutcome::Passed(results)
        } else {
            StepOutcome::Failed(results)
        }
    }
}

fn assert_one(
    assertion: &Assertion,
    response: &CapturedResponse,
    body: Option<&Value>,
) -> AssertResult {
    let null = Value::Null;
    let body = body.unwrap_or(&null);

    let (status, actual) = match assertion {
        Assertion::Status(expected) => (
            assert_status(*expected, response.status),
            Actual::Status(response.status),
        ),
        Assertion::Fields(paths) => {
            let missing: Vec<String> = paths
                .iter()
                .filter(|path| lookup(body, path).is_none())
                .cloned()
                .collect();
            (pass_if(missing.is_empty()), Actual::Fields { missing })
        }
        Assertion::Values(expected) => assert_values(expected, body),
        Assertion::Headers(expected) => (
            assert_header(expected, &response.headers),
            Actual::Header(response.headers.clone()),
        ),
        Assertion::Json(expected) => (pass_if(body == expected), Actual::Json(body.clone())),
        Assertion::NoCredential => {
            let credential = extract_credential(&response.headers);
            (
                pass_if(credential.is_none()),
                Actual::Credential(credential.map(|c| c.as_str().to_string())),
            )
        }
    };

    AssertResult {
        status,
        expected: assertion.clone(),
        actual,
    }
}

/// Walks a dot-separated path into a JSON document. Numeric segments index
/// into arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn assert_values(expected: &[(String, Value)], body: &Value) -> (TestResult, Actual) {
    let actual: Vec<(String, Option<Value>)> = expected
        .iter()
        .map(|(path, _)| (path.clone(), lookup(body, path).cloned()))
        .collect();

    // Exact comparison: no case folding or trimming.
    let all_equal = expected
        .iter()
        .zip(actual.iter())
        .all(|((_, want), (_, got))| got.as_ref() == Some(want));

    (pass_if(all_equal), Actual::Values(actual))
}

fn assert_header(expected: &HeaderMap, actual: &HeaderMap) -> TestResult {
    for (key, value_a) in expected {
        let Some(value_b) = actual.get(key) else {
            return TestResult::Fail;
        };
        if value_a.as_bytes() != value_b.as_bytes() {
            return TestResult::Fail;
        }
    }

    TestResult::Pass
}

fn assert_status(expected: StatusCode, status: StatusCode) -> TestResult {
    pass_if(expected == status)
}

fn pass_if(condition: bool) -> TestResult {
    if condition {
        TestResult::Pass
    } else {
        TestResult::Fail
    }
}

fn preview(text: &str) -> String {
    if text.is_empty() {
        return "<empty>".into();
    }

    match text.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod test {
    use reqwest::Method;
    use reqwest::StatusCode;
    use reqwest::header::CONTENT_TYPE;
    use reqwest::header::HeaderMap;
    use reqwest::header::HeaderValue;
    use reqwest::header::SET_COOKIE;
    use serde_json::Value;
    use serde_json::json;
    use url::Url;

    use super::Actual;
    use super::Assert;
    use super::StepOutcome;
    use super::TestResult;
    use super::lookup;
    use crate::runner::CapturedResponse;
    use crate::runner::RequestError;
    use crate::runner::RunnerResult;
    use crate::validator::Assertion;

    fn url() -> Url {
        Url::parse("http://test.com/login").unwrap()
    }

    fn result(
        status: StatusCode,
        headers: HeaderMap,
        body: &str,
        assertions: Vec<Assertion>,
    ) -> RunnerResult {
        RunnerResult {
            name: "login".into(),
            method: Method::POST,
            url: url(),
            response: Ok(CapturedResponse {
                status,
                headers,
                body_text: body.into(),
                body_json: serde_json::from_str(body).ok(),
            }),
            assertions,
        }
    }

    const LOGIN_BODY: &str = r#"{
        "account": {
            "email": "test@domain.com",
            "username": "test@domain.com",
            "memberId": "42"
        }
    }"#;

    #[test]
    fn passing_login_response() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let outcome = result(
            StatusCode::OK,
            headers.clone(),
            LOGIN_BODY,
            vec![
                Assertion::Status(StatusCode::OK),
                Assertion::Fields(vec!["account.email".into(), "account.memberId".into()]),
                Assertion::Values(vec![(
                    "account.username".into(),
                    json!("test@domain.com"),
                )]),
                Assertion::Headers(headers),
            ],
        )
        .assert();

        let StepOutcome::Passed(results) = outcome else {
            panic!("expected pass, got {outcome:?}");
        };
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == TestResult::Pass));
    }

    #[test]
    fn wrong_status_and_missing_field_fail() {
        let outcome = result(
            StatusCode::UNAUTHORIZED,
            HeaderMap::new(),
            r#"{"error": "nope"}"#,
            vec![
                Assertion::Status(StatusCode::OK),
                Assertion::Fields(vec!["message".into()]),
            ],
        )
        .assert();

        let StepOutcome::Failed(results) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(results[0].status, TestResult::Fail);
        assert!(
            matches!(&results[1].actual, Actual::Fields { missing } if missing == &["message"])
        );
    }

    #[test]
    fn value_comparison_is_case_sensitive() {
        let outcome = result(
            StatusCode::OK,
            HeaderMap::new(),
            LOGIN_BODY,
            vec![Assertion::Values(vec![(
                "account.username".into(),
                json!("TEST@domain.com"),
            )])],
        )
        .assert();

        assert!(matches!(outcome, StepOutcome::Failed(_)));
    }

    #[test]
    fn malformed_body_is_an_infrastructure_error() {
        let outcome = result(
            StatusCode::BAD_GATEWAY,
            HeaderMap::new(),
            "<html>bad gateway</html>",
            vec![
                Assertion::Status(StatusCode::BAD_REQUEST),
                Assertion::Fields(vec!["message".into()]),
            ],
        )
        .assert();

        let StepOutcome::InfraError(message) = outcome else {
            panic!("expected infra error, got {outcome:?}");
        };
        assert!(message.contains("malformed JSON body"));
    }

    #[test]
    fn non_json_body_is_fine_without_body_assertions() {
        let outcome = result(
            StatusCode::OK,
            HeaderMap::new(),
            "ok",
            vec![Assertion::Status(StatusCode::OK)],
        )
        .assert();

        assert!(outcome.is_pass());
    }

    #[test]
    fn request_error_is_an_infrastructure_error() {
        let runner_result = RunnerResult {
            name: "me".into(),
            method: Method::GET,
            url: url(),
            response: Err(RequestError::Timeout { url: url() }),
            assertions: vec![Assertion::Status(StatusCode::OK)],
        };

        assert!(matches!(
            runner_result.assert(),
            StepOutcome::InfraError(message) if message.contains("timed out")
        ));
    }

    #[test]
    fn session_cookie_fails_no_credential_check() {
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_static("session=abc; Path=/"));

        let outcome = result(
            StatusCode::UNAUTHORIZED,
            headers,
            r#"{"message": "invalid"}"#,
            vec![Assertion::NoCredential],
        )
        .assert();

        let StepOutcome::Failed(results) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(
            matches!(&results[0].actual, Actual::Credential(Some(cookie)) if cookie == "session=abc")
        );
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let value: Value = json!({ "account": { "roles": ["admin", "user"] } });

        assert_eq!(lookup(&value, "account.roles.1"), Some(&json!("user")));
        assert_eq!(lookup(&value, "account.missing"), None);
        assert_eq!(lookup(&value, "account.roles.x"), None);
    }
}
