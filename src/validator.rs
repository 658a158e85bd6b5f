use std::str::FromStr;
use std::time::Duration;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde_json::Value;
use thiserror::Error;

mod parser_assertion;

use crate::fixture::Fixture;
use crate::parser;
use crate::parser::AuthQuest;

// Error messages for parsing URLs
const BASE_URL_ENDS_WITH: &str =
    "The base URL from setup can't end with a /, and each URL in a step must start with one";
const PATH_URL_MISSING_SLASH: &str =
    "The URL field in a step is required to begin with a leading /.";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ROUTES: [&str; 3] = ["/register", "/login", "/me"];

pub struct Validator {
    auth_quest: AuthQuest,
    toml_src: String,
    file_name: String,
    fixture: Fixture,
    base_url_override: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Assertion {
    Status(StatusCode),
    Fields(Vec<String>),
    Values(Vec<(String, Value)>),
    Headers(HeaderMap),
    Json(Value),
    NoCredential,
}

pub struct IR {
    pub timeout: Duration,
    pub scenarios: Vec<ValidatedScenario>,
}

#[derive(Debug, Clone)]
pub struct ValidatedScenario {
    pub name: String,
    pub steps: Vec<ValidatedStep>,
}

#[derive(Debug, Clone)]
pub struct ValidatedStep {
    pub name: String,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub capture_credential: bool,
    pub use_credential: bool,
    pub requires_previous: bool,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

impl ValidationError {
    #[cfg(test)]
    pub fn field(&self) -> &str {
        &self.field
    }
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $snippet:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: find_span($snippet, &$self.toml_src),
        }
    };
}

impl Validator {
    pub fn new(auth_quest: &AuthQuest, toml_src: &str, file_name: &str, fixture: Fixture) -> Self {
        Self {
            auth_quest: auth_quest.clone(),
            toml_src: toml_src.into(),
            file_name: file_name.into(),
            fixture,
            base_url_override: None,
        }
    }

    /// Replaces `setup.base_url`, e.g. from the command line.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url_override = base_url;
        self
    }

    pub fn validate(&self) -> miette::Result<IR, ValidationError> {
        let base_url = self
            .base_url_override
            .as_deref()
            .unwrap_or(&self.auth_quest.setup.base_url);

        let routes: Vec<String> = self.auth_quest.setup.routes.clone().unwrap_or_else(|| {
            DEFAULT_ROUTES.iter().map(|r| r.to_string()).collect()
        });

        let global_headers = match self.auth_quest.global.as_ref().and_then(|g| g.headers.as_ref())
        {
            Some(value) => parser_assertion::parse_header_map(value, Some(&self.src()))?,
            None => HeaderMap::new(),
        };

        let scenarios = self
            .auth_quest
            .scenarios
            .iter()
            .map(|scenario| self.create_scenario(scenario, base_url, &routes, &global_headers))
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let timeout = Duration::from_secs(
            self.auth_quest
                .setup
                .timeout_secs
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        Ok(IR { timeout, scenarios })
    }

    fn src(&self) -> (String, String) {
        (self.file_name.clone(), self.toml_src.clone())
    }

    fn create_scenario(
        &self,
        scenario: &parser::Scenario,
        base_url: &str,
        routes: &[String],
        global_headers: &HeaderMap,
    ) -> Result<ValidatedScenario, ValidationError> {
        if scenario.steps.is_empty() {
            return Err(validation_err!(
                format!("{}/steps", scenario.name),
                "A scenario needs at least one step",
                self,
                &scenario.name
            ));
        }

        let mut captured = false;
        let mut steps = Vec::with_capacity(scenario.steps.len());

        for step in &scenario.steps {
            // A credential can only be replayed after a step that captures it.
            if step.use_credential && !captured {
                return Err(validation_err!(
                    format!("{}/use_credential", step.name),
                    "use_credential needs an earlier step with capture_credential = true",
                    self,
                    &step.name
                ));
            }
            captured |= step.capture_credential;

            steps.push(self.create_step(step, base_url, routes, global_headers)?);
        }

        Ok(ValidatedScenario {
            name: scenario.name.clone(),
            steps,
        })
    }

    fn create_step(
        &self,
        step: &parser::Step,
        base_url: &str,
        routes: &[String],
        global_headers: &HeaderMap,
    ) -> Result<ValidatedStep, ValidationError> {
        let method = parse_method(&step.method.to_uppercase()).map_err(|e| {
            validation_err!(format!("{} - method", step.name), e, self, &step.method)
        })?;

        let url = parse_url(base_url, &step.url).map_err(|e| match e {
            ParseUrlError::SetupUrlEndsWithSlash => {
                validation_err!("setup.base_url", BASE_URL_ENDS_WITH, self, base_url)
            }
            ParseUrlError::PathUrlMissingSlash => validation_err!(
                format!("{}/url", step.name),
                PATH_URL_MISSING_SLASH,
                self,
                &step.url
            ),
            ParseUrlError::ParseIntoUrlFailed(parse_error) => validation_err!(
                format!("{}/url", base_url),
                parse_error.to_string(),
                self,
                base_url
            ),
        })?;

        if !routes.iter().any(|route| route == &step.url) {
            return Err(validation_err!(
                format!("{}/url", step.name),
                format!("`{}` is not a known route ({})", step.url, routes.join(", ")),
                self,
                &step.url
            ));
        }

        // Step headers win over global ones with the same name.
        let mut headers = global_headers.clone();
        if let Some(value) = &step.headers {
            let step_headers = parser_assertion::parse_header_map(value, Some(&self.src()))?;
            for (key, value) in step_headers {
                if let Some(key) = key {
                    headers.insert(key, value);
                }
            }
        }

        let body = step
            .body
            .as_ref()
            .map(|body| self.fixture.render(body))
            .transpose()
            .map_err(|e| validation_err!(format!("{}/body", step.name), e, self, &step.name))?;

        let assertions =
            parser_assertion::parse_assertions(step, &self.fixture, Some(&self.src()))?;

        Ok(ValidatedStep {
            name: step.name.clone(),
            method,
            url,
            headers,
            body,
            capture_credential: step.capture_credential,
            use_credential: step.use_credential,
            requires_previous: step.requires_previous,
            assertions,
        })
    }
}

#[derive(Debug, Error)]
enum ParseUrlError {
    #[error("")]
    SetupUrlEndsWithSlash,
    #[error("")]
    PathUrlMissingSlash,
    #[error("Failed to parse URL: {0}")]
    ParseIntoUrlFailed(#[from] url::ParseError),
}

fn parse_url(base_url: &str, path_url: &str) -> Result<Url, ParseUrlError> {
    if base_url.ends_with('/') {
        return Err(ParseUrlError::SetupUrlEndsWithSlash);
    }

    if !path_url.starts_with('/') {
        return Err(ParseUrlError::PathUrlMissingSlash);
    }

    let url = Url::parse(&format!("{base_url}{path_url}"))?;

    Ok(url)
}

fn parse_method(method: &str) -> Result<Method, String> {
    let method = Method::from_str(method).map_err(|e| e.to_string())?;

    if !matches!(
        method,
        Method::GET | Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    ) {
        return Err(format!("Unsupported HTTP method: {method}"));
    }

    Ok(method)
}

fn find_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    let pattern = format!("\"{needle}\"");
    toml_src
        .find(&pattern)
        .map(|start| SourceSpan::new((start + 1).into(), needle.len()))
}
