use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::parser::FixtureConfig;

const DEFAULT_EMAIL_PREFIX: &str = "test";
const DEFAULT_EMAIL_DOMAIN: &str = "domain.com";
const DEFAULT_GIVEN_NAME: &str = "TestName";
const DEFAULT_SURNAME: &str = "TestFamilyName";
const DEFAULT_LOGIN_EMAIL: &str = "test@domain.com";
const DEFAULT_PASSWORD: &str = "1234567";
const DEFAULT_WRONG_PASSWORD: &str = "wrongPassword";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FixtureError {
    #[error("unknown placeholder `{{{{{0}}}}}`")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder in `{0}`")]
    Unterminated(String),
}

/// User data generated once per run and shared, read-only, by every scenario.
///
/// The register emails embed the run id so repeated runs against a stateful
/// service never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub run_id: i64,
    pub register_email: String,
    pub duplicate_email: String,
    pub given_name: String,
    pub surname: String,
    pub login_email: String,
    pub password: String,
    pub wrong_password: String,
}

pub struct FixtureBuilder {
    config: FixtureConfig,
    run_id: Option<i64>,
}

impl FixtureBuilder {
    pub fn new(config: &FixtureConfig) -> Self {
        Self {
            config: config.clone(),
            run_id: None,
        }
    }

    /// Pins the run id instead of taking the current unix time in millis.
    pub fn run_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn build(self) -> Fixture {
        let FixtureConfig {
            email_prefix,
            email_domain,
            given_name,
            surname,
            login_email,
            password,
            wrong_password,
        } = self.config;

        let run_id = self
            .run_id
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let prefix = email_prefix.unwrap_or_else(|| DEFAULT_EMAIL_PREFIX.into());
        let domain = email_domain.unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.into());

        let uuid = Uuid::new_v4().simple().to_string();
        let suffix = &uuid[..8];

        Fixture {
            run_id,
            register_email: format!("{prefix}{run_id}@{domain}"),
            duplicate_email: format!("{prefix}{run_id}-{suffix}@{domain}"),
            given_name: given_name.unwrap_or_else(|| DEFAULT_GIVEN_NAME.into()),
            surname: surname.unwrap_or_else(|| DEFAULT_SURNAME.into()),
            login_email: login_email.unwrap_or_else(|| DEFAULT_LOGIN_EMAIL.into()),
            password: password.unwrap_or_else(|| DEFAULT_PASSWORD.into()),
            wrong_password: wrong_password.unwrap_or_else(|| DEFAULT_WRONG_PASSWORD.into()),
        }
    }
}

impl Fixture {
    fn lookup(&self, key: &str) -> Option<String> {
        let value = match key {
            "run_id" => return Some(self.run_id.to_string()),
            "register_email" => &self.register_email,
            "duplicate_email" => &self.duplicate_email,
            "given_name" => &self.given_name,
            "surname" => &self.surname,
            "login_email" => &self.login_email,
            "password" => &self.password,
            "wrong_password" => &self.wrong_password,
            _ => return None,
        };

        Some(value.clone())
    }

    /// Substitutes every `{{placeholder}}` in the string values of `value`.
    /// Object keys are left untouched.
    pub fn render(&self, value: &Value) -> Result<Value, FixtureError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render_str(s)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(item))
                .collect::<Result<Vec<_>, FixtureError>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
                .collect::<Result<serde_json::Map<_, _>, FixtureError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    pub fn render_str(&self, template: &str) -> Result<String, FixtureError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);

            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(FixtureError::Unterminated(template.to_string()));
            };

            let key = after[..end].trim();
            let value = self
                .lookup(key)
                .ok_or_else(|| FixtureError::UnknownPlaceholder(key.to_string()))?;
            out.push_str(&value);

            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}
