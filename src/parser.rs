use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AuthQuest {
    pub setup: Setup,
    #[serde(default)]
    pub fixture: FixtureConfig,
    pub global: Option<Global>,
    pub scenarios: Vec<Scenario>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Setup {
    pub base_url: String,
    pub timeout_secs: Option<u64>,
    pub routes: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Global {
    pub headers: Option<toml::Value>,
}

/// Overrides for the generated fixture data. Every field falls back to the
/// defaults in `fixture.rs`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FixtureConfig {
    pub email_prefix: Option<String>,
    pub email_domain: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub login_email: Option<String>,
    pub password: Option<String>,
    pub wrong_password: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Step {
    pub name: String,
    pub method: String,
    pub url: String,
    pub headers: Option<toml::Value>,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub capture_credential: bool,
    #[serde(default)]
    pub use_credential: bool,
    #[serde(default)]
    pub requires_previous: bool,
    pub assert_status: Option<i32>,
    pub assert_fields: Option<Vec<String>>,
    pub assert_values: Option<serde_json::Map<String, serde_json::Value>>,
    pub assert_headers: Option<toml::Value>,
    pub assert_json: Option<serde_json::Value>,
    #[serde(default)]
    pub assert_no_credential: bool,
}
