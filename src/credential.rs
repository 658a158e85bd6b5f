use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::InvalidHeaderValue;
use reqwest::header::SET_COOKIE;

/// Session cookie captured from a login response, in `name=value` form.
///
/// Owned by a single scenario run and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&self.0)
    }
}

/// Pulls the session cookie out of the first `set-cookie` header.
///
/// A missing header, or one without a usable `name=value` pair, yields `None`
/// rather than an error.
pub fn extract_credential(headers: &HeaderMap) -> Option<Credential> {
    let raw = headers.get(SET_COOKIE)?.to_str().ok()?;
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;

    if name.trim().is_empty() || value.trim().is_empty() {
        return None;
    }

    Some(Credential(pair.to_string()))
}
