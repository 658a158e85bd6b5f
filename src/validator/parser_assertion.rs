use miette::NamedSource;
use miette::SourceSpan;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use toml::Value;

use crate::fixture::Fixture;
use crate::parser::Step;
use crate::validator::Assertion;
use crate::validator::ValidationError;

/// Helper function to find the span of a snippet in the source contents.
fn find_snippet_span(src: Option<&(String, String)>, snippet: &str) -> Option<SourceSpan> {
    let (_, content) = src?;
    // Assumes the snippet is unique and takes its first occurrence.
    let start = content.find(snippet)?;
    Some(SourceSpan::new(start.into(), snippet.len()))
}

/// Macro to simplify the creation of a ValidationError with source context.
macro_rules! validation_err {
    ($src:expr, $field:expr, $message:expr, $span_fn:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $message,
            src: $src.map(|(name, content)| NamedSource::new(name.clone(), content.clone())),
            span: $span_fn,
        }
    };
}

/// Parses a single header key-value pair and adds it to the HeaderMap.
fn parse_single_header(
    header_map: &mut HeaderMap,
    key: &str,
    value: &Value,
    src: Option<&(String, String)>,
) -> Result<(), ValidationError> {
    let v_str = value.as_str().ok_or_else(|| {
        validation_err!(
            src,
            key,
            format!("Header value must be a string, got {value:?}"),
            find_snippet_span(src, key)
        )
    })?;

    let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
        validation_err!(
            src,
            key,
            format!("Invalid header name `{key}`: {e}"),
            find_snippet_span(src, key)
        )
    })?;

    let h_value = HeaderValue::from_str(v_str).map_err(|e| {
        validation_err!(
            src,
            key,
            format!("Invalid header value for `{key}`: {e}"),
            find_snippet_span(src, v_str)
        )
    })?;

    header_map.insert(name, h_value);
    Ok(())
}

/// Parses a TOML table of header names to string values.
pub fn parse_header_map(
    value: &Value,
    src: Option<&(String, String)>,
) -> Result<HeaderMap, ValidationError> {
    let map = value.as_table().ok_or_else(|| {
        validation_err!(
            src,
            "headers",
            format!("Expected a table for headers, got {value:?}"),
            None
        )
    })?;

    let mut header_map = HeaderMap::new();

    for (k, v) in map {
        parse_single_header(&mut header_map, k, v, src)?;
    }

    Ok(header_map)
}

fn parse_status(
    step: &Step,
    status: i32,
    src: Option<&(String, String)>,
) -> Result<StatusCode, ValidationError> {
    u16::try_from(status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| {
            validation_err!(
                src,
                format!("{}/assert_status", step.name),
                format!("`{status}` is not a valid HTTP status code"),
                find_snippet_span(src, &status.to_string())
            )
        })
}

fn check_field_path(
    step: &Step,
    path: &str,
    src: Option<&(String, String)>,
) -> Result<(), ValidationError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(validation_err!(
            src,
            format!("{}/assert_fields", step.name),
            format!("`{path}` is not a valid field path, expected keys separated by dots"),
            find_snippet_span(src, path)
        ));
    }

    Ok(())
}

/// Parses every assertion declared on a step into a Vec<Assertion>, rendering
/// fixture placeholders in the expected values.
pub fn parse_assertions(
    step: &Step,
    fixture: &Fixture,
    src: Option<&(String, String)>,
) -> Result<Vec<Assertion>, ValidationError> {
    let mut assert_vec = vec![];

    if let Some(status) = step.assert_status {
        assert_vec.push(Assertion::Status(parse_status(step, status, src)?));
    }

    if let Some(paths) = &step.assert_fields {
        for path in paths {
            check_field_path(step, path, src)?;
        }
        assert_vec.push(Assertion::Fields(paths.clone()));
    }

    if let Some(values) = &step.assert_values {
        let mut expected = Vec::with_capacity(values.len());
        for (path, value) in values {
            check_field_path(step, path, src)?;
            let value = fixture.render(value).map_err(|e| {
                validation_err!(
                    src,
                    format!("{}/assert_values", step.name),
                    e.to_string(),
                    find_snippet_span(src, path)
                )
            })?;
            expected.push((path.clone(), value));
        }
        assert_vec.push(Assertion::Values(expected));
    }

    if let Some(value) = &step.assert_headers {
        let header_map = parse_header_map(value, src)?;
        assert_vec.push(Assertion::Headers(header_map));
    }

    if let Some(json) = &step.assert_json {
        let json = fixture.render(json).map_err(|e| {
            validation_err!(
                src,
                format!("{}/assert_json", step.name),
                e.to_string(),
                None
            )
        })?;
        assert_vec.push(Assertion::Json(json));
    }

    if step.assert_no_credential {
        assert_vec.push(Assertion::NoCredential);
    }

    Ok(assert_vec)
}
