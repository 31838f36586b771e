//! Input validation rulesets (`validator.yaml`) and their middleware.
//!
//! ```yaml
//! report: true
//! rules:
//!   - field: id
//!     in: query
//!     required: false
//!     kind: string
//!     not_empty: true
//! ```

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Message reported for every failing rule.
pub const INVALID_VALUE: &str = "Invalid value";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLocation {
    Body,
    Query,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRule {
    pub field: String,
    #[serde(default, rename = "in")]
    pub location: FieldLocation,
    #[serde(default = "yes")]
    pub required: bool,
    #[serde(default)]
    pub kind: Option<ValueKind>,
    #[serde(default)]
    pub not_empty: bool,
    #[serde(default)]
    pub min_len: Option<usize>,
    #[serde(default)]
    pub max_len: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleSet {
    #[serde(default = "yes")]
    report: bool,
    #[serde(default)]
    rules: Vec<FieldRule>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("malformed ruleset: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("bad pattern for field '{field}': {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: FieldRule,
    pattern: Option<Regex>,
}

/// Parsed `validator.yaml`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    report: bool,
    rules: Vec<CompiledRule>,
}

/// Failing fields, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `{"errors":[{"title":"Invalid value"}]}`
    pub fn to_json(&self) -> Value {
        let errors = self
            .errors
            .iter()
            .map(|(field, msg)| {
                let mut m = Map::new();
                m.insert(field.clone(), Value::String(msg.clone()));
                Value::Object(m)
            })
            .collect();
        serde_json::json!({ "errors": Value::Array(errors) })
    }
}

/// Request data the rules look at.
#[derive(Debug, Clone, Default)]
pub struct RequestInputs {
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
}

impl RequestInputs {
    /// Query string plus a JSON object or url-encoded form body; anything else reads as empty.
    pub fn parse(query: Option<&str>, content_type: Option<&str>, body: &[u8]) -> Self {
        Self {
            query: parse_query(query),
            body: parse_body(content_type, body),
        }
    }

    /// Body first, then query.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.lookup(field, FieldLocation::Any)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    fn lookup(&self, field: &str, location: FieldLocation) -> Option<&Value> {
        let found = match location {
            FieldLocation::Body => self.body.get(field),
            FieldLocation::Query => self.query.get(field),
            FieldLocation::Any => self.body.get(field).or_else(|| self.query.get(field)),
        };
        found.filter(|v| !v.is_null())
    }
}

impl RuleSet {
    pub const FILE_NAME: &'static str = "validator.yaml";

    pub fn from_yaml(raw: &str) -> Result<Self, RuleSetError> {
        let raw: RawRuleSet = if raw.trim().is_empty() {
            RawRuleSet {
                report: true,
                rules: Vec::new(),
            }
        } else {
            serde_yaml::from_str(raw)?
        };

        let rules = raw
            .rules
            .into_iter()
            .map(|rule| {
                let pattern = rule
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|source| RuleSetError::Pattern {
                        field: rule.field.clone(),
                        source,
                    })?;
                Ok(CompiledRule { rule, pattern })
            })
            .collect::<Result<Vec<_>, RuleSetError>>()?;

        Ok(Self {
            report: raw.report,
            rules,
        })
    }

    /// Whether failures are described in the 400 body.
    pub fn reports_failures(&self) -> bool {
        self.report
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(&self, inputs: &RequestInputs) -> ValidationReport {
        let errors = self
            .rules
            .iter()
            .filter(|c| !check(c, inputs.lookup(&c.rule.field, c.rule.location)))
            .map(|c| (c.rule.field.clone(), INVALID_VALUE.to_string()))
            .collect();
        ValidationReport { errors }
    }
}

fn check(compiled: &CompiledRule, value: Option<&Value>) -> bool {
    let rule = &compiled.rule;
    let Some(value) = value else {
        return !rule.required;
    };

    let kind_ok = match rule.kind {
        None => true,
        Some(ValueKind::String) => value.is_string(),
        Some(ValueKind::Number) => match value {
            Value::Number(_) => true,
            Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        },
        Some(ValueKind::Boolean) => match value {
            Value::Bool(_) => true,
            Value::String(s) => matches!(s.as_str(), "true" | "false"),
            _ => false,
        },
    };
    if !kind_ok {
        return false;
    }

    let len = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        Value::Object(o) => Some(o.len()),
        _ => None,
    };
    if rule.not_empty && len == Some(0) {
        return false;
    }
    if let (Some(min), Some(len)) = (rule.min_len, len) {
        if len < min {
            return false;
        }
    }
    if let (Some(max), Some(len)) = (rule.max_len, len) {
        if len > max {
            return false;
        }
    }
    if let Some(re) = &compiled.pattern {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !re.is_match(&text) {
            return false;
        }
    }
    true
}

fn parse_query(query: Option<&str>) -> Map<String, Value> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> Map<String, Value> {
    if bytes.is_empty() {
        return Map::new();
    }
    let content_type = content_type.unwrap_or_default();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return url::form_urlencoded::parse(bytes)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Stashed by [`collect`] for [`respond`].
#[derive(Debug, Clone)]
pub(crate) struct ValidationOutcome {
    report: ValidationReport,
    describe: bool,
}

/// Runs the route's rules and records the outcome; the request always continues.
pub(crate) async fn collect(
    State(rules): State<Arc<RuleSet>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body for validation");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let inputs = RequestInputs::parse(parts.uri.query(), content_type, &bytes);
    let report = rules.evaluate(&inputs);

    parts.extensions.insert(inputs);
    parts.extensions.insert(ValidationOutcome {
        report,
        describe: rules.reports_failures(),
    });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Shared failure responder: 400 when the recorded outcome has errors.
pub(crate) async fn respond(req: Request, next: Next) -> Response {
    let failed = req
        .extensions()
        .get::<ValidationOutcome>()
        .filter(|o| !o.report.is_empty())
        .cloned();

    match failed {
        None => next.run(req).await,
        Some(outcome) if outcome.describe => {
            (StatusCode::BAD_REQUEST, Json(outcome.report.to_json())).into_response()
        }
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}
