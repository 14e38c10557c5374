//! Typed expression evaluation over structured inputs.
//!
//! Three call sites share this engine: version filtering
//! (`version_expr` over a `releases` list), checksum discovery
//! (`checksum_expr` over fetched checksum documents), and post-process
//! step conditions. Expressions use Jinja expression syntax: attribute
//! and index access, `select`/`reject`/`map` filters, arithmetic and
//! string operations, ternaries, list and map literals.
//!
//! Evaluation for the first two contexts is pure: no filesystem, no
//! network, no mutation. Post-process steps get their own environment
//! with filesystem functions bound to the pipeline working directory
//! (see `io::postprocess`).

use minijinja::{Environment, UndefinedBehavior};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExprError {
    #[error("failed to evaluate expression '{expression}' ({context}): {source}")]
    Eval {
        expression: String,
        context: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("expression '{expression}' ({context}) returned {got}, expected {expected}")]
    WrongType {
        expression: String,
        context: String,
        expected: &'static str,
        got: String,
    },
}

/// Result of a `checksum_expr` evaluation: either a checksum string, or a
/// `{url, checksum}` record where the URL overrides the download URL
/// (API-driven sources resolve both at once).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Checksum(String),
    Redirect { url: String, checksum: String },
}

/// Sandboxed expression engine. Cheap to construct; holds no state between
/// evaluations.
#[derive(Debug)]
pub struct ExprEngine {
    env: Environment<'static>,
}

impl Default for ExprEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Evaluate `expression` with `vars` as the variable root, returning a
    /// JSON value.
    pub fn eval(
        &self,
        expression: &str,
        context: &str,
        vars: &serde_json::Value,
    ) -> Result<serde_json::Value, ExprError> {
        let compiled =
            self.env
                .compile_expression(expression)
                .map_err(|source| ExprError::Eval {
                    expression: expression.to_string(),
                    context: context.to_string(),
                    source,
                })?;
        let value = compiled.eval(vars).map_err(|source| ExprError::Eval {
            expression: expression.to_string(),
            context: context.to_string(),
            source,
        })?;
        serde_json::to_value(&value).map_err(|e| ExprError::Eval {
            expression: expression.to_string(),
            context: context.to_string(),
            source: minijinja::Error::new(
                minijinja::ErrorKind::BadSerialization,
                e.to_string(),
            ),
        })
    }

    /// Evaluate a post-process / conditional expression for truthiness.
    pub fn eval_bool(
        &self,
        expression: &str,
        context: &str,
        vars: &serde_json::Value,
    ) -> Result<bool, ExprError> {
        match self.eval(expression, context, vars)? {
            serde_json::Value::Bool(b) => Ok(b),
            serde_json::Value::Null => Ok(false),
            serde_json::Value::String(s) => Ok(!s.is_empty()),
            serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            serde_json::Value::Array(a) => Ok(!a.is_empty()),
            serde_json::Value::Object(o) => Ok(!o.is_empty()),
        }
    }

    /// Evaluate `version_expr`. The input exposes `releases`, a list of
    /// `{tag_name, prerelease, draft, assets}` records; the result must be
    /// a list of tag names in the desired order.
    pub fn filter_versions(
        &self,
        expression: &str,
        releases: &serde_json::Value,
    ) -> Result<Vec<String>, ExprError> {
        let vars = serde_json::json!({ "releases": releases });
        let value = self.eval(expression, "version filter", &vars)?;
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(ExprError::WrongType {
                        expression: expression.to_string(),
                        context: "version filter".to_string(),
                        expected: "list of tag names",
                        got: type_name(&other).to_string(),
                    }),
                })
                .collect(),
            other => Err(ExprError::WrongType {
                expression: expression.to_string(),
                context: "version filter".to_string(),
                expected: "list of tag names",
                got: type_name(&other).to_string(),
            }),
        }
    }

    /// Evaluate `checksum_expr`. The input exposes the fetched checksum
    /// documents plus `filename`, `os`, `arch` and `version`; the result is
    /// either a checksum string or a `{url, checksum}` map.
    pub fn eval_checksum(
        &self,
        expression: &str,
        vars: &serde_json::Value,
    ) -> Result<ChecksumOutcome, ExprError> {
        let value = self.eval(expression, "checksum discovery", vars)?;
        match value {
            serde_json::Value::String(s) => Ok(ChecksumOutcome::Checksum(s)),
            serde_json::Value::Object(map) => {
                let url = map.get("url").and_then(serde_json::Value::as_str);
                let checksum = map.get("checksum").and_then(serde_json::Value::as_str);
                match (url, checksum) {
                    (Some(url), Some(checksum)) => Ok(ChecksumOutcome::Redirect {
                        url: url.to_string(),
                        checksum: checksum.to_string(),
                    }),
                    _ => Err(ExprError::WrongType {
                        expression: expression.to_string(),
                        context: "checksum discovery".to_string(),
                        expected: "checksum string or {url, checksum} map",
                        got: "map without url/checksum".to_string(),
                    }),
                }
            }
            other => Err(ExprError::WrongType {
                expression: expression.to_string(),
                context: "checksum discovery".to_string(),
                expected: "checksum string or {url, checksum} map",
                got: type_name(&other).to_string(),
            }),
        }
    }
}

fn type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "map",
    }
}
