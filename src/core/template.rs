//! Brace-pattern substitution for download URLs and asset names.
//!
//! Patterns look like `jq-{version}-{os}-{arch}.{ext}`. The variable
//! environment is built once per `(package, version, platform)` and
//! rendering is deterministic: the same pattern and environment always
//! produce the same string, and a fully rendered string re-renders to
//! itself.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::platform::Platform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("missing template variable '{variable}' in pattern '{pattern}'")]
    MissingVariable { variable: String, pattern: String },

    #[error("unterminated '{{' in pattern '{pattern}'")]
    Unterminated { pattern: String },
}

/// Variable environment for one render. Keys are plain identifiers
/// (`version`, `os`, `arch`, `platform`, `asset`, `ext`, `name`, plus any
/// user-defined template variables).
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Standard environment for a `(name, version, platform)` triple.
    /// `asset` and `ext` start empty and are filled in by the backend once
    /// an asset is chosen.
    pub fn new(name: &str, version: &str, platform: &Platform) -> Self {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), name.to_string());
        values.insert("version".to_string(), version.to_string());
        values.insert("os".to_string(), platform.os.to_string());
        values.insert("arch".to_string(), platform.arch.to_string());
        values.insert("platform".to_string(), platform.key());
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Resolve user-defined per-variable lookup tables into the context.
    ///
    /// For each variable the lookup order is platform key, then bare OS,
    /// then `default`. A table with no applicable entry contributes
    /// nothing; referencing that variable later is then a hard error.
    pub fn apply_lookup_tables(
        &mut self,
        tables: &BTreeMap<String, BTreeMap<String, String>>,
        platform: &Platform,
    ) {
        let key = platform.key();
        let os = platform.os.to_string();
        for (var, table) in tables {
            let value = table
                .get(&key)
                .or_else(|| table.get(&os))
                .or_else(|| table.get("default"));
            if let Some(v) = value {
                self.values.insert(var.clone(), v.clone());
            }
        }
    }

}

/// Render `pattern` against `ctx`.
///
/// A substitution is `{ident}` where `ident` is `[A-Za-z_][A-Za-z0-9_]*`.
/// Any other `{` is treated literally, which also makes rendering
/// idempotent: output never contains a well-formed `{ident}` unless a
/// variable's value contained one, and values are concrete strings.
pub fn render(pattern: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) => {
                let ident = &after[..close];
                if is_identifier(ident) {
                    match ctx.get(ident) {
                        Some(value) => out.push_str(value),
                        None => {
                            return Err(TemplateError::MissingVariable {
                                variable: ident.to_string(),
                                pattern: pattern.to_string(),
                            });
                        }
                    }
                    rest = &after[close + 1..];
                } else {
                    // Not a substitution; emit the brace literally.
                    out.push('{');
                    rest = after;
                }
            }
            None => {
                if after.contains('{') {
                    out.push('{');
                    rest = after;
                } else {
                    return Err(TemplateError::Unterminated {
                        pattern: pattern.to_string(),
                    });
                }
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// First unrendered substitution in `s`, if any.
pub fn first_placeholder(s: &str) -> Option<String> {
    let mut rest = s;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        if let Some(close) = after.find('}')
            && is_identifier(&after[..close])
        {
            return Some(after[..close].to_string());
        }
        rest = after;
    }
    None
}

/// True when the pattern still contains an unrendered substitution.
pub fn has_placeholders(s: &str) -> bool {
    first_placeholder(s).is_some()
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
