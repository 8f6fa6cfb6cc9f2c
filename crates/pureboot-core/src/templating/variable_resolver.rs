//! Resolve `${namespace.key}` / `${namespace.key|default}` placeholders
//! against a structured, namespaced variable context.
//!
//! Grounded 1:1 on the original `VariableResolver`. Hand-rolled scanner
//! rather than a `regex` dependency: the pattern (`${[a-z]+\.[a-z_]+(\|...)?}`)
//! is simple enough that a single left-to-right scan suffices, and nothing
//! else in this workspace reaches for `regex`.

use std::collections::HashMap;

/// Namespaces with a fixed, known set of keys. Referencing an unknown key
/// within one of these is a validation error; `meta` and `secret` accept
/// any key.
const CLOSED_NAMESPACES: &[(&str, &[&str])] = &[
    (
        "node",
        &[
            "id",
            "mac",
            "ip",
            "hostname",
            "uuid",
            "serial",
            "vendor",
            "model",
            "architecture",
            "boot_mode",
            "state",
        ],
    ),
    ("group", &["id", "name", "description"]),
    ("workflow", &["id", "name", "description"]),
    ("server", &["url", "tftp_url", "http_url"]),
    ("template", &["id", "name", "version"]),
    ("execution", &["id", "step_id", "step_name"]),
];

const OPEN_NAMESPACES: &[&str] = &["meta", "secret"];

/// A variable reference found in a template: `namespace.key`, with an
/// optional literal default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    /// Namespace component.
    pub namespace: String,
    /// Key component.
    pub key: String,
    /// Default text, if the placeholder carried a `|default`.
    pub default: Option<String>,
}

/// Namespace -> key -> value context supplied to a render.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    namespaces: HashMap<String, HashMap<String, String>>,
}

impl VariableContext {
    /// Build an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `namespace.key = value`, creating the namespace if needed.
    pub fn set(&mut self, namespace: impl Into<String>, key: impl Into<String>, value: impl Into<String>) {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.namespaces.get(namespace)?.get(key).map(String::as_str)
    }
}

/// Resolves `${namespace.key}` / `${namespace.key|default}` placeholders
/// against a [`VariableContext`].
#[derive(Debug, Clone)]
pub struct VariableResolver<'a> {
    context: &'a VariableContext,
}

impl<'a> VariableResolver<'a> {
    /// Build a resolver over `context`.
    #[must_use]
    pub fn new(context: &'a VariableContext) -> Self {
        Self { context }
    }

    /// Substitute every `${namespace.key}` reference in `content`. A
    /// reference whose value is absent resolves to its default if one was
    /// given, or is left as the literal placeholder text otherwise.
    #[must_use]
    pub fn resolve(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let inner = &after[..end];
            let literal = &rest[start..start + 2 + end + 1];

            match parse_placeholder(inner) {
                Some(reference) => {
                    let value = self.context.get(&reference.namespace, &reference.key);
                    match value {
                        Some(v) => out.push_str(v),
                        None => match &reference.default {
                            Some(default) => out.push_str(default),
                            None => out.push_str(literal),
                        },
                    }
                }
                None => out.push_str(literal),
            }

            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// List every `namespace.key` reference found in `content`, in order,
    /// duplicates included.
    #[must_use]
    pub fn list_variables(content: &str) -> Vec<String> {
        scan_placeholders(content)
            .into_iter()
            .map(|r| format!("{}.{}", r.namespace, r.key))
            .collect()
    }

    /// Validate every reference in `content` against the known namespace
    /// and key tables. Returns one message per invalid reference.
    #[must_use]
    pub fn validate(content: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for reference in scan_placeholders(content) {
            if OPEN_NAMESPACES.contains(&reference.namespace.as_str()) {
                continue;
            }
            match CLOSED_NAMESPACES.iter().find(|(ns, _)| *ns == reference.namespace) {
                None => errors.push(format!("Unknown namespace: {}", reference.namespace)),
                Some((_, keys)) if !keys.contains(&reference.key.as_str()) => {
                    errors.push(format!("Unknown variable: {}.{}", reference.namespace, reference.key));
                }
                Some(_) => {}
            }
        }
        errors
    }
}

fn scan_placeholders(content: &str) -> Vec<VariableRef> {
    let mut refs = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let inner = &after[..end];
        if let Some(reference) = parse_placeholder(inner) {
            refs.push(reference);
        }
        rest = &after[end + 1..];
    }
    refs
}

/// Parse the inside of a `${...}` span: `namespace.key` or
/// `namespace.key|default`. Namespace must be all-lowercase-ASCII-letters;
/// key must be lowercase-ASCII-letters/underscore. Anything else is not a
/// recognised placeholder and is left untouched by the caller.
fn parse_placeholder(inner: &str) -> Option<VariableRef> {
    let (path, default) = match inner.split_once('|') {
        Some((path, default)) => (path, Some(default.to_string())),
        None => (inner, None),
    };
    let (namespace, key) = path.split_once('.')?;

    if namespace.is_empty() || !namespace.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_lowercase() || b == b'_') {
        return None;
    }

    Some(VariableRef {
        namespace: namespace.to_string(),
        key: key.to_string(),
        default,
    })
}
