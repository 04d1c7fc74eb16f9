//! The flat, string-valued `VariableStore` used for `{{name}}` interpolation within
//! a single workflow run (`spec.md` §3, §4.3 "Variable interpolation").

use std::{collections::HashMap, sync::Mutex};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

/// Grammar for a variable reference: `{{ <name> }}` where `<name>` matches
/// `[A-Za-z0-9._]+`, with optional surrounding whitespace inside the braces.
static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9._]+)\s*\}\}").expect("valid regex"));

/// Names that resolve without needing to appear in any step's `needs` list.
pub const BUILTIN_PREFIXES: &[&str] = &["env.", "loop."];
pub const BUILTIN_NAMES: &[&str] = &["input", "consensus", "iteration", "item", "index"];

/// Returns true if `name` is one of the always-valid built-in variable names.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name) || BUILTIN_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Scans `text` and returns every `{{name}}` reference found, in order of appearance.
pub fn find_refs(text: &str) -> Vec<String> {
    REF_PATTERN
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Flat `map<name, string>` shared read-write across orchestrator workers.
///
/// Writes are serialized by a single mutex (`spec.md` §5 "Shared resources"); each
/// successful step commits its output atomically via [`VariableStore::publish_step`].
#[derive(Debug, Default)]
pub struct VariableStore {
    values: Mutex<HashMap<String, String>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fresh store with the workflow's `input` and a snapshot of the
    /// process environment under `env.<K>`.
    pub fn with_input(input: impl Into<String>) -> Self {
        let store = Self::new();
        store.set("input", input);
        for (k, v) in std::env::vars() {
            store.set(format!("env.{k}"), v);
        }
        store
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .expect("variable store mutex poisoned")
            .insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .expect("variable store mutex poisoned")
            .get(name)
            .cloned()
    }

    /// Publishes a completed step's output under both `step.<name>` and the bare
    /// `<name>` alias (`spec.md` §3 VariableStore, §4.3 "Variable interpolation").
    pub fn publish_step(&self, step_name: &str, output: impl Into<String>) {
        let output = output.into();
        let mut guard = self.values.lock().expect("variable store mutex poisoned");
        guard.insert(format!("step.{step_name}"), output.clone());
        guard.insert(step_name.to_string(), output);
    }

    /// Publishes a skipped step: both keys exist but hold the empty string, so
    /// downstream references still interpolate (`spec.md` §4.2 "Conditional guard").
    pub fn publish_skipped(&self, step_name: &str) {
        self.publish_step(step_name, "");
    }

    /// Substitutes every `{{name}}` occurrence in `text` with its looked-up value.
    /// Substitution is literal string replacement; nested field access
    /// (`{{input.text}}`) is rejected with `unknown-ref` by the loader before this
    /// ever runs, so any ref reaching here is expected to resolve.
    pub fn interpolate(&self, text: &str) -> Result<String> {
        let mut result = String::with_capacity(text.len());
        let mut last_end = 0;
        for caps in REF_PATTERN.captures_iter(text) {
            let whole = caps.get(0).expect("capture 0 always present");
            let name = &caps[1];
            result.push_str(&text[last_end..whole.start()]);
            match self.get(name) {
                Some(value) => result.push_str(&value),
                None => {
                    return Err(CoreError::InterpolationFailed(format!(
                        "unresolved variable '{{{{ {name} }}}}'"
                    )));
                }
            }
            last_end = whole.end();
        }
        result.push_str(&text[last_end..]);
        Ok(result)
    }

    /// Snapshot of everything under the `loop.*` namespace, handy for seeding a
    /// child run's environment-style lookups during tests.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().expect("variable store mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_known_refs() {
        let store = VariableStore::new();
        store.set("input", "hi");
        store.publish_step("a", "42");
        assert_eq!(store.interpolate("value={{input}} a={{a}}").unwrap(), "value=hi a=42");
    }

    #[test]
    fn rejects_unresolved_ref() {
        let store = VariableStore::new();
        assert!(store.interpolate("{{missing}}").is_err());
    }

    #[test]
    fn skipped_step_publishes_empty_string() {
        let store = VariableStore::new();
        store.publish_skipped("b");
        assert_eq!(store.get("step.b"), Some(String::new()));
        assert_eq!(store.get("b"), Some(String::new()));
    }

    #[test]
    fn find_refs_extracts_names_in_order() {
        assert_eq!(find_refs("{{a}} and {{ b.c }}"), vec!["a", "b.c"]);
    }

    #[test]
    fn builtin_recognizes_env_and_loop_namespaces() {
        assert!(is_builtin("env.API_KEY"));
        assert!(is_builtin("loop.index"));
        assert!(is_builtin("input"));
        assert!(!is_builtin("some_step"));
    }
}
