// Variable manager - layered variable store and template rendering

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::PrepError;
use crate::inventory::Inventory;

/// Variable store for a run. Lookup precedence, highest first:
/// extra vars (injected overrides), per-task vars, registered task results,
/// host vars from the inventory.
///
/// Registered results are written while a play runs, everything else is
/// settled before the first task executes.
pub struct VariableManager {
    extra: HashMap<String, Value>,
    host_vars: HashMap<String, HashMap<String, Value>>,
    registered: RwLock<HashMap<(String, String), Value>>,
}

impl VariableManager {
    pub fn new(inventory: &Inventory) -> Self {
        let host_vars = inventory
            .hosts()
            .iter()
            .map(|h| (h.name.clone(), h.vars.clone()))
            .collect();

        VariableManager {
            extra: HashMap::new(),
            host_vars,
            registered: RwLock::new(HashMap::new()),
        }
    }

    /// Inject an override variable, visible to every host.
    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    /// Store a task's result payload under its register name for one host.
    pub fn register(&self, host: &str, name: impl Into<String>, payload: Value) {
        self.registered
            .write()
            .insert((host.to_string(), name.into()), payload);
    }

    pub fn get_registered(&self, host: &str, name: &str) -> Option<Value> {
        self.registered
            .read()
            .get(&(host.to_string(), name.to_string()))
            .cloned()
    }

    /// Resolve a dotted expression like `shell_out.stdout` for a host.
    pub fn resolve(
        &self,
        host: &str,
        expr: &str,
        task_vars: &HashMap<String, Value>,
    ) -> Option<Value> {
        let mut parts = expr.split('.');
        let first = parts.next()?.trim();

        let mut current = self
            .extra
            .get(first)
            .cloned()
            .or_else(|| task_vars.get(first).cloned())
            .or_else(|| self.get_registered(host, first))
            .or_else(|| {
                self.host_vars
                    .get(host)
                    .and_then(|vars| vars.get(first))
                    .cloned()
            })?;

        for part in parts {
            let part = part.trim();
            current = match current {
                Value::Object(ref map) => map.get(part).cloned()?,
                Value::Array(ref list) => {
                    let idx: usize = part.parse().ok()?;
                    list.get(idx).cloned()?
                }
                _ => return None,
            };
        }

        Some(current)
    }

    /// Render a template string against the store. A template that is a
    /// single `{{ expr }}` yields the resolved value itself (so list-valued
    /// variables survive); mixed text interpolates stringified values.
    /// Unresolved references are an error, not empty output.
    pub fn render(
        &self,
        host: &str,
        template: &str,
        task_vars: &HashMap<String, Value>,
    ) -> Result<Value, PrepError> {
        let trimmed = template.trim();

        // Whole-string expression keeps its value type
        if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
            let inner = &trimmed[2..trimmed.len() - 2];
            if !inner.contains("{{") && !inner.contains("}}") {
                let expr = inner.trim();
                return self.resolve(host, expr, task_vars).ok_or_else(|| {
                    PrepError::Template {
                        expression: template.to_string(),
                        message: format!("undefined variable '{}'", expr),
                    }
                });
            }
        }

        let mut out = String::new();
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| PrepError::Template {
                expression: template.to_string(),
                message: "unclosed '{{'".to_string(),
            })?;

            let expr = after[..end].trim();
            let value =
                self.resolve(host, expr, task_vars)
                    .ok_or_else(|| PrepError::Template {
                        expression: template.to_string(),
                        message: format!("undefined variable '{}'", expr),
                    })?;

            out.push_str(&value_to_string(&value));
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(Value::String(out))
    }
}

/// Stringify a value for interpolation. Strings render bare (no quotes),
/// lists join with spaces, everything else uses its JSON form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manager() -> VariableManager {
        let inv = Inventory::from_sources("web1,").unwrap();
        VariableManager::new(&inv)
    }

    #[test]
    fn test_extra_var_injection() {
        let mut vars = manager();
        vars.set_extra("ansible_python_interpreter", json!("/usr/bin/python3"));

        let value = vars
            .resolve("web1", "ansible_python_interpreter", &HashMap::new())
            .unwrap();
        assert_eq!(value, json!("/usr/bin/python3"));
    }

    #[test]
    fn test_register_and_nested_resolve() {
        let vars = manager();
        vars.register(
            "web1",
            "shell_out",
            json!({"stdout": "bin\netc", "rc": 0, "changed": true}),
        );

        let rendered = vars
            .render("web1", "{{ shell_out.stdout }}", &HashMap::new())
            .unwrap();
        assert_eq!(rendered, json!("bin\netc"));

        // Registered results are scoped per host
        assert!(vars
            .resolve("other", "shell_out", &HashMap::new())
            .is_none());
    }

    #[test]
    fn test_whole_expression_keeps_list_type() {
        let vars = manager();
        let mut task_vars = HashMap::new();
        task_vars.insert("packages".to_string(), json!(["curl", "docker-ce"]));

        let rendered = vars.render("web1", "{{ packages }}", &task_vars).unwrap();
        assert_eq!(rendered, json!(["curl", "docker-ce"]));
    }

    #[test]
    fn test_interpolation() {
        let vars = manager();
        vars.register("web1", "out", json!({"rc": 0}));

        let rendered = vars
            .render("web1", "exit code was {{ out.rc }}", &HashMap::new())
            .unwrap();
        assert_eq!(rendered, json!("exit code was 0"));
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let vars = manager();
        let err = vars
            .render("web1", "{{ missing.stdout }}", &HashMap::new())
            .unwrap_err();

        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unclosed_braces_is_error() {
        let vars = manager();
        assert!(vars
            .render("web1", "oops {{ truncated", &HashMap::new())
            .is_err());
    }

    #[test]
    fn test_value_to_string_joins_lists() {
        assert_eq!(value_to_string(&json!(["a", "b"])), "a b");
        assert_eq!(value_to_string(&json!("plain")), "plain");
        assert_eq!(value_to_string(&json!(42)), "42");
    }
}
