//! Context propagation / property interpolation.
//!
//! Rewrites a task's `properties` by substituting `${producer.key}` and
//! `${*.key}` placeholders with values from the upstream context map. Values
//! are flattened into `"{upstreamName}.{key}"`; for `mode = last` only the
//! latest instance's context is used, matching the dependency resolution
//! rule in [`crate::resolver`].

use std::collections::HashMap;

use serde_json::Value;

use crate::task::{DependencyMode, Task};

/// Rewrites `task.properties` in place given the resolved upstream tasks
/// (already filtered to the set wired by the resolver, in upstream-name
/// iteration order for deterministic wildcard tie-breaks).
pub struct ContextInterpolator;

impl ContextInterpolator {
    /// `upstreams` must be ordered the way the task's `dependsOn` list
    /// declares them, so wildcard last-wins ties break deterministically.
    pub fn interpolate(task: &mut Task, upstreams: &[Task]) {
        let flat = Self::flatten(task, upstreams);

        let mut rewritten = serde_json::Map::with_capacity(task.properties.len());
        let mut substituted_keys = std::collections::HashSet::new();

        for (k, v) in std::mem::take(&mut task.properties) {
            let new_value = match v.as_str().and_then(Self::placeholder_ref) {
                Some(reference) => {
                    let resolved = Self::resolve_reference(reference, &flat);
                    match resolved {
                        Some(value) => value,
                        None => {
                            tracing::error!(
                                task_id = %task.id,
                                property = %k,
                                placeholder = %reference,
                                "unresolved context placeholder, substituting null"
                            );
                            Value::Null
                        }
                    }
                }
                None => v,
            };
            substituted_keys.insert(k.clone());
            rewritten.insert(k, new_value);
        }

        // Inject every flattened upstream value under its bare key, unless a
        // substituted property already claimed that key.
        for dep in &task.depends_on {
            // iterate in declared dependsOn order for determinism
            for (flat_key, value) in flat.iter() {
                if let Some(bare) = flat_key.strip_prefix(&format!("{}.", dep.name)) {
                    if !substituted_keys.contains(bare) {
                        rewritten.entry(bare.to_string()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        task.properties = rewritten;
    }

    /// `"${X}"` -> `Some("X")`; anything else -> `None`.
    fn placeholder_ref(s: &str) -> Option<&str> {
        s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
    }

    /// Flatten every upstream's context into `"{name}.{key}" -> value`,
    /// respecting each `dependsOn` entry's mode (only the latest instance's
    /// context counts for `mode = last`).
    fn flatten(task: &Task, upstreams: &[Task]) -> HashMap<String, Value> {
        let mut flat = HashMap::new();

        for dep in &task.depends_on {
            let mut matching: Vec<&Task> = upstreams
                .iter()
                .filter(|u| u.id.name == dep.name)
                .collect();
            matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            let selected: Vec<&Task> = match dep.mode {
                DependencyMode::All => matching,
                DependencyMode::First => matching.into_iter().take(1).collect(),
                DependencyMode::Last => matching.into_iter().next_back().into_iter().collect(),
            };

            for upstream in selected {
                for (k, v) in &upstream.context {
                    flat.insert(format!("{}.{}", dep.name, k), v.clone());
                }
            }
        }

        flat
    }

    /// Resolve a single `${X}` reference: `"producer.key"` direct lookup, or
    /// `"*.key"` wildcard (last-wins by upstream declaration order).
    fn resolve_reference(reference: &str, flat: &HashMap<String, Value>) -> Option<Value> {
        if let Some(key) = reference.strip_prefix("*.") {
            // Last-wins by the flattening order above, which itself follows
            // dependsOn declaration order -- HashMap iteration order isn't
            // stable, so scan flat in a deterministic pass over its own keys
            // sorted the same way dependsOn entries were flattened.
            let mut matches: Vec<&String> = flat
                .keys()
                .filter(|k| k.ends_with(&format!(".{key}")))
                .collect();
            matches.sort();
            matches.last().and_then(|k| flat.get(*k)).cloned()
        } else {
            flat.get(reference).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DependsOn, Status, TaskId};
    use chrono::Utc;

    fn upstream_with_context(name: &str, context: serde_json::Value) -> Task {
        let mut t = Task::new(
            TaskId::new("ns", "wf", "job1", name),
            "test",
            1000,
            vec![],
            serde_json::Map::new(),
            Utc::now(),
        );
        t.status = Status::Successful;
        t.context = context.as_object().unwrap().clone();
        t
    }

    fn downstream(properties: serde_json::Value, deps: Vec<DependsOn>) -> Task {
        Task::new(
            TaskId::new("ns", "wf", "job1", "d"),
            "test",
            1000,
            deps,
            properties.as_object().unwrap().clone(),
            Utc::now(),
        )
    }

    #[test]
    fn s4_named_and_wildcard_and_static_and_injection() {
        let u = upstream_with_context("u", serde_json::json!({"out": 42}));
        let mut d = downstream(
            serde_json::json!({"x": "${u.out}", "y": "${*.out}", "z": "static"}),
            vec![DependsOn {
                name: "u".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::days(1),
            }],
        );

        ContextInterpolator::interpolate(&mut d, std::slice::from_ref(&u));

        assert_eq!(d.properties["x"], 42);
        assert_eq!(d.properties["y"], 42);
        assert_eq!(d.properties["z"], "static");
        assert_eq!(d.properties["out"], 42);
    }

    #[test]
    fn unresolved_placeholder_becomes_null_but_key_is_retained() {
        let mut d = downstream(
            serde_json::json!({"x": "${missing.key}"}),
            vec![DependsOn {
                name: "missing".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::days(1),
            }],
        );
        ContextInterpolator::interpolate(&mut d, &[]);
        assert!(d.properties.contains_key("x"));
        assert_eq!(d.properties["x"], Value::Null);
    }

    #[test]
    fn substituted_key_wins_over_injection() {
        let u = upstream_with_context("u", serde_json::json!({"out": 42}));
        let mut d = downstream(
            serde_json::json!({"out": "${u.out}"}),
            vec![DependsOn {
                name: "u".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::days(1),
            }],
        );
        ContextInterpolator::interpolate(&mut d, std::slice::from_ref(&u));
        // Only one "out" key; substitution claimed it, injection is a no-op.
        assert_eq!(d.properties["out"], 42);
        assert_eq!(d.properties.len(), 1);
    }
}
