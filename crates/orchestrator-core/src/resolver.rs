//! Dependency resolver.
//!
//! For a freshly added task, finds concrete upstream task instances by name
//! within each dependency's look-back window and scope, selects among them
//! per [`DependencyMode`], and returns the full set of resolved upstream
//! ids. Resolution is all-or-nothing: if any `dependsOn` entry cannot be
//! satisfied, the whole task fails to resolve.

use crate::provider::TaskProvider;
use crate::task::{DependencyMode, Task, TaskId};

pub struct Resolver;

impl Resolver {
    /// Resolve every `dependsOn` entry of `task` against `provider`.
    ///
    /// Returns the full set of upstream ids to wire as dependency edges, or
    /// the name of the first entry that could not be satisfied.
    pub fn resolve(provider: &TaskProvider, task: &Task) -> Result<Vec<TaskId>, String> {
        let mut upstream_ids = Vec::new();

        for dep in &task.depends_on {
            let candidates = provider.candidates(&task.id.namespace, &dep.name);

            let window_start = task.created_at - dep.lookback;
            let mut in_window: Vec<Task> = candidates
                .into_iter()
                .filter(|c| {
                    c.id.workflow == task.id.workflow
                        && c.id.job == task.id.job
                        && c.created_at >= window_start
                        && c.created_at <= task.created_at
                        && c.id != task.id
                })
                .collect();

            // `candidates` is already createdAt-ascending with id tie-break.
            in_window.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            if in_window.is_empty() {
                return Err(dep.name.clone());
            }

            match dep.mode {
                DependencyMode::All => {
                    upstream_ids.extend(in_window.into_iter().map(|c| c.id));
                }
                DependencyMode::First => {
                    upstream_ids.push(in_window.into_iter().next().unwrap().id);
                }
                DependencyMode::Last => {
                    upstream_ids.push(in_window.into_iter().next_back().unwrap().id);
                }
            }
        }

        Ok(upstream_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DependsOn, Status};
    use chrono::Utc;

    fn upstream(job: &str, name: &str, created_at: chrono::DateTime<Utc>) -> Task {
        let mut t = Task::new(
            TaskId::new("ns", "wf", job, name),
            "test",
            1000,
            vec![],
            serde_json::Map::new(),
            created_at,
        );
        t.status = Status::Successful;
        t
    }

    fn downstream(job: &str, dep: DependsOn, created_at: chrono::DateTime<Utc>) -> Task {
        Task::new(
            TaskId::new("ns", "wf", job, "d"),
            "test",
            1000,
            vec![dep],
            serde_json::Map::new(),
            created_at,
        )
    }

    #[test]
    fn mode_all_wires_every_candidate_in_window() {
        let p = TaskProvider::new();
        let now = Utc::now();
        p.add(upstream("job1", "u", now - chrono::Duration::minutes(10)));
        p.add(upstream("job1", "u", now - chrono::Duration::minutes(5)));

        let d = downstream(
            "job1",
            DependsOn {
                name: "u".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::hours(1),
            },
            now,
        );
        let resolved = Resolver::resolve(&p, &d).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn mode_first_picks_earliest() {
        let p = TaskProvider::new();
        let now = Utc::now();
        let early = upstream("job1", "u", now - chrono::Duration::minutes(10));
        let late = upstream("job1", "u", now - chrono::Duration::minutes(5));
        let early_id = early.id.clone();
        p.add(early);
        p.add(late);

        let d = downstream(
            "job1",
            DependsOn {
                name: "u".into(),
                mode: DependencyMode::First,
                lookback: chrono::Duration::hours(1),
            },
            now,
        );
        let resolved = Resolver::resolve(&p, &d).unwrap();
        assert_eq!(resolved, vec![early_id]);
    }

    #[test]
    fn mode_last_picks_latest() {
        let p = TaskProvider::new();
        let now = Utc::now();
        let early = upstream("job1", "u", now - chrono::Duration::minutes(10));
        let late = upstream("job1", "u", now - chrono::Duration::minutes(5));
        let late_id = late.id.clone();
        p.add(early);
        p.add(late);

        let d = downstream(
            "job1",
            DependsOn {
                name: "u".into(),
                mode: DependencyMode::Last,
                lookback: chrono::Duration::hours(1),
            },
            now,
        );
        let resolved = Resolver::resolve(&p, &d).unwrap();
        assert_eq!(resolved, vec![late_id]);
    }

    #[test]
    fn outside_window_fails_resolution() {
        let p = TaskProvider::new();
        let now = Utc::now();
        p.add(upstream("job1", "u", now - chrono::Duration::hours(2)));

        let d = downstream(
            "job1",
            DependsOn {
                name: "u".into(),
                mode: DependencyMode::First,
                lookback: chrono::Duration::minutes(30),
            },
            now,
        );
        assert!(Resolver::resolve(&p, &d).is_err());
    }

    #[test]
    fn no_candidates_fails_resolution() {
        let p = TaskProvider::new();
        let d = downstream(
            "job1",
            DependsOn {
                name: "missing".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::hours(1),
            },
            Utc::now(),
        );
        assert!(Resolver::resolve(&p, &d).is_err());
    }
}
