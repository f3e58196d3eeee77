//! Transition guards.
//!
//! A guard is a pure predicate over task store state; every guard attached
//! to a transition must pass for the transition to be legal. Guards return
//! the failing reason so callers can report why a transition was rejected.

use crate::task::{Task, TaskStore};

/// A predicate that must hold for a transition to be legal.
pub trait Guard: Send + Sync {
    /// Guard name, used in rejection reports.
    fn name(&self) -> &str;

    /// Evaluate the guard; `Err` carries the failing reason.
    fn check(&self, task: &Task, store: &TaskStore) -> Result<(), String>;
}

/// Requires at least one specification to exist for the task.
pub struct SpecExists;

impl Guard for SpecExists {
    fn name(&self) -> &str {
        "specification-exists"
    }

    fn check(&self, task: &Task, store: &TaskStore) -> Result<(), String> {
        let count = store
            .specification_count(task.id)
            .map_err(|e| format!("failed to inspect specifications: {e}"))?;
        if count == 0 {
            return Err("no specifications".to_string());
        }
        Ok(())
    }
}

/// Requires the latest review verdict to be a pass.
///
/// Reviews carry their verdict on the first line (`PASS` or `FAIL`).
pub struct ReviewPassed;

impl Guard for ReviewPassed {
    fn name(&self) -> &str {
        "review-passed"
    }

    fn check(&self, task: &Task, store: &TaskStore) -> Result<(), String> {
        let review = store
            .latest_review(task.id)
            .map_err(|e| format!("failed to read reviews: {e}"))?
            .ok_or_else(|| "no review recorded".to_string())?;
        let verdict = review.lines().next().unwrap_or_default().trim();
        if !verdict.eq_ignore_ascii_case("PASS") {
            return Err(format!("latest review verdict is {verdict:?}, not PASS"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSource;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, TaskStore, Task) {
        let temp = tempdir().unwrap();
        let store = TaskStore::new(temp.path().join("work"));
        let task = Task::new(
            TaskSource {
                provider: "local".to_string(),
                key: "demo".to_string(),
                title: "Demo".to_string(),
            },
            "task/demo".to_string(),
        );
        store.save(&task).unwrap();
        (temp, store, task)
    }

    #[test]
    fn test_spec_exists_rejects_without_specs() {
        let (_temp, store, task) = setup();
        assert_eq!(SpecExists.check(&task, &store), Err("no specifications".to_string()));

        store.add_specification(task.id, "# Plan").unwrap();
        assert!(SpecExists.check(&task, &store).is_ok());
    }

    #[test]
    fn test_review_passed_requires_pass_verdict() {
        let (_temp, store, task) = setup();
        assert!(ReviewPassed.check(&task, &store).is_err());

        store.add_review(task.id, "FAIL\nneeds more tests").unwrap();
        assert!(ReviewPassed.check(&task, &store).is_err());

        store.add_review(task.id, "PASS\nship it").unwrap();
        assert!(ReviewPassed.check(&task, &store).is_ok());
    }
}
