/// Dependent stage runner
///
/// Runs after the independent stage has drained. Tasks go one at a time in registration
/// order, so a task never overlaps anything it depends on. A task whose requested
/// dependency is missing or failed is recorded as skipped and never invoked.

use crate::sync::{
    executor::{RunResults, TaskExecutor},
    registry::TaskRegistry,
    task::TaskResult,
};
use chrono::NaiveDate;

/// Process `dependent` sequentially, consulting and extending `results`.
///
/// `requested` is the full key set of the run; only dependencies inside it are checked.
pub async fn run_dependent_stage(
    executor: &TaskExecutor,
    registry: &TaskRegistry,
    dependent: &[String],
    requested: &[String],
    target_date: NaiveDate,
    results: &mut RunResults,
) {
    if dependent.is_empty() {
        return;
    }

    tracing::info!("🔗 Running {} dependent tasks sequentially", dependent.len());

    for key in dependent {
        let Some(definition) = registry.get(key) else {
            results.insert(key.clone(), TaskResult::failure(format!("task '{}' is not registered", key)));
            continue;
        };

        let unmet = unmet_dependencies(registry, key, requested, results);
        if !unmet.is_empty() {
            tracing::warn!("⏭️ Skipping {}: dependency unmet ({})", key, unmet.join(", "));
            results.insert(key.clone(), TaskResult::dependency_unmet(&unmet));
            continue;
        }

        let result = executor.invoke(definition, target_date).await;
        results.insert(key.clone(), result);
    }
}

/// Requested dependencies of `key` with no successful result yet
fn unmet_dependencies(
    registry: &TaskRegistry,
    key: &str,
    requested: &[String],
    results: &RunResults,
) -> Vec<String> {
    registry
        .requested_dependencies(key, requested)
        .into_iter()
        .filter(|dep| !results.get(*dep).is_some_and(|r| r.success))
        .map(str::to_string)
        .collect()
}
