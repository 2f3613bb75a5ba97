mod common;

use common::{
    keys, orchestrator, target_date, temp_database, temp_database_with, Behaviour, ConcurrencyGauge, StubTask,
};
use datasync::{
    history::{ExecutionQuery, ExecutionStatus, TriggeredBy},
    sync::{ExecutorSettings, RunRequest, TaskRegistry, TriggerError},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

fn settings(max_workers: usize, task_timeout: Duration) -> ExecutorSettings {
    ExecutorSettings {
        max_workers,
        task_timeout,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_independent_task_does_not_block_unrelated_dependent() {
    let (_dir, database) = temp_database().await;

    let stock_list = StubTask::new(Behaviour::Succeed);
    let quotes = StubTask::new(Behaviour::Fail);
    let adjustments = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", stock_list.clone(), vec![]).unwrap();
    registry.register("daily_quotes", quotes.clone(), vec![]).unwrap();
    registry
        .register("adjust_factors", adjustments.clone(), keys(&["stock_list"]))
        .unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.results["stock_list"].success);
    assert!(!report.results["daily_quotes"].success);
    assert!(report.results["adjust_factors"].success);
    assert_eq!(adjustments.call_count(), 1);

    let record = orchestrator.store().get(&report.execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.task_type, "all");
    assert_eq!(record.task_name, "Daily data sync");
    assert_eq!(record.triggered_by, TriggeredBy::Manual);
    assert_eq!(record.target_date, target_date());
    assert!(record.end_time.is_some());
    assert!(record.duration.unwrap() >= 0.0);

    let result = record.result.unwrap();
    assert_eq!(result["stock_list"]["count"], 3);
    assert_eq!(result["adjust_factors"]["success"], true);
    assert!(record
        .error_message
        .unwrap()
        .contains("daily_quotes: provider returned HTTP 502"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependent_with_failed_dependency_is_never_invoked() {
    let (_dir, database) = temp_database().await;

    let stock_list = StubTask::new(Behaviour::Flag(false));
    let quotes = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", stock_list.clone(), vec![]).unwrap();
    registry.register("daily_quotes", quotes.clone(), keys(&["stock_list"])).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(stock_list.call_count(), 1);
    assert_eq!(quotes.call_count(), 0);

    let skipped = &report.results["daily_quotes"];
    assert!(!skipped.success);
    assert!(skipped.is_dependency_unmet());
    assert_eq!(skipped.error.as_deref(), Some("dependency unmet: stock_list"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependency_outside_request_runs_without_gate() {
    let (_dir, database) = temp_database().await;

    let stock_list = StubTask::new(Behaviour::Succeed);
    let quotes = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", stock_list.clone(), vec![]).unwrap();
    registry.register("daily_quotes", quotes.clone(), keys(&["stock_list"])).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(Some(keys(&["daily_quotes"])), Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(stock_list.call_count(), 0);
    assert_eq!(quotes.call_count(), 1);

    let record = orchestrator.store().get(&report.execution_id).await.unwrap().unwrap();
    assert_eq!(record.task_type, "daily_quotes");
    assert_eq!(record.task_name, "Data sync: daily_quotes");
    assert_eq!(record.error_message, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_stage_respects_worker_cap() {
    let (_dir, database) = temp_database().await;
    let gauge = Arc::new(ConcurrencyGauge::default());

    let mut registry = TaskRegistry::new();
    let mut stubs = Vec::new();
    for i in 0..6 {
        let stub = StubTask::gauged(Behaviour::Sleep(Duration::from_millis(100)), Arc::clone(&gauge));
        registry.register(format!("task_{}", i), stub.clone(), vec![]).unwrap();
        stubs.push(stub);
    }

    let orchestrator = orchestrator(&database, registry, settings(2, Duration::from_secs(10)));
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert_eq!(report.results.len(), 6);
    assert!(stubs.iter().all(|s| s.call_count() == 1));
    assert!(gauge.peak() <= 2, "peak concurrency was {}", gauge.peak());
    assert!(gauge.peak() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn errors_and_panics_are_isolated_per_task() {
    let (_dir, database) = temp_database().await;

    let healthy = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry.register("erroring", StubTask::new(Behaviour::Error), vec![]).unwrap();
    registry.register("panicking", StubTask::new(Behaviour::Panic), vec![]).unwrap();
    registry.register("healthy", healthy.clone(), vec![]).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.results["healthy"].success);
    assert_eq!(healthy.call_count(), 1);

    let erroring = &report.results["erroring"];
    assert!(!erroring.success);
    assert!(erroring.error.as_deref().unwrap().contains("connection reset"));

    let panicking = &report.results["panicking"];
    assert!(!panicking.success);
    assert!(panicking.error.as_deref().unwrap().contains("stub exploded"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_task_is_abandoned_at_deadline() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry
        .register("slow", StubTask::new(Behaviour::Sleep(Duration::from_secs(30))), vec![])
        .unwrap();
    registry.register("fast", StubTask::new(Behaviour::Succeed), vec![]).unwrap();

    let deadline = Duration::from_millis(300);
    let orchestrator = orchestrator(&database, registry, settings(5, deadline));

    let started = Instant::now();
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert!(started.elapsed() < deadline + Duration::from_secs(5));
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.results["fast"].success);
    assert!(report.results["slow"].is_timed_out());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trigger_returns_id_before_run_completes() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry
        .register("stock_list", StubTask::new(Behaviour::Sleep(Duration::from_millis(200))), vec![])
        .unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let id = Arc::clone(&orchestrator)
        .trigger(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    let record = orchestrator.store().get(&id).await.unwrap().unwrap();
    assert!(!record.status.is_terminal());

    let mut status = record.status;
    for _ in 0..100 {
        status = orchestrator.store().get(&id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, ExecutionStatus::Success);
}

#[tokio::test]
async fn unknown_task_key_is_rejected_without_record() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", StubTask::new(Behaviour::Succeed), vec![]).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let result = orchestrator
        .run(RunRequest::manual(Some(keys(&["bond_list"])), None))
        .await;

    assert!(matches!(result, Err(TriggerError::Invalid(_))));
    let page = orchestrator.store().list(&ExecutionQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn scheduled_run_records_trigger_name_and_today() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", StubTask::new(Behaviour::Succeed), vec![]).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::scheduled("Daily full sync", vec![]))
        .await
        .unwrap();

    let record = orchestrator.store().get(&report.execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.task_name, "Daily full sync");
    assert_eq!(record.triggered_by, TriggeredBy::Scheduler);
    // Tolerate a run straddling midnight in the configured timezone.
    let today = orchestrator.today();
    assert!(record.target_date == today || record.target_date.succ_opt() == Some(today));
}

#[tokio::test]
async fn finalizing_twice_keeps_first_outcome() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", StubTask::new(Behaviour::Succeed), vec![]).unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();
    assert_eq!(report.status, ExecutionStatus::Success);

    let store = orchestrator.store();
    let before = store.get(&report.execution_id).await.unwrap().unwrap();
    let again = store
        .finalize(&report.execution_id, &Default::default(), Some("late failure"))
        .await
        .unwrap();
    assert_eq!(again, ExecutionStatus::Success);
    assert_eq!(store.get(&report.execution_id).await.unwrap().unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broken_bookkeeping_still_ends_failed() {
    let (_dir, database) = temp_database().await;

    let mut registry = TaskRegistry::new();
    registry
        .register("stock_list", StubTask::new(Behaviour::RewindRecords), vec![])
        .unwrap();

    let orchestrator = orchestrator(&database, registry, ExecutorSettings::default());
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    // The task itself succeeded; the record could not move PENDING -> SUCCESS.
    assert!(report.results["stock_list"].success);
    assert_eq!(report.status, ExecutionStatus::Failed);

    let record = orchestrator.store().get(&report.execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.end_time.is_some());
    let message = record.error_message.unwrap();
    assert!(message.starts_with("execution bookkeeping failed"), "{}", message);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_are_returned_on_every_exit_path() {
    let (_dir, database) = temp_database_with(2).await;

    // More failing tasks than pooled connections.
    let mut registry = TaskRegistry::new();
    for i in 0..3 {
        registry
            .register(format!("erroring_{}", i), StubTask::new(Behaviour::Error), vec![])
            .unwrap();
        registry
            .register(format!("panicking_{}", i), StubTask::new(Behaviour::Panic), vec![])
            .unwrap();
    }
    let failing = orchestrator(&database, registry, settings(2, Duration::from_secs(10)));
    let report = failing
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();
    for i in 0..3 {
        let erroring = &report.results[format!("erroring_{}", i).as_str()];
        assert!(erroring.error.as_deref().unwrap().contains("connection reset"));
        let panicking = &report.results[format!("panicking_{}", i).as_str()];
        assert!(panicking.error.as_deref().unwrap().contains("stub exploded"));
    }

    // Abandoned bodies hold their connection only until they return.
    let mut registry = TaskRegistry::new();
    for i in 0..3 {
        registry
            .register(
                format!("slow_{}", i),
                StubTask::new(Behaviour::Sleep(Duration::from_millis(300))),
                vec![],
            )
            .unwrap();
    }
    let timing_out = orchestrator(&database, registry, settings(3, Duration::from_millis(100)));
    let report = timing_out
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();
    assert!(report.results.values().all(|r| r.is_timed_out()));
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let mut registry = TaskRegistry::new();
    let mut stubs = Vec::new();
    for i in 0..4 {
        let stub = StubTask::new(Behaviour::Succeed);
        registry.register(format!("healthy_{}", i), stub.clone(), vec![]).unwrap();
        stubs.push(stub);
    }
    let healthy = orchestrator(&database, registry, settings(2, Duration::from_secs(10)));
    let report = healthy
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Success);
    assert!(stubs.iter().all(|s| s.call_count() == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependent_task_is_abandoned_at_deadline() {
    let (_dir, database) = temp_database().await;

    let adjustments = StubTask::new(Behaviour::Succeed);
    let report_task = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry.register("stock_list", StubTask::new(Behaviour::Succeed), vec![]).unwrap();
    registry
        .register(
            "daily_quotes",
            StubTask::new(Behaviour::Sleep(Duration::from_secs(5))),
            keys(&["stock_list"]),
        )
        .unwrap();
    registry
        .register("adjust_factors", adjustments.clone(), keys(&["stock_list"]))
        .unwrap();
    registry
        .register("quote_report", report_task.clone(), keys(&["daily_quotes"]))
        .unwrap();

    let orchestrator = orchestrator(&database, registry, settings(5, Duration::from_millis(200)));

    let started = Instant::now();
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.results["daily_quotes"].is_timed_out());
    assert!(report.results["adjust_factors"].success);
    assert_eq!(adjustments.call_count(), 1);
    assert!(report.results["quote_report"].is_dependency_unmet());
    assert_eq!(report_task.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_task_does_not_stall_single_worker() {
    let (_dir, database) = temp_database().await;

    let after = StubTask::new(Behaviour::Succeed);

    let mut registry = TaskRegistry::new();
    registry
        .register("hung", StubTask::new(Behaviour::Sleep(Duration::from_secs(10))), vec![])
        .unwrap();
    registry.register("after", after.clone(), vec![]).unwrap();

    let orchestrator = orchestrator(&database, registry, settings(1, Duration::from_millis(200)));

    let started = Instant::now();
    let report = orchestrator
        .run(RunRequest::manual(None, Some(target_date())))
        .await
        .unwrap();

    // The worker slot frees at the deadline, not when the hung body returns.
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(report.results["hung"].is_timed_out());
    assert!(report.results["after"].success);
    assert_eq!(after.call_count(), 1);
}
