//! Integration tests for the job scheduler.
//!
//! This test validates:
//! 1. Priority-first, FIFO-within-priority claim order (including randomized submissions)
//! 2. Requeue idempotence and sticky device affinity across retries
//! 3. Cost previews and completion costs are never negative
//! 4. Concurrent claimers never receive the same job twice

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use prometheus_compute_broker::config::SchedulerConfig;
use prometheus_compute_broker::core::{
    CompletionReport, JobQueue, JobScheduler, JobSpec, JobStatus, PerfEstimate, ProviderMeta,
    ProviderRegistry, ProviderSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn scheduler() -> JobScheduler {
    JobScheduler::new(SchedulerConfig::default()).expect("scheduler")
}

fn drain(s: &JobScheduler, queue: JobQueue) -> Vec<String> {
    std::iter::from_fn(|| s.claim(queue, "worker", None))
        .map(|job| job.id)
        .collect()
}

#[test]
fn test_high_priority_claimed_before_low() {
    let s = scheduler();
    s.enqueue(JobSpec::new("low").with_priority(1).with_queue("local"))
        .unwrap();
    s.enqueue(JobSpec::new("high").with_priority(5).with_queue("local"))
        .unwrap();
    assert_eq!(s.claim(JobQueue::Local, "w", None).unwrap().id, "high");
    assert_eq!(s.claim(JobQueue::Local, "w", None).unwrap().id, "low");
    assert!(s.claim(JobQueue::Local, "w", None).is_none());
}

#[test]
fn test_equal_priority_is_fifo() {
    let s = scheduler();
    for id in ["a", "b", "c"] {
        s.enqueue(JobSpec::new(id).with_priority(3)).unwrap();
    }
    assert_eq!(drain(&s, JobQueue::Local), ["a", "b", "c"]);
}

#[test]
fn test_randomized_submissions_claim_in_priority_then_submission_order() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..20 {
        let s = scheduler();
        let mut expected: Vec<(i64, usize, String)> = Vec::new();
        for n in 0..rng.random_range(1..60) {
            let priority = rng.random_range(-3..4);
            let id = format!("r{round}-{n}");
            s.enqueue(JobSpec::new(&id).with_priority(priority)).unwrap();
            expected.push((-priority, n, id));
        }
        expected.sort();
        let expected: Vec<String> = expected.into_iter().map(|(_, _, id)| id).collect();
        assert_eq!(drain(&s, JobQueue::Local), expected, "round {round}");
    }
}

#[test]
fn test_requeue_of_queued_job_changes_nothing() {
    let s = scheduler();
    s.enqueue(JobSpec::new("a").with_priority(2)).unwrap();
    s.enqueue(JobSpec::new("b").with_priority(2)).unwrap();
    let before = s.state();
    let again = s.requeue("a", Some(100)).unwrap();
    assert_eq!(again.status, JobStatus::Queued);
    assert_eq!(s.state(), before);
    assert_eq!(drain(&s, JobQueue::Local), ["a", "b"]);
}

#[test]
fn test_sticky_device_survives_many_retries() {
    let s = scheduler();
    s.enqueue(JobSpec::new("render").sticky()).unwrap();
    let first = s.claim(JobQueue::Local, "w0", Some("gpu:1")).unwrap();
    assert_eq!(first.device_id.as_deref(), Some("gpu:1"));
    for (attempt, device) in ["gpu:0", "gpu:2", "cpu"].into_iter().enumerate() {
        s.requeue("render", None).unwrap();
        let job = s.claim(JobQueue::Local, "w", Some(device)).unwrap();
        assert_eq!(job.device_id.as_deref(), Some("gpu:1"));
        assert_eq!(job.attempt as usize, attempt + 2);
    }
    let job = s.get("render").unwrap();
    assert!(job.runs.iter().all(|r| r.device_id.as_deref() == Some("gpu:1")));
}

#[test]
fn test_lifecycle_timestamps_increase() {
    let s = scheduler();
    let queued = s.enqueue(JobSpec::new("t")).unwrap();
    let running = s.claim(JobQueue::Local, "w", None).unwrap();
    let done = s.complete("t", CompletionReport::default()).unwrap();
    let started = running.started_ms.unwrap();
    let completed = done.completed_ms.unwrap();
    assert!(queued.created_ms < started);
    assert!(started < completed);
}

#[test]
fn test_remote_preview_cost_scenario() {
    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register(ProviderSpec::remote("gpu-farm").with_meta(ProviderMeta {
            cost_per_minute: Some(0.5),
            ..ProviderMeta::default()
        }))
        .unwrap();
    let s = scheduler().with_registry(registry);
    let preview = s
        .preview_cost(
            &JobSpec::new("p")
                .with_queue("remote")
                .with_provider("gpu-farm")
                .with_duration_sec(180.0),
        )
        .unwrap();
    assert!((preview.base_cost - 1.5).abs() < 1e-9);
    assert!(preview.notes.len() >= 3);
    assert_eq!(s.state().queues["remote"].len(), 0);
}

#[test]
fn test_costs_are_never_negative() {
    let mut rng = StdRng::seed_from_u64(7);
    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register(ProviderSpec::remote("weird").with_meta(ProviderMeta {
            cost_per_minute: Some(-2.0),
            egress_cost_per_gb: Some(f64::NAN),
            ingress_cost_per_gb: Some(0.1),
            vram_cost_per_gb_minute: Some(-0.5),
            ..ProviderMeta::default()
        }))
        .unwrap();
    let s = scheduler().with_registry(registry);
    for n in 0..50 {
        let mut spec = JobSpec::new(format!("c{n}"))
            .with_duration_sec(rng.random_range(0.0..3600.0))
            .with_vram_gb(rng.random_range(0.0..48.0))
            .with_transfer(rng.random_range(0..10_000_000_000), rng.random_range(0..1_000_000));
        if rng.random_bool(0.5) {
            spec = spec.with_queue("remote").with_provider("weird");
        }
        assert!(s.preview_cost(&spec).unwrap().total >= 0.0);
        s.enqueue(spec).unwrap();
        let done = s.complete(&format!("c{n}"), CompletionReport::default()).unwrap();
        assert!(done.telemetry.unwrap().cost >= 0.0);
    }
}

#[test]
fn test_failed_jobs_still_report_cost() {
    let s = scheduler();
    s.enqueue(
        JobSpec::new("f")
            .with_queue("remote")
            .with_perf(PerfEstimate::new(0.0, 0.0, 2048.0)),
    )
    .unwrap();
    s.claim(JobQueue::Remote, "w", None).unwrap();
    let failed = s.fail("f", Some("worker lost".into())).unwrap();
    let telemetry = failed.telemetry.unwrap();
    assert_eq!(failed.error.as_deref(), Some("worker lost"));
    assert!((telemetry.vram_gb - 2.0).abs() < 1e-9);
    assert!(telemetry.cost >= 0.0);
}

#[test]
fn test_unknown_ids_are_not_found() {
    let s = scheduler();
    assert!(s.requeue("nope", None).unwrap_err().is_not_found());
    assert!(s.fail("nope", None).unwrap_err().is_not_found());
    assert!(s.cancel("nope").unwrap_err().is_not_found());
}

#[test]
fn test_concurrent_claims_hand_out_each_job_once() {
    let s = Arc::new(scheduler());
    for n in 0..400 {
        s.enqueue(JobSpec::new(format!("j{n}")).with_priority(n % 5))
            .unwrap();
    }
    let handles: Vec<_> = (0..8)
        .map(|w| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let worker = format!("w{w}");
                let mut claimed = Vec::new();
                while let Some(job) = s.claim(JobQueue::Local, &worker, None) {
                    s.complete(&job.id, CompletionReport::default()).unwrap();
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();
    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().expect("worker thread") {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(s.depth(JobQueue::Local), 0);
}

#[test]
fn test_board_shows_running_and_recent_history() {
    let s = scheduler();
    for id in ["a", "b", "c"] {
        s.enqueue(JobSpec::new(id)).unwrap();
    }
    s.claim(JobQueue::Local, "w", None).unwrap();
    s.claim(JobQueue::Local, "w", None).unwrap();
    s.complete(
        "a",
        CompletionReport {
            duration_sec: Some(12.0),
            ..CompletionReport::default()
        },
    )
    .unwrap();
    let board = s.board(Some(10));
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].id, "a");
    assert!((board[0].duration_sec - 12.0).abs() < 1e-9);
    assert!(board[0].cost.is_some());
    assert!(board[1].end_ms.is_none());
}
