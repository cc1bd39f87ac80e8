//! Tests for utility functions

use prometheus_compute_broker::util::{generate_job_id, init_tracing, monotonic_ms, ms_to_secs, now_ms, slugify};

#[test]
fn test_monotonic_clock_strictly_increases() {
    let mut last = monotonic_ms();
    for _ in 0..1000 {
        let next = monotonic_ms();
        assert!(next > last);
        last = next;
    }
}

#[test]
fn test_monotonic_clock_tracks_wall_clock() {
    let wall = now_ms();
    let mono = monotonic_ms();
    assert!(mono >= wall);
}

#[test]
fn test_ms_to_secs() {
    assert!((ms_to_secs(1500) - 1.5).abs() < f64::EPSILON);
}

#[test]
fn test_slugify_provider_names() {
    assert_eq!(slugify("Vast.ai RTX 4090"), "vast-ai-rtx-4090");
    assert_eq!(slugify("ssh://gpu-box"), "ssh-gpu-box");
}

#[test]
fn test_generated_job_ids() {
    let id = generate_job_id();
    assert!(id.starts_with("job-"));
    assert_eq!(id.len(), "job-".len() + 32);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}
