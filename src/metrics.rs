use tracing::trace;

// Counters and timings go to the installed `metrics` recorder (Prometheus in
// the server) and are mirrored as trace events.

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("snapsell_requests_total", "route" => route).increment(1);
    trace!(
        target = "snapsell.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    ::metrics::histogram!("snapsell_stage_duration_ms", "stage" => stage)
        .record(elapsed_ms as f64);
    trace!(
        target = "snapsell.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn job_outcome(outcome: &'static str, attempts: u32) {
    ::metrics::counter!("snapsell_generation_jobs_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("snapsell_generation_poll_attempts").record(f64::from(attempts));
    trace!(
        target = "snapsell.metrics",
        outcome = outcome,
        attempts = attempts,
        "generation_job_total_inc"
    );
}
