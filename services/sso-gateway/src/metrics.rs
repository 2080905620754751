//! Prometheus metrics exposition
//!
//! - `sso_login_attempts_total` (counter): label `outcome`
//! - `sso_callback_duration_seconds` (histogram): label `outcome`
//! - `sso_admin_saves_total` (counter): label `result`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const CALLBACK_DURATION: &str = "sso_callback_duration_seconds";

/// Buckets from 10ms to the longest plausible provider round trip (three
/// back-channel calls, each bounded by the provider timeout).
const CALLBACK_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(CALLBACK_DURATION.to_string()), CALLBACK_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The callback duration renders as a histogram (`_bucket` lines) rather
/// than the default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one pass through the login flow.
///
/// Outcomes: `redirected`, `picker`, `bypassed`, `resolved`, `unchanged`,
/// `guard_redirected`, `guard_passed`, and `rejected_<reason>`.
pub fn record_login(outcome: &str) {
    metrics::counter!("sso_login_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how long a callback took end to end.
pub fn record_callback_duration(outcome: &str, duration_secs: f64) {
    metrics::histogram!(CALLBACK_DURATION, "outcome" => outcome.to_string()).record(duration_secs);
}

/// Record an admin settings write.
pub fn record_admin_save(result: &str) {
    metrics::counter!("sso_admin_saves_total", "result" => result.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_login("redirected");
        record_callback_duration("resolved", 0.2);
        record_admin_save("saved");
    }

    /// Isolated recorder/handle pair; only one global recorder may exist
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn login_outcomes_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_login("redirected");
        record_login("rejected_unknown_email");

        let output = handle.render();
        assert!(output.contains("sso_login_attempts_total"));
        assert!(output.contains("outcome=\"redirected\""));
        assert!(output.contains("outcome=\"rejected_unknown_email\""));
    }

    #[test]
    fn admin_saves_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_admin_save("saved");
        record_admin_save("persist_failed");

        let output = handle.render();
        assert!(output.contains("sso_admin_saves_total"));
        assert!(output.contains("result=\"saved\""));
        assert!(output.contains("result=\"persist_failed\""));
    }

    #[test]
    fn callback_duration_renders_histogram_buckets() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_callback_duration("resolved", 0.003);

        let output = handle.render();
        assert!(output.contains("sso_callback_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.01\""));
        assert!(output.contains("le=\"30\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
