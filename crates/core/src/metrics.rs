//! Metric names and descriptions.
//!
//! Every crate records through the `metrics` facade using these constants;
//! the daemon installs the Prometheus recorder and calls [`describe_all`].
//!
//! Naming: prefix `logferry_`, then the component (`output_`, `input_`,
//! `connection_`), suffix `_total` for counters.
//!
//! ```ignore
//! metrics::counter!(METRIC_OUTPUT_MESSAGES_FLUSHED_TOTAL, LABEL_OUTPUT => kind).increment(n);
//! ```

/// Output kind label key (`file`, `webhook`, ...)
pub const LABEL_OUTPUT: &str = "output";

/// Input kind label key (`udp`, `tcp`)
pub const LABEL_INPUT: &str = "input";

/// Drop reason label key (`buffer_full`, `closed`, `decode`, `evaluate`)
pub const LABEL_REASON: &str = "reason";

// ─── Output handler ──────────────────────────────────────────────────

/// Messages accepted into an output buffer (counter)
pub const OUTPUT_MESSAGES_ENQUEUED_TOTAL: &str = "logferry_output_messages_enqueued_total";

/// Messages dropped before sending (counter, label: reason)
pub const OUTPUT_MESSAGES_DROPPED_TOTAL: &str = "logferry_output_messages_dropped_total";

/// Messages handed to a successful send call (counter)
pub const OUTPUT_MESSAGES_FLUSHED_TOTAL: &str = "logferry_output_messages_flushed_total";

/// Destination groups whose send failed (counter)
pub const OUTPUT_SEND_FAILURES_TOTAL: &str = "logferry_output_send_failures_total";

/// Messages currently buffered (gauge)
pub const OUTPUT_BUFFER_SIZE: &str = "logferry_output_buffer_size";

/// Flush duration (histogram, seconds)
pub const OUTPUT_FLUSH_DURATION_SECONDS: &str = "logferry_output_flush_duration_seconds";

// ─── Connection guard ────────────────────────────────────────────────

/// Connections established (counter)
pub const CONNECTION_CONNECTS_TOTAL: &str = "logferry_connection_connects_total";

/// Failed health probes (counter)
pub const CONNECTION_PROBE_FAILURES_TOTAL: &str = "logferry_connection_probe_failures_total";

/// Panics caught at the fault-isolation boundary (counter)
pub const CONNECTION_FAULTS_TOTAL: &str = "logferry_connection_faults_total";

/// Handles discarded after an error (counter)
pub const CONNECTION_INVALIDATIONS_TOTAL: &str = "logferry_connection_invalidations_total";

// ─── Inputs ──────────────────────────────────────────────────────────

/// Messages received by sources (counter)
pub const INPUT_MESSAGES_RECEIVED_TOTAL: &str = "logferry_input_messages_received_total";

/// Oversized or unreadable frames discarded by sources (counter)
pub const INPUT_FRAMES_DISCARDED_TOTAL: &str = "logferry_input_frames_discarded_total";

// ─── Daemon ──────────────────────────────────────────────────────────

/// Running output instances (gauge)
pub const DAEMON_OUTPUTS_RUNNING: &str = "logferry_daemon_outputs_running";

/// Running input instances (gauge)
pub const DAEMON_INPUTS_RUNNING: &str = "logferry_daemon_inputs_running";

/// Flush duration buckets (seconds), 100us to 10s.
pub const FLUSH_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

/// Registers HELP text for every metric.
///
/// Call once after the global recorder is installed.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        OUTPUT_MESSAGES_ENQUEUED_TOTAL,
        "Messages accepted into an output buffer"
    );
    describe_counter!(
        OUTPUT_MESSAGES_DROPPED_TOTAL,
        "Messages dropped before sending, by reason"
    );
    describe_counter!(
        OUTPUT_MESSAGES_FLUSHED_TOTAL,
        "Messages delivered to a successful send call"
    );
    describe_counter!(
        OUTPUT_SEND_FAILURES_TOTAL,
        "Destination groups whose send failed"
    );
    describe_gauge!(OUTPUT_BUFFER_SIZE, "Messages currently buffered per output");
    describe_histogram!(
        OUTPUT_FLUSH_DURATION_SECONDS,
        "Time to route and send one chunk in seconds"
    );

    describe_counter!(CONNECTION_CONNECTS_TOTAL, "Backend connections established");
    describe_counter!(
        CONNECTION_PROBE_FAILURES_TOTAL,
        "Backend health probes that failed"
    );
    describe_counter!(
        CONNECTION_FAULTS_TOTAL,
        "Unexpected faults caught around connection operations"
    );
    describe_counter!(
        CONNECTION_INVALIDATIONS_TOTAL,
        "Connection handles discarded after an error"
    );

    describe_counter!(INPUT_MESSAGES_RECEIVED_TOTAL, "Messages received by sources");
    describe_counter!(
        INPUT_FRAMES_DISCARDED_TOTAL,
        "Frames discarded by sources (oversized or unreadable)"
    );

    describe_gauge!(DAEMON_OUTPUTS_RUNNING, "Output instances currently running");
    describe_gauge!(DAEMON_INPUTS_RUNNING, "Input instances currently running");
}
