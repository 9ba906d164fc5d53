pub fn default_enabled() -> bool {
    true
}

pub fn default_coordinator_name() -> String {
    "matchkeeper".to_string()
}

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_request_timeout_ms() -> u64 {
    5000
}

pub fn default_poll_wait_seconds() -> u64 {
    25
}

pub fn default_poll_interval_seconds() -> u64 {
    5
}

pub fn default_scan_concurrency() -> usize {
    16
}

pub fn default_max_attempts() -> u32 {
    5
}

pub fn default_base_delay_ms() -> u64 {
    500
}

pub fn default_max_delay_ms() -> u64 {
    8000
}

pub fn default_attempt_timeout_ms() -> u64 {
    10_000
}

pub fn default_failure_cooldown_ms() -> u64 {
    0
}

pub fn default_max_failure_cooldown_ms() -> u64 {
    60_000
}

pub fn default_resubscribe_delay_ms() -> u64 {
    1000
}

pub fn default_max_resubscribe_delay_ms() -> u64 {
    30_000
}

pub fn default_retired_capacity() -> usize {
    10_000
}

pub fn default_drain_timeout_seconds() -> u64 {
    30
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}

pub fn default_server_port() -> u16 {
    8080
}

pub fn default_round_duration_seconds() -> u64 {
    30
}

pub fn default_max_rounds() -> u64 {
    5
}

pub fn default_simulated_matches() -> usize {
    3
}
