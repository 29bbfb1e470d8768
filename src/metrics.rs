use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Opts,
};

lazy_static! {
    // Realtime pipeline
    pub static ref EVENTS_RECEIVED: Counter = register_counter!(Opts::new(
        "taskdesk_events_received_total",
        "Total number of notification events received from the realtime endpoint"
    ))
    .unwrap();

    pub static ref DUPLICATES_DROPPED: CounterVec = register_counter_vec!(
        Opts::new(
            "taskdesk_duplicates_dropped_total",
            "Inbound notifications dropped as duplicates, by guard"
        ),
        &["guard"]
    )
    .unwrap();

    pub static ref NOTIFICATIONS_ACCEPTED: Counter = register_counter!(Opts::new(
        "taskdesk_notifications_accepted_total",
        "Total number of notifications accepted into the feed"
    ))
    .unwrap();

    pub static ref RECONNECT_ATTEMPTS: Counter = register_counter!(Opts::new(
        "taskdesk_reconnect_attempts_total",
        "Total number of realtime reconnection attempts"
    ))
    .unwrap();

    // Delivery
    pub static ref TOASTS_SHOWN: Counter = register_counter!(Opts::new(
        "taskdesk_toasts_shown_total",
        "Total number of toasts queued for display"
    ))
    .unwrap();

    pub static ref TOASTS_EVICTED: Counter = register_counter!(Opts::new(
        "taskdesk_toasts_evicted_total",
        "Toasts pushed out early because the stack was full"
    ))
    .unwrap();

    pub static ref SOUNDS_PLAYED: Counter = register_counter!(Opts::new(
        "taskdesk_sounds_played_total",
        "Total number of audio cues started"
    ))
    .unwrap();

    pub static ref DESKTOP_ALERTS_SHOWN: Counter = register_counter!(Opts::new(
        "taskdesk_desktop_alerts_shown_total",
        "Total number of desktop notifications shown"
    ))
    .unwrap();
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("Error encoding metrics: {}", e);
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => metrics,
        Err(e) => format!("Error converting metrics to string: {}", e),
    }
}
