use ::metrics::{counter, gauge};

use crate::error::ControlError;

pub fn record_transition(op: &'static str) {
    counter!("beach_helm_control_transitions_total", 1, "op" => op);
}

pub fn record_denied(op: &'static str, error: &ControlError) {
    counter!(
        "beach_helm_control_denied_total",
        1,
        "op" => op,
        "reason" => error.metric_label()
    );
}

pub fn record_dropped(event: &'static str) {
    counter!("beach_helm_events_dropped_total", 1, "event" => event);
}

pub fn record_message(kind: &'static str) {
    counter!("beach_helm_messages_total", 1, "kind" => kind);
}

pub fn record_sessions_active(active: usize) {
    gauge!("beach_helm_sessions_active", active as f64);
}
