//! Per-section validators.

use crate::schema::SpinshareConfig;

use super::helpers::{validate_range, validate_range_u64};

/// Validate negotiation timing.
pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &SpinshareConfig) {
    validate_range(
        errors,
        "negotiation.timeout_secs",
        config.negotiation.timeout_secs,
        1,
        600,
    );
    validate_range(
        errors,
        "negotiation.sweep_interval_ms",
        config.negotiation.sweep_interval_ms,
        50,
        60_000,
    );
}

/// Every ICE server needs at least one URL with a known scheme.
pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &SpinshareConfig) {
    for (i, server) in config.ice.servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls is empty"));
        }
        for url in &server.urls {
            let known = ["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known {
                errors.push(format!("ice.servers[{i}] has unsupported url {url:?}"));
            }
        }
    }
}

/// Validate relay client and server settings.
pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &SpinshareConfig) {
    let relay = &config.relay;
    if !(relay.url.starts_with("ws://") || relay.url.starts_with("wss://")) {
        errors.push(format!("relay.url = {:?} must be a ws:// or wss:// URL", relay.url));
    }
    if relay.listen_port == 0 {
        errors.push("relay.listen_port must not be 0".to_string());
    }
    validate_range_u64(
        errors,
        "relay.reconnect_delay_secs",
        relay.reconnect_delay_secs,
        1,
        relay.max_reconnect_delay_secs.max(1),
    );
    validate_range_u64(errors, "relay.room_ttl_secs", relay.room_ttl_secs, 10, 86_400);
}
