//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# spinshare configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[[ice.servers]]
urls = ["stun:stun.l.google.com:19302"]

[[ice.servers]]
urls = ["stun:stun1.l.google.com:19302"]

# TURN example:
# [[ice.servers]]
# urls = ["turn:turn.example.com:3478"]
# username = "user"
# credential = "secret"

[negotiation]
# timeout_secs = 30        # 1-600, stalled offers/answers fail after this
# sweep_interval_ms = 1000 # 50-60000

[capture]
# quality = "medium"        # low, medium, high, ultra
# display_surface = "monitor"  # monitor, window, browser
# audio = false

[relay]
# url = "ws://localhost:3003/ws"
# listen_port = 3003
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30
# room_ttl_secs = 300

[logging]
# level = "info"            # debug, info, warning, error
"##
    .to_string()
}
