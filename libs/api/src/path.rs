pub const METRICS: &str = "/metrics";
pub const LIVE_WS: &str = "/ws/live";
pub const LISTENER_WS: &str = "/ws/listener";
pub const BROADCASTS: &str = "/api/broadcasts";
pub const USERS: &str = "/api/users";
pub const AUTH_VERIFY: &str = "/api/auth/verify";
pub const STREAM_STATUS: &str = "/api/stream/status";

pub fn broadcast(id: &str) -> String {
    format!("/api/broadcasts/{}", id)
}

pub fn broadcast_start(id: &str) -> String {
    format!("/api/broadcasts/{}/start", id)
}

pub fn broadcast_end(id: &str) -> String {
    format!("/api/broadcasts/{}/end", id)
}

pub fn broadcast_test(id: &str) -> String {
    format!("/api/broadcasts/{}/test", id)
}

pub fn handover(id: &str) -> String {
    format!("/api/broadcasts/{}/handover", id)
}

pub fn handovers(id: &str) -> String {
    format!("/api/broadcasts/{}/handovers", id)
}

pub fn current_dj(id: &str) -> String {
    format!("/api/broadcasts/{}/current-dj", id)
}

pub fn user(username: &str) -> String {
    format!("/api/users/{}", username)
}
