use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref RELAY_SESSIONS: IntGauge =
        IntGauge::new("relay_sessions", "active audio relay sessions").unwrap();
    pub static ref LISTENER_SESSIONS: IntGauge =
        IntGauge::new("listener_sessions", "connected listener sessions").unwrap();
    pub static ref HANDOVERS: IntCounter =
        IntCounter::new("handovers", "committed on-air handovers").unwrap();
    pub static ref RATE_LIMITED: IntCounter =
        IntCounter::new("rate_limited", "requests rejected by rate limiting").unwrap();
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("liveradio".to_string()), None).unwrap();
        registry.register(Box::new(RELAY_SESSIONS.clone())).unwrap();
        registry
            .register(Box::new(LISTENER_SESSIONS.clone()))
            .unwrap();
        registry.register(Box::new(HANDOVERS.clone())).unwrap();
        registry.register(Box::new(RATE_LIMITED.clone())).unwrap();
        registry
    };
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}
