use serde::{Deserialize, Serialize};

use crate::response::HandoverRecord;

/// Aggregate status snapshot published on the listener status topic.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub is_live: bool,
    pub listener_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_listener_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
    pub timestamp: i64,
}

pub const STATUS_KIND: &str = "STREAM_STATUS";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub healthy: bool,
    pub server_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HandoverEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub broadcast_id: String,
    pub handover: HandoverRecord,
}

pub const HANDOVER_KIND: &str = "DJ_HANDOVER";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CurrentDjEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub broadcast_id: String,
    pub current_dj: String,
}

pub const CURRENT_DJ_KIND: &str = "CURRENT_DJ_UPDATE";
