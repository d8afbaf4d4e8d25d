use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use api::event::{CurrentDjEvent, HandoverEvent, CURRENT_DJ_KIND, HANDOVER_KIND};
use api::response::{BroadcastStatus, HandoverRecord, Role};

use crate::broadcast::BroadcastRegistry;
use crate::error::AppError;
use crate::hook::Event;
use crate::metrics;
use crate::result::Result;
use crate::user::UserDirectory;

/// Reassigns which DJ is on air for a live broadcast, with an
/// append-only audit trail. The record append and the ownership
/// pointer update commit under one write lock.
pub struct HandoverCoordinator {
    broadcasts: Arc<BroadcastRegistry>,
    users: Arc<UserDirectory>,
    event_sender: broadcast::Sender<Event>,
}

impl HandoverCoordinator {
    pub fn new(
        broadcasts: Arc<BroadcastRegistry>,
        users: Arc<UserDirectory>,
        event_sender: broadcast::Sender<Event>,
    ) -> Self {
        HandoverCoordinator {
            broadcasts,
            users,
            event_sender,
        }
    }

    pub fn initiate(
        &self,
        broadcast_id: &str,
        new_dj: &str,
        initiator: &str,
        initiator_role: Role,
        reason: Option<String>,
    ) -> Result<HandoverRecord> {
        let broadcast = self.broadcasts.get(broadcast_id)?;

        let record = {
            let mut state = broadcast.state.write().unwrap();
            if state.status != BroadcastStatus::Live {
                return Err(AppError::invalid_state(
                    "broadcast must be LIVE to initiate handover",
                ));
            }

            let target = self
                .users
                .get(new_dj)
                .ok_or_else(|| AppError::not_found("new DJ not found"))?;
            if target.role != Role::Dj {
                return Err(AppError::validation("new DJ must have the DJ role"));
            }
            if !target.active {
                return Err(AppError::validation("new DJ must be an active account"));
            }

            // Directory role wins over the credential's claim when the
            // initiator is a known account.
            let initiator_role = self.users.role(initiator).unwrap_or(initiator_role);

            let outgoing = state.current_dj.clone().or_else(|| state.started_by.clone());

            let permitted = matches!(initiator_role, Role::Admin | Role::Moderator)
                || outgoing.as_deref() == Some(initiator);
            if !permitted {
                return Err(AppError::permission(
                    "initiator must be an admin, a moderator, or the current on-air DJ",
                ));
            }

            if outgoing.as_deref() == Some(new_dj) {
                return Err(AppError::validation(
                    "new DJ cannot be the same as the current on-air DJ",
                ));
            }

            let now = Utc::now();

            // The outgoing DJ's on-air time runs from their most
            // recent assignment, or from the broadcast's actual
            // start if they were never assigned by handover.
            let duration_seconds = match (&outgoing, state.actual_start) {
                (Some(outgoing_dj), Some(actual_start)) => {
                    let period_start = state
                        .history
                        .iter()
                        .rev()
                        .find(|prior| prior.new_dj == *outgoing_dj)
                        .map(|prior| prior.handover_time)
                        .unwrap_or(actual_start);
                    Some((now - period_start).num_seconds())
                }
                _ => None,
            };

            let record = HandoverRecord {
                broadcast_id: broadcast_id.to_string(),
                previous_dj: outgoing,
                new_dj: new_dj.to_string(),
                handover_time: now,
                initiated_by: initiator.to_string(),
                reason,
                duration_seconds,
            };

            state.history.push(record.clone());
            state.current_dj = Some(new_dj.to_string());
            record
        };

        metrics::HANDOVERS.inc();
        info!(
            "handover on broadcast {} : {} -> {}",
            broadcast_id,
            record.previous_dj.as_deref().unwrap_or("none"),
            record.new_dj
        );

        let _ = self.event_sender.send(Event::Handover(HandoverEvent {
            kind: HANDOVER_KIND.to_string(),
            broadcast_id: broadcast_id.to_string(),
            handover: record.clone(),
        }));
        let _ = self.event_sender.send(Event::CurrentDj(CurrentDjEvent {
            kind: CURRENT_DJ_KIND.to_string(),
            broadcast_id: broadcast_id.to_string(),
            current_dj: record.new_dj.clone(),
        }));

        Ok(record)
    }

    /// Current on-air DJ, falling back to whoever started the
    /// broadcast. Never errors for a live broadcast with no DJ.
    pub fn current_active_dj(&self, broadcast_id: &str) -> Result<Option<String>> {
        let broadcast = self.broadcasts.get(broadcast_id)?;
        let state = broadcast.state.read().unwrap();
        Ok(state.current_dj.clone().or_else(|| state.started_by.clone()))
    }

    /// All records for the broadcast, ascending by handover time.
    /// Duration computation depends on this ordering.
    pub fn history(&self, broadcast_id: &str) -> Result<Vec<HandoverRecord>> {
        let broadcast = self.broadcasts.get(broadcast_id)?;
        let state = broadcast.state.read().unwrap();
        Ok(state.history.clone())
    }
}
