//! Per-variant processing rules. Pure policy: codec work happens before an
//! event reaches `process`, and all locking lives in the registry.
//!
//! Routing summary: reports travel app → third parties and resolve peers via
//! the envelope's `targetId` (the app's own address in that direction);
//! commands travel third party → app and resolve peers via `clientId` (the
//! sender's own address). When peer resolution fails, the 403 error report is
//! addressed to the envelope's `targetId` slot, not the sender — preserved
//! from the upstream protocol, quirk and all.

use std::sync::Arc;

use pulselink_core::{ClientRole, Event, RelayError, SecureId};

use crate::registry::ClientRegistry;

pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Apply the processing rule for one inbound event.
    ///
    /// Per-message failures (unknown peers, undeliverable forwards) are
    /// logged and absorbed; only programmer errors surface to the caller.
    pub fn process(&self, event: &Event) -> Result<(), RelayError> {
        match event {
            Event::Heartbeat { client_id, target_id } => {
                tracing::info!(client_id = %client_id, target_id = %target_id, "heartbeat");
                self.registry.touch(client_id);
                Ok(())
            }
            Event::BindToServer { .. } => Err(RelayError::outbound_only("BindToServer")),
            Event::BindResult { .. } => Err(RelayError::outbound_only("BindResult")),
            Event::BindAppToThirdParty { client_id, target_id } => {
                self.process_bind(client_id, target_id);
                Ok(())
            }
            Event::Break { client_id, target_id } => {
                tracing::warn!(client_id = %client_id, target_id = %target_id, "received break, dropped");
                Ok(())
            }
            Event::Error {
                client_id,
                target_id,
                message,
            } => {
                tracing::warn!(
                    client_id = %client_id,
                    target_id = %target_id,
                    message = %message,
                    "received error report, dropped"
                );
                Ok(())
            }
            Event::ReportStrength { client_id, target_id, .. }
            | Event::ReportFeedback { client_id, target_id, .. } => {
                self.forward(event, target_id, client_id, target_id, true);
                Ok(())
            }
            Event::AdjustStrength { client_id, target_id, .. }
            | Event::ExecutePulse { client_id, target_id, .. }
            | Event::StopPulse { client_id, target_id, .. } => {
                self.forward(event, client_id, client_id, target_id, false);
                Ok(())
            }
        }
    }

    /// Pair the sender (a third party) with the app named in `targetId`, then
    /// report the outcome: always towards the app, and additionally to the
    /// sender when it is push-reachable. Request-response senders learn the
    /// result synchronously from their HTTP response instead.
    fn process_bind(&self, third_party_id: &SecureId, app_id: &SecureId) {
        let code = match self.registry.bind(app_id, third_party_id) {
            Ok(()) => {
                tracing::info!(app = %app_id, third_party = %third_party_id, "sessions bound");
                200
            }
            Err(err) => {
                tracing::warn!(
                    app = %app_id,
                    third_party = %third_party_id,
                    error = %err,
                    "bind failed"
                );
                400
            }
        };
        let result = Event::BindResult {
            client_id: third_party_id.clone(),
            target_id: app_id.clone(),
            code,
        };
        if let Err(err) = self.registry.send(app_id, &result) {
            tracing::warn!(app = %app_id, error = %err, "bind result undeliverable to app");
        }
        match self.registry.lookup_by_secure(third_party_id) {
            Ok(peer) if peer.role == ClientRole::ThirdPartyStreaming => {
                if let Err(err) = self.registry.send(third_party_id, &result) {
                    tracing::warn!(
                        third_party = %third_party_id,
                        error = %err,
                        "bind result undeliverable to sender"
                    );
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(third_party = %third_party_id, error = %err, "bind sender vanished");
            }
        }
    }

    /// Forward the event to the peers bound to `origin`. With
    /// `streaming_only`, request-response peers are skipped — they are not
    /// push-reachable.
    fn forward(
        &self,
        event: &Event,
        origin: &SecureId,
        client_id: &SecureId,
        target_id: &SecureId,
        streaming_only: bool,
    ) {
        let peers = match self.registry.peers_of(origin) {
            Ok(peers) => peers,
            Err(err) => {
                tracing::warn!(
                    origin = %origin,
                    event = event.event_type(),
                    error = %err,
                    "dropping event from unresolved origin"
                );
                self.fail_with_code(client_id, target_id, 403);
                return;
            }
        };
        for peer in peers {
            if streaming_only && peer.role != ClientRole::ThirdPartyStreaming {
                continue;
            }
            tracing::info!(
                event = event.event_type(),
                origin = %origin,
                peer = %peer.secure_id,
                "forwarding event"
            );
            if let Err(err) = self.registry.send(&peer.secure_id, event) {
                tracing::warn!(
                    event = event.event_type(),
                    peer = %peer.secure_id,
                    error = %err,
                    "failed to forward event"
                );
            }
        }
    }

    /// Deliver a numeric error report into the envelope's `targetId` slot.
    fn fail_with_code(&self, client_id: &SecureId, target_id: &SecureId, code: u16) {
        let event = Event::Error {
            client_id: client_id.clone(),
            target_id: target_id.clone(),
            message: code.to_string(),
        };
        if let Err(err) = self.registry.send(target_id, &event) {
            tracing::warn!(target = %target_id, error = %err, "error report undeliverable");
        }
    }
}
