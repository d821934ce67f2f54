//! Typed event model and wire codec.
//!
//! The transport carries a flat four-string envelope ([`RawEvent`]); several
//! variants pack structured payloads into the envelope's `message` field
//! using small ASCII/hex formats. Decoding selects the variant from the
//! `(type, message)` pair, then parses the payload; encoding is the exact
//! inverse. Not every variant travels both directions: decoding an
//! outbound-only variant (or encoding an inbound-only one) fails with
//! [`RelayError::WrongDirection`].

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::ids::SecureId;

const STRENGTH_PREFIX: &str = "strength-";
const PULSE_PREFIX: &str = "pulse-";
const CLEAR_PREFIX: &str = "clear-";
const FEEDBACK_PREFIX: &str = "feedback-";

/// Envelope `type` discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Heartbeat,
    Bind,
    Msg,
    Break,
    Error,
}

/// Flat wire envelope: one JSON object per text frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "clientId", default)]
    pub client_id: String,
    #[serde(rename = "targetId", default)]
    pub target_id: String,
    #[serde(default)]
    pub message: String,
}

impl RawEvent {
    pub fn from_json(data: &str) -> Result<Self, RelayError> {
        serde_json::from_str(data)
            .map_err(|e| RelayError::DecodeFailed(format!("malformed envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::SerializationFailed(e.to_string()))
    }
}

/// Output channel selector. `Unspecified` (0) targets both channels on
/// devices that support it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Unspecified,
    A,
    B,
}

impl Channel {
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::A => 1,
            Self::B => 2,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = RelayError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::A),
            2 => Ok(Self::B),
            other => Err(RelayError::decode(format!("channel {other} out of range"))),
        }
    }
}

/// How an `AdjustStrength` value is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjustAction {
    Decrease,
    Increase,
    Set,
}

impl AdjustAction {
    pub fn code(self) -> u8 {
        match self {
            Self::Decrease => 0,
            Self::Increase => 1,
            Self::Set => 2,
        }
    }
}

impl TryFrom<u8> for AdjustAction {
    type Error = RelayError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Decrease),
            1 => Ok(Self::Increase),
            2 => Ok(Self::Set),
            other => Err(RelayError::decode(format!("adjust action {other} out of range"))),
        }
    }
}

/// App-side strength snapshot: current value and configured limit per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrengthReport {
    pub channel_a: u32,
    pub channel_b: u32,
    pub limit_a: u32,
    pub limit_b: u32,
}

/// Third-party request to change a channel's strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrengthAdjustment {
    pub channel: Channel,
    pub action: AdjustAction,
    pub value: u32,
}

/// One 8-byte pulse unit: four frequency bytes followed by four strength
/// bytes, transported as hex inside a JSON array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseSequence {
    pub frequency: [u8; 4],
    pub strength: [u8; 4],
}

impl PulseSequence {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let mut frequency = [0u8; 4];
        let mut strength = [0u8; 4];
        frequency.copy_from_slice(&bytes[..4]);
        strength.copy_from_slice(&bytes[4..]);
        Self { frequency, strength }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.frequency);
        bytes[4..].copy_from_slice(&self.strength);
        bytes
    }
}

/// Physical feedback button, channel A row then channel B row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackButton {
    A1,
    A2,
    A3,
    A4,
    A5,
    B1,
    B2,
    B3,
    B4,
    B5,
}

impl FeedbackButton {
    pub fn index(self) -> u8 {
        match self {
            Self::A1 => 0,
            Self::A2 => 1,
            Self::A3 => 2,
            Self::A4 => 3,
            Self::A5 => 4,
            Self::B1 => 5,
            Self::B2 => 6,
            Self::B3 => 7,
            Self::B4 => 8,
            Self::B5 => 9,
        }
    }
}

impl TryFrom<u8> for FeedbackButton {
    type Error = RelayError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::A1),
            1 => Ok(Self::A2),
            2 => Ok(Self::A3),
            3 => Ok(Self::A4),
            4 => Ok(Self::A5),
            5 => Ok(Self::B1),
            6 => Ok(Self::B2),
            7 => Ok(Self::B3),
            8 => Ok(Self::B4),
            9 => Ok(Self::B5),
            other => Err(RelayError::decode(format!("feedback button {other} out of range"))),
        }
    }
}

/// The closed family of relay events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Heartbeat {
        client_id: SecureId,
        target_id: SecureId,
    },
    /// Outbound only: the relay announces a session's own address.
    BindToServer { client_id: SecureId },
    /// Inbound only: a third party asks to be paired with an app.
    BindAppToThirdParty {
        client_id: SecureId,
        target_id: SecureId,
    },
    /// Outbound only: result of a pairing attempt (200 success, 400 failure).
    BindResult {
        client_id: SecureId,
        target_id: SecureId,
        code: u16,
    },
    Break {
        client_id: SecureId,
        target_id: SecureId,
    },
    Error {
        client_id: SecureId,
        target_id: SecureId,
        message: String,
    },
    ReportStrength {
        client_id: SecureId,
        target_id: SecureId,
        report: StrengthReport,
    },
    AdjustStrength {
        client_id: SecureId,
        target_id: SecureId,
        adjust: StrengthAdjustment,
    },
    ExecutePulse {
        client_id: SecureId,
        target_id: SecureId,
        channel: Channel,
        sequences: Vec<PulseSequence>,
    },
    StopPulse {
        client_id: SecureId,
        target_id: SecureId,
        channel: Channel,
    },
    ReportFeedback {
        client_id: SecureId,
        target_id: SecureId,
        button: FeedbackButton,
    },
}

impl Event {
    /// Select and parse the typed variant for an envelope.
    pub fn decode(raw: &RawEvent) -> Result<Self, RelayError> {
        let client_id = SecureId::from_raw(raw.client_id.clone());
        let target_id = SecureId::from_raw(raw.target_id.clone());
        match raw.kind {
            EventKind::Heartbeat => Ok(Self::Heartbeat { client_id, target_id }),
            EventKind::Bind => match raw.message.as_str() {
                "targetId" => Err(RelayError::outbound_only("BindToServer")),
                "DGLAB" => Ok(Self::BindAppToThirdParty { client_id, target_id }),
                m if !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()) => {
                    Err(RelayError::outbound_only("BindResult"))
                }
                m => Err(RelayError::decode(format!("unknown bind message {m:?}"))),
            },
            EventKind::Break => Ok(Self::Break { client_id, target_id }),
            EventKind::Error => Ok(Self::Error {
                client_id,
                target_id,
                message: raw.message.clone(),
            }),
            EventKind::Msg => Self::decode_msg(&raw.message, client_id, target_id),
        }
    }

    fn decode_msg(
        message: &str,
        client_id: SecureId,
        target_id: SecureId,
    ) -> Result<Self, RelayError> {
        if let Some(payload) = message.strip_prefix(STRENGTH_PREFIX) {
            let fields: Vec<&str> = payload.split('+').collect();
            match fields.len() {
                3 => Ok(Self::AdjustStrength {
                    client_id,
                    target_id,
                    adjust: StrengthAdjustment {
                        channel: Channel::try_from(parse_u8(fields[0], "channel")?)?,
                        action: AdjustAction::try_from(parse_u8(fields[1], "adjust action")?)?,
                        value: parse_u32(fields[2], "strength value")?,
                    },
                }),
                4 => Ok(Self::ReportStrength {
                    client_id,
                    target_id,
                    report: StrengthReport {
                        channel_a: parse_u32(fields[0], "channel A value")?,
                        channel_b: parse_u32(fields[1], "channel B value")?,
                        limit_a: parse_u32(fields[2], "channel A limit")?,
                        limit_b: parse_u32(fields[3], "channel B limit")?,
                    },
                }),
                n => Err(RelayError::decode(format!(
                    "strength payload has {n} fields, expected 3 or 4"
                ))),
            }
        } else if let Some(payload) = message.strip_prefix(PULSE_PREFIX) {
            Self::decode_pulse(payload, client_id, target_id)
        } else if let Some(payload) = message.strip_prefix(CLEAR_PREFIX) {
            Ok(Self::StopPulse {
                client_id,
                target_id,
                channel: Channel::try_from(parse_u8(payload, "channel")?)?,
            })
        } else if let Some(payload) = message.strip_prefix(FEEDBACK_PREFIX) {
            Ok(Self::ReportFeedback {
                client_id,
                target_id,
                button: FeedbackButton::try_from(parse_u8(payload, "feedback button")?)?,
            })
        } else if bare_pulse_form(message) {
            // Emitters produce the unprefixed `<channel>:<json>` form; accept
            // it inbound as well so forwarded pulses round-trip.
            Self::decode_pulse(message, client_id, target_id)
        } else {
            Err(RelayError::decode(format!("unknown message payload {message:?}")))
        }
    }

    fn decode_pulse(
        payload: &str,
        client_id: SecureId,
        target_id: SecureId,
    ) -> Result<Self, RelayError> {
        let (channel, hexes) = payload
            .split_once(':')
            .ok_or_else(|| RelayError::decode("pulse payload missing sequence separator"))?;
        let channel = Channel::try_from(parse_u8(channel, "channel")?)?;
        let hexes: Vec<String> = serde_json::from_str(hexes)
            .map_err(|e| RelayError::decode(format!("pulse sequences are not a JSON array: {e}")))?;
        let mut sequences = Vec::with_capacity(hexes.len());
        for h in &hexes {
            let bytes = hex::decode(h)
                .map_err(|e| RelayError::decode(format!("pulse sequence is not hex: {e}")))?;
            let bytes: [u8; 8] = bytes.try_into().map_err(|b: Vec<u8>| {
                RelayError::decode(format!("pulse sequence is {} bytes, expected 8", b.len()))
            })?;
            sequences.push(PulseSequence::from_bytes(bytes));
        }
        Ok(Self::ExecutePulse {
            client_id,
            target_id,
            channel,
            sequences,
        })
    }

    /// Serialize the variant back into an envelope. Inverse of [`decode`].
    pub fn encode(&self) -> Result<RawEvent, RelayError> {
        match self {
            Self::Heartbeat { client_id, target_id } => Ok(envelope(
                EventKind::Heartbeat,
                client_id,
                target_id.as_str(),
                String::new(),
            )),
            Self::BindToServer { client_id } => Ok(envelope(
                EventKind::Bind,
                client_id,
                "",
                "targetId".to_owned(),
            )),
            Self::BindAppToThirdParty { .. } => {
                Err(RelayError::inbound_only("BindAppToThirdParty"))
            }
            Self::BindResult {
                client_id,
                target_id,
                code,
            } => Ok(envelope(
                EventKind::Bind,
                client_id,
                target_id.as_str(),
                code.to_string(),
            )),
            Self::Break { client_id, target_id } => Ok(envelope(
                EventKind::Break,
                client_id,
                target_id.as_str(),
                "209".to_owned(),
            )),
            Self::Error {
                client_id,
                target_id,
                message,
            } => Ok(envelope(
                EventKind::Error,
                client_id,
                target_id.as_str(),
                message.clone(),
            )),
            Self::ReportStrength {
                client_id,
                target_id,
                report,
            } => Ok(envelope(
                EventKind::Msg,
                client_id,
                target_id.as_str(),
                format!(
                    "{STRENGTH_PREFIX}{}+{}+{}+{}",
                    report.channel_a, report.channel_b, report.limit_a, report.limit_b
                ),
            )),
            Self::AdjustStrength {
                client_id,
                target_id,
                adjust,
            } => Ok(envelope(
                EventKind::Msg,
                client_id,
                target_id.as_str(),
                format!(
                    "{STRENGTH_PREFIX}{}+{}+{}",
                    adjust.channel.code(),
                    adjust.action.code(),
                    adjust.value
                ),
            )),
            Self::ExecutePulse {
                client_id,
                target_id,
                channel,
                sequences,
            } => {
                let hexes: Vec<String> = sequences
                    .iter()
                    .map(|s| hex::encode(s.to_bytes()))
                    .collect();
                let hexes = serde_json::to_string(&hexes)
                    .map_err(|e| RelayError::SerializationFailed(e.to_string()))?;
                Ok(envelope(
                    EventKind::Msg,
                    client_id,
                    target_id.as_str(),
                    format!("{}:{hexes}", channel.code()),
                ))
            }
            Self::StopPulse {
                client_id,
                target_id,
                channel,
            } => Ok(envelope(
                EventKind::Msg,
                client_id,
                target_id.as_str(),
                format!("{CLEAR_PREFIX}{}", channel.code()),
            )),
            Self::ReportFeedback {
                client_id,
                target_id,
                button,
            } => Ok(envelope(
                EventKind::Msg,
                client_id,
                target_id.as_str(),
                format!("{FEEDBACK_PREFIX}{}", button.index()),
            )),
        }
    }

    /// Stable label for structured log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::BindToServer { .. } => "bind_to_server",
            Self::BindAppToThirdParty { .. } => "bind_app_to_third_party",
            Self::BindResult { .. } => "bind_result",
            Self::Break { .. } => "break",
            Self::Error { .. } => "error",
            Self::ReportStrength { .. } => "report_strength",
            Self::AdjustStrength { .. } => "adjust_strength",
            Self::ExecutePulse { .. } => "execute_pulse",
            Self::StopPulse { .. } => "stop_pulse",
            Self::ReportFeedback { .. } => "report_feedback",
        }
    }
}

fn envelope(kind: EventKind, client_id: &SecureId, target_id: &str, message: String) -> RawEvent {
    RawEvent {
        kind,
        client_id: client_id.as_str().to_owned(),
        target_id: target_id.to_owned(),
        message,
    }
}

/// The unprefixed pulse form `<channel>:<json>`: digits before the first colon.
fn bare_pulse_form(message: &str) -> bool {
    message
        .split_once(':')
        .is_some_and(|(head, _)| !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_u8(field: &str, what: &str) -> Result<u8, RelayError> {
    field
        .parse()
        .map_err(|_| RelayError::decode(format!("{what} {field:?} is not a small integer")))
}

fn parse_u32(field: &str, what: &str) -> Result<u32, RelayError> {
    field
        .parse()
        .map_err(|_| RelayError::decode(format!("{what} {field:?} is not an integer")))
}
