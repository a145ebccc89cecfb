use crate::color::Color;
use crate::error::{TraceError, WireError, DISCOVERY_UNREACHABLE_MESSAGE};
use crate::filter::Filter;
use crate::source::Source;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Integer that the producer may send either as a JSON number or a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StringInt(pub i64);

impl<'de> Deserialize<'de> for StringInt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringIntVisitor;

        impl<'de> Visitor<'de> for StringIntVisitor {
            type Value = StringInt;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an integer as string or number")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StringInt(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let value = i64::try_from(value)
                    .map_err(|_| E::custom(format!("integer out of range: {value}")))?;
                Ok(StringInt(value))
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(E::custom(format!("expected whole number, got {value}")));
                }
                Ok(StringInt(value as i64))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let parsed = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|err| E::custom(format!("invalid integer '{value}': {err}")))?;
                Ok(StringInt(parsed))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(StringIntVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireOption {
    #[serde(default)]
    pub color: Option<Color>,
    #[serde(default)]
    pub alpha: Option<u8>,
}

impl WireOption {
    pub fn declared_color(&self) -> Color {
        let base = self.color.unwrap_or(Color::BLACK);
        match self.alpha {
            Some(alpha) => base.with_alpha(alpha),
            None => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireDrawCall {
    #[serde(default)]
    pub drawindex: Option<i64>,
    #[serde(default)]
    pub thread_id: Option<i64>,
    pub source_index: usize,
    #[serde(default)]
    pub size: [f64; 2],
    #[serde(default)]
    pub pos: [f64; 2],
    #[serde(default)]
    pub option: WireOption,
    #[serde(default)]
    pub buff_id: Option<i64>,
    #[serde(default)]
    pub uv_pos: Option<[f64; 2]>,
    #[serde(default)]
    pub uv_size: Option<[f64; 2]>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireLog {
    #[serde(default)]
    pub drawindex: Option<i64>,
    #[serde(default)]
    pub thread_id: Option<i64>,
    pub source_index: usize,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub option: WireOption,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireThread {
    pub thread_name: String,
    pub thread_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameMessage {
    pub frame: StringInt,
    pub windowx: StringInt,
    pub windowy: StringInt,
    #[serde(default)]
    pub logs: Vec<WireLog>,
    #[serde(default)]
    pub drawcalls: Vec<WireDrawCall>,
    #[serde(default)]
    pub threads: Option<Vec<WireThread>>,
    #[serde(default)]
    pub new_sources: Vec<Source>,
    #[serde(default)]
    pub buff_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ConnectionOk,
    ProducerError(String),
    Frame(Box<FrameMessage>),
    CommandAck { id: u64 },
    Unknown,
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage, WireError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| WireError::Decode(err.to_string()))?;
    let Some(map) = value.as_object() else {
        return Err(WireError::Decode("expected a JSON object".to_string()));
    };
    if let Some(error) = map.get("error") {
        let message = match error {
            Value::String(message) => message.clone(),
            Value::Object(inner) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            other => other.to_string(),
        };
        return Ok(InboundMessage::ProducerError(message));
    }
    if map.get("connection").and_then(Value::as_str) == Some("ok") {
        return Ok(InboundMessage::ConnectionOk);
    }
    if map.contains_key("frame") {
        let frame: FrameMessage = serde_json::from_value(value)
            .map_err(|err| WireError::MalformedFrame(err.to_string()))?;
        return Ok(InboundMessage::Frame(Box::new(frame)));
    }
    if let Some(id) = map.get("id").and_then(Value::as_u64) {
        return Ok(InboundMessage::CommandAck { id });
    }
    Ok(InboundMessage::Unknown)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum CommandCall {
    StartStream,
    StopStream,
    SetFilters { filters: Vec<Filter> },
}

impl CommandCall {
    pub fn name(&self) -> &'static str {
        match self {
            CommandCall::StartStream => "startStream",
            CommandCall::StopStream => "stopStream",
            CommandCall::SetFilters { .. } => "setFilters",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: u64,
    #[serde(flatten)]
    pub call: CommandCall,
}

impl Command {
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|err| WireError::Encode(err.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default, rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DiscoveryResponse {
    pub fn into_url(self) -> Result<String, TraceError> {
        if let Some(error) = self.error {
            return Err(TraceError::Discovery(error));
        }
        match self.web_socket_debugger_url {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(TraceError::Discovery(
                "discovery response carried no webSocketDebuggerUrl".to_string(),
            )),
        }
    }
}

/// Maps a discovery body, or a transport failure, to the endpoint URL.
pub fn discovery_outcome(body: Result<&str, String>) -> Result<String, TraceError> {
    let body = body.map_err(|_| TraceError::Discovery(DISCOVERY_UNREACHABLE_MESSAGE.to_string()))?;
    let response: DiscoveryResponse = serde_json::from_str(body)
        .map_err(|err| TraceError::Discovery(format!("invalid discovery response: {err}")))?;
    response.into_url()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterAction, Selector};

    #[test]
    fn frame_fields_accept_strings_and_numbers() {
        let text = r##"{
            "frame": "42",
            "windowx": 640,
            "windowy": "480",
            "drawcalls": [
                {"drawindex": 0, "source_index": 0, "size": [10, 20], "pos": [1, 2],
                 "option": {"color": "#ff0000", "alpha": 128}}
            ],
            "logs": [{"drawindex": 1, "source_index": 0, "value": "hello"}],
            "new_sources": [{"file": "a.cc", "func": "Draw", "anno": "frame.quad"}]
        }"##;
        let InboundMessage::Frame(frame) = parse_inbound(text).expect("parse") else {
            panic!("expected frame");
        };
        assert_eq!(frame.frame, StringInt(42));
        assert_eq!(frame.windowx, StringInt(640));
        assert_eq!(frame.windowy, StringInt(480));
        assert_eq!(frame.drawcalls[0].option.declared_color(), Color::RED.with_alpha(128));
        assert_eq!(frame.threads, None);
        assert_eq!(
            frame.new_sources[0].annotation.as_deref(),
            Some("frame.quad")
        );
    }

    #[test]
    fn dispatches_by_shape() {
        assert_eq!(
            parse_inbound(r#"{"connection":"ok"}"#).expect("ok"),
            InboundMessage::ConnectionOk
        );
        assert_eq!(
            parse_inbound(r#"{"error":"no gpu"}"#).expect("error"),
            InboundMessage::ProducerError("no gpu".to_string())
        );
        assert_eq!(
            parse_inbound(r#"{"error":{"code":-1,"message":"bad method"}}"#).expect("error"),
            InboundMessage::ProducerError("bad method".to_string())
        );
        assert_eq!(
            parse_inbound(r#"{"id":3,"result":{}}"#).expect("ack"),
            InboundMessage::CommandAck { id: 3 }
        );
        assert_eq!(
            parse_inbound(r#"{"method":"Target.attached"}"#).expect("unknown"),
            InboundMessage::Unknown
        );
        assert!(matches!(parse_inbound("[1,2]"), Err(WireError::Decode(_))));
    }

    #[test]
    fn malformed_frames_are_reported_as_such() {
        let result = parse_inbound(r#"{"frame":"x1","windowx":1,"windowy":1}"#);
        assert!(matches!(result, Err(WireError::MalformedFrame(_))));
        let err: TraceError = result.expect_err("malformed").into();
        assert!(err.is_terminal());
    }

    #[test]
    fn commands_carry_id_and_method() {
        let start = Command {
            id: 1,
            call: CommandCall::StartStream,
        };
        assert_eq!(
            start.encode().expect("encode"),
            r#"{"id":1,"method":"startStream"}"#
        );

        let filters = Command {
            id: 2,
            call: CommandCall::SetFilters {
                filters: vec![Filter::new(
                    Selector::annotation("damage"),
                    FilterAction::color(Color::RED),
                )],
            },
        };
        let encoded: Value =
            serde_json::from_str(&filters.encode().expect("encode")).expect("json");
        assert_eq!(encoded["method"], "setFilters");
        assert_eq!(encoded["filters"][0]["selector"]["anno"], "damage");
        assert_eq!(encoded["filters"][0]["action"]["color"], "#ff0000");
        assert_eq!(encoded["filters"][0]["enabled"], true);
    }

    #[test]
    fn discovery_maps_every_failure_to_discovery_error() {
        assert_eq!(
            discovery_outcome(Ok(r#"{"webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/1"}"#)),
            Ok("ws://127.0.0.1:9222/devtools/browser/1".to_string())
        );
        assert_eq!(
            discovery_outcome(Ok(r#"{"error":"no browser"}"#)),
            Err(TraceError::Discovery("no browser".to_string()))
        );
        assert_eq!(
            discovery_outcome(Err("connection refused".to_string())),
            Err(TraceError::Discovery(DISCOVERY_UNREACHABLE_MESSAGE.to_string()))
        );
        assert!(matches!(
            discovery_outcome(Ok(r#"{"webSocketDebuggerUrl":""}"#)),
            Err(TraceError::Discovery(_))
        ));
    }
}
