//! Wire types for the AIS feed
//!
//! Field names follow the feed's PascalCase JSON; every payload field is
//! optional because transponders routinely omit them.

use serde::{Deserialize, Serialize};

use crate::geofence::BoundingBox;
use crate::model::{Dimensions, Mmsi};

/// Message kinds the collector subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    ShipStaticData,
    PositionReport,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ShipStaticData => "ShipStaticData",
            MessageKind::PositionReport => "PositionReport",
        }
    }
}

/// Sent once per connection, immediately after the handshake
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "APIKey")]
    pub api_key: String,
    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde(rename = "FilterMessageTypes")]
    pub filter_message_types: Vec<MessageKind>,
}

impl SubscriptionRequest {
    pub fn new(api_key: impl Into<String>, bbox: BoundingBox, kinds: &[MessageKind]) -> Self {
        Self {
            api_key: api_key.into(),
            bounding_boxes: vec![bbox],
            filter_message_types: kinds.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEnvelope {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "MetaData")]
    pub metadata: MetaData,
    #[serde(rename = "Message", default)]
    pub message: MessageBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaData {
    #[serde(rename = "MMSI")]
    pub mmsi: Option<Mmsi>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_utc: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "ShipStaticData")]
    pub ship_static_data: Option<ShipStaticData>,
    #[serde(rename = "PositionReport")]
    pub position_report: Option<PositionReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShipStaticData {
    pub imo_number: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub ship_type: Option<i32>,
    pub dimension: Option<Dimension>,
    pub maximum_static_draught: Option<f64>,
    pub destination: Option<String>,
}

impl ShipStaticData {
    pub fn dimensions(&self) -> Dimensions {
        self.dimension
            .as_ref()
            .map(|d| Dimensions::from_offsets(d.a, d.b, d.c, d.d))
            .unwrap_or_default()
    }
}

/// Antenna offsets in metres
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Dimension {
    #[serde(rename = "A")]
    pub a: Option<i32>,
    #[serde(rename = "B")]
    pub b: Option<i32>,
    #[serde(rename = "C")]
    pub c: Option<i32>,
    #[serde(rename = "D")]
    pub d: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionReport {
    pub sog: Option<f64>,
    pub cog: Option<f64>,
    pub navigational_status: Option<i32>,
    pub rate_of_turn: Option<f64>,
    pub true_heading: Option<i32>,
}

/// Envelope narrowed to the payload named by its discriminator
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Static(MetaData, ShipStaticData),
    Position(MetaData, PositionReport),
    /// Known discriminator whose payload object is absent
    MissingPayload(MessageKind),
    /// Unsubscribed kind
    Other(String),
}

impl FeedEnvelope {
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn into_message(self) -> FeedMessage {
        let FeedEnvelope {
            message_type,
            metadata,
            message,
        } = self;

        match message_type.as_str() {
            "ShipStaticData" => match message.ship_static_data {
                Some(data) => FeedMessage::Static(metadata, data),
                None => FeedMessage::MissingPayload(MessageKind::ShipStaticData),
            },
            "PositionReport" => match message.position_report {
                Some(report) => FeedMessage::Position(metadata, report),
                None => FeedMessage::MissingPayload(MessageKind::PositionReport),
            },
            _ => FeedMessage::Other(message_type),
        }
    }
}
