//! # Peripheral Wire Protocol
//!
//! Everything the peripheral receives is a [`Payload`] on one logical
//! [`Channel`]:
//!
//! - **Text**: UTF-8 `key=value`; a preferences push is several lines in one
//!   payload
//! - **Icon**: `<16 hex hash>:<packed bits>`, the hash lets the peripheral skip
//!   redrawing an icon it already shows
//!
//! The BLE backend addresses each channel as its own GATT characteristic
//! inside [`SERVICE_UUID`]. The serial backend multiplexes all channels over
//! one byte stream as one JSON object per line.

use crate::write_queue::QueueItem;
use crate::{DitheredImage, NavigationSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Write};
use uuid::Uuid;

/// Custom GATT service holding every navigation characteristic.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x55a919e3_73b6_4706_ac09_e8dcaf738a96);

/// Separates the icon hash from the packed bits.
pub const ICON_DELIMITER: u8 = b':';

/// Logical channel of a write, by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Settings,
    NextRoad,
    NextRoadDesc,
    DistanceToTurn,
    Eta,
    Ete,
    TotalDistance,
    Speed,
    Icon,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::Settings,
        Channel::NextRoad,
        Channel::NextRoadDesc,
        Channel::DistanceToTurn,
        Channel::Eta,
        Channel::Ete,
        Channel::TotalDistance,
        Channel::Speed,
        Channel::Icon,
    ];

    /// Stable string id, used in logs and as the queue's coalescing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Settings => "settings",
            Channel::NextRoad => "nav.next_road",
            Channel::NextRoadDesc => "nav.next_road_desc",
            Channel::DistanceToTurn => "nav.distance_to_turn",
            Channel::Eta => "nav.eta",
            Channel::Ete => "nav.ete",
            Channel::TotalDistance => "nav.total_distance",
            Channel::Speed => "nav.speed",
            Channel::Icon => "nav.icon",
        }
    }

    /// Key written in front of `=` on single-field channels.
    pub fn key(&self) -> &'static str {
        match self {
            Channel::Settings => "settings",
            Channel::NextRoad => "next_road",
            Channel::NextRoadDesc => "next_road_desc",
            Channel::DistanceToTurn => "distance_to_turn",
            Channel::Eta => "eta",
            Channel::Ete => "ete",
            Channel::TotalDistance => "total_distance",
            Channel::Speed => "speed",
            Channel::Icon => "icon",
        }
    }

    /// GATT characteristic of the channel.
    pub fn characteristic(&self) -> Uuid {
        let id = match self {
            Channel::Settings => 0x9d37a346_63d3_4df6_8eee_f0242949f59f,
            Channel::NextRoad => 0xde85b367_aaec_493b_b317_6f91f8eae852,
            Channel::NextRoadDesc => 0x4b115f28_fd93_4113_b3b1_b09f14d46045,
            Channel::DistanceToTurn => 0x2fe1df0f_5ea0_45e1_a5fd_43b3f9768188,
            Channel::Eta => 0x245be16d_e9c4_4b54_bdd8_2966704b727c,
            Channel::Ete => 0xa4f3b12d_dda0_42d7_9f2f_dad257d81fb2,
            Channel::TotalDistance => 0xc685be4d_31d2_4f27_b4be_08d6e2c1c6dc,
            Channel::Speed => 0xf2e3336e_640b_4d4c_b0df_5bbacb7cfd22,
            Channel::Icon => 0x9931ab38_bb10_49ec_aec9_0c2cee5f3416,
        };
        Uuid::from_u128(id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User display preferences, pushed on connect and on change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// "dark" or "light"
    pub theme: String,
    /// Backlight percentage
    pub brightness: u8,
    /// km/h above which the peripheral warns
    pub speed_limit: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            theme: "dark".to_string(),
            brightness: 80,
            speed_limit: 60,
        }
    }
}

/// Identity of a peripheral.
///
/// `address` is a BLE MAC address or, for the serial backend, the device path.
/// Two ids are the same device when their addresses match.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl PartialEq for DeviceId {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Content of one write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// `key=value` lines
    Fields(Vec<(String, String)>),
    /// Dithered icon and its content hash
    Icon { hash: String, bits: Vec<u8> },
}

impl Payload {
    /// Raw bytes as written to a GATT characteristic.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Fields(fields) => fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("\n")
                .into_bytes(),
            Payload::Icon { hash, bits } => {
                let mut bytes = Vec::with_capacity(hash.len() + 1 + bits.len());
                bytes.extend_from_slice(hash.as_bytes());
                bytes.push(ICON_DELIMITER);
                bytes.extend_from_slice(bits);
                bytes
            }
        }
    }

    /// One newline-terminated JSON object for the serial stream.
    pub fn to_json_line(&self) -> String {
        let mut object = Map::new();
        match self {
            Payload::Fields(fields) => {
                for (key, value) in fields {
                    object.insert(key.clone(), Value::String(value.clone()));
                }
            }
            Payload::Icon { hash, bits } => {
                object.insert("icon".into(), Value::String(hash.clone()));
                object.insert("bits".into(), Value::String(to_hex(bits)));
            }
        }
        let mut line = Value::Object(object).to_string();
        line.push('\n');
        line
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Single `key=value` write on `channel`. Coalesces.
pub fn text_item(channel: Channel, value: &str) -> QueueItem {
    QueueItem::new(
        channel,
        Payload::Fields(vec![(channel.key().to_string(), value.to_string())]),
        true,
    )
}

/// All preferences as one multi-line write on the settings channel.
pub fn preferences_item(preferences: &Preferences) -> QueueItem {
    QueueItem::new(
        Channel::Settings,
        Payload::Fields(vec![
            ("theme".to_string(), preferences.theme.clone()),
            ("brightness".to_string(), preferences.brightness.to_string()),
            ("speed_limit".to_string(), preferences.speed_limit.to_string()),
        ]),
        true,
    )
}

pub fn speed_item(kmh: u32) -> QueueItem {
    text_item(Channel::Speed, &kmh.to_string())
}

/// Length of [`DitheredImage::content_hash`].
const ICON_HASH_LEN: usize = 16;

/// Icon blob. Never coalesces, every icon is delivered.
pub fn icon_item(icon: &DitheredImage) -> QueueItem {
    QueueItem::new(
        Channel::Icon,
        Payload::Icon {
            hash: icon.content_hash(),
            bits: icon.bits().to_vec(),
        },
        false,
    )
}

/// Bytes of an icon write for a `width` x `height` icon: hash, delimiter, bits.
pub fn icon_payload_len(width: u32, height: u32) -> usize {
    ICON_HASH_LEN + 1 + (width.div_ceil(8) * height) as usize
}

/// Text writes for every field of a snapshot, in display order.
///
/// The icon is left to the caller, which knows which hashes the peripheral
/// already holds.
pub fn snapshot_items(snapshot: &NavigationSnapshot) -> Vec<QueueItem> {
    let direction = &snapshot.direction;
    let trip = &snapshot.trip;
    vec![
        text_item(Channel::NextRoad, &direction.next_road),
        text_item(Channel::NextRoadDesc, &direction.next_road_sub),
        text_item(Channel::DistanceToTurn, &direction.distance_to_turn),
        text_item(Channel::Eta, &trip.eta),
        text_item(Channel::Ete, &trip.ete),
        text_item(Channel::TotalDistance, &trip.total_distance),
    ]
}

/// Location speed in m/s to whole km/h. Negative or invalid readings are 0.
pub fn speed_kmh(meters_per_second: f32) -> u32 {
    if !meters_per_second.is_finite() || meters_per_second <= 0.0 {
        return 0;
    }
    (meters_per_second * 3.6).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_channel_ids_are_unique() {
        let ids: HashSet<_> = Channel::ALL.iter().map(Channel::as_str).collect();
        let uuids: HashSet<_> = Channel::ALL.iter().map(Channel::characteristic).collect();
        assert_eq!(ids.len(), Channel::ALL.len());
        assert_eq!(uuids.len(), Channel::ALL.len());
        assert!(!uuids.contains(&SERVICE_UUID));
    }

    #[test]
    fn test_text_payload() {
        let item = text_item(Channel::NextRoad, "Main St");
        assert!(item.coalesce);
        assert_eq!(item.payload.to_bytes(), b"next_road=Main St");
    }

    #[test]
    fn test_preferences_are_newline_joined() {
        let item = preferences_item(&Preferences::default());
        assert_eq!(item.channel, Channel::Settings);
        assert_eq!(
            String::from_utf8(item.payload.to_bytes()).unwrap(),
            "theme=dark\nbrightness=80\nspeed_limit=60"
        );
    }

    #[test]
    fn test_icon_payload_framing() {
        let mut icon = DitheredImage::blank(8, 2);
        icon.set_pixel(0, 0, true);
        let item = icon_item(&icon);
        assert!(!item.coalesce);

        let bytes = item.payload.to_bytes();
        assert_eq!(bytes[16], ICON_DELIMITER);
        assert_eq!(&bytes[..16], icon.content_hash().as_bytes());
        assert_eq!(&bytes[17..], &[0x80, 0x00]);
        assert_eq!(bytes.len(), icon_payload_len(8, 2));
        assert_eq!(icon_payload_len(32, 32), 16 + 1 + 128);
    }

    #[test]
    fn test_serial_json_lines() {
        let line = preferences_item(&Preferences::default()).payload.to_json_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["theme"], "dark");
        assert_eq!(value["speed_limit"], "60");

        let icon = DitheredImage::blank(8, 1);
        let value: Value = serde_json::from_str(&icon_item(&icon).payload.to_json_line()).unwrap();
        assert_eq!(value["icon"], icon.content_hash().as_str());
        assert_eq!(value["bits"], "00");
    }

    #[test]
    fn test_device_identity_is_by_address() {
        let a = DeviceId::new("AA:BB").with_name("Dash");
        let b = DeviceId::new("AA:BB");
        assert_eq!(a, b);
        assert_ne!(a, DeviceId::new("CC:DD"));
        assert_eq!(a.to_string(), "Dash (AA:BB)");
    }

    #[test]
    fn test_speed_conversion() {
        assert_eq!(speed_kmh(10.0), 36);
        assert_eq!(speed_kmh(13.9), 50);
        assert_eq!(speed_kmh(-1.0), 0);
        assert_eq!(speed_kmh(f32::NAN), 0);
    }
}
