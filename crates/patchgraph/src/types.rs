use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Hex characters kept from the SHA-256 of a device's names.
pub const DEVICE_ID_LEN: usize = 16;

/// Stable device identity: the first 16 hex chars of SHA-256(card name ++ device name).
///
/// Card and device indices are deliberately excluded; they change across
/// reboots and USB re-plugs while the names do not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_names(card_name: &str, device_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(card_name.as_bytes());
        hasher.update(device_name.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..DEVICE_ID_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the daemon client that carries this device's streams in `direction`.
    pub fn client_name(&self, direction: Direction) -> String {
        format!("{}_{}", self.0, direction.client_suffix())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stream direction from the daemon's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "in")]
    Capture,
    #[serde(alias = "out")]
    Playback,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Capture, Direction::Playback];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Playback => "playback",
        }
    }

    /// Suffix appended to the device id to form the daemon client name.
    pub fn client_suffix(&self) -> &'static str {
        match self {
            Self::Capture => "in",
            Self::Playback => "out",
        }
    }

    /// Classify a direction token by containment, the way the daemon's port
    /// names carry it (`in:capture`, `out:playback`).
    pub fn from_token(token: &str) -> Self {
        if token.contains("in") {
            Self::Capture
        } else {
            Self::Playback
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" | "in" => Ok(Self::Capture),
            "playback" | "out" => Ok(Self::Playback),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// A sound-card device as discovered on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub card_name: String,
    pub device_name: String,
    pub card_index: u32,
    pub device_index: u32,
}

impl DeviceRecord {
    pub fn new(card_index: u32, card_name: &str, device_index: u32, device_name: &str) -> Self {
        Self {
            id: DeviceId::from_names(card_name, device_name),
            card_name: card_name.to_string(),
            device_name: device_name.to_string(),
            card_index,
            device_index,
        }
    }

    /// Hardware address understood by the sound tools, e.g. `hw:1,0`.
    pub fn hw_address(&self) -> String {
        format!("hw:{},{}", self.card_index, self.device_index)
    }
}

/// Hardware limits of one device in one direction. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEnvelope {
    pub formats: BTreeSet<String>,
    pub rate_min: u32,
    pub rate_max: u32,
    pub max_channels: u32,
    pub period_min: u32,
    pub period_max: u32,
}

impl CapabilityEnvelope {
    pub fn summary(&self) -> PadSummary {
        PadSummary {
            rate: self.rate_max,
            channels: self.max_channels,
        }
    }
}

/// Best-known rate and channel count for one direction, as listed by `GET /devices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadSummary {
    pub rate: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub card_name: String,
    pub device_name: String,
    pub card_index: u32,
    pub device_index: u32,
    pub capture: Option<PadSummary>,
    pub playback: Option<PadSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetail {
    #[serde(flatten)]
    pub device: DeviceRecord,
    pub capture: Option<CapabilityEnvelope>,
    pub playback: Option<CapabilityEnvelope>,
    pub loaded: Option<LoadedDevice>,
}

/// How a hardware device is bridged into the routing daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMode {
    /// Standalone `alsa_in`/`alsa_out` bridge processes.
    #[serde(alias = "alsa")]
    NativeClient,
    /// In-process `zalsa_in`/`zalsa_out` internal clients.
    #[serde(alias = "zalsa")]
    LowLatencyClient,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeClient => "nativeClient",
            Self::LowLatencyClient => "lowLatencyClient",
        }
    }
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClientMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nativeClient" | "alsa" => Ok(Self::NativeClient),
            "lowLatencyClient" | "zalsa" => Ok(Self::LowLatencyClient),
            _ => Err(format!("Unknown client mode: {}", s)),
        }
    }
}

/// A device attached to the daemon, with the stream parameters it was attached with.
///
/// Doubles as the attach request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedDevice {
    pub device_id: DeviceId,
    pub client: ClientMode,
    pub rate: u32,
    pub period: u32,
    #[serde(rename = "nperiods")]
    pub nperiods: u32,
}

/// One daemon port belonging to this system's naming convention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub id: DeviceId,
    #[serde(alias = "io_type")]
    pub direction: Direction,
    pub channel: u32,
}

impl PortRef {
    pub fn new(id: impl Into<DeviceId>, direction: Direction, channel: u32) -> Self {
        Self {
            id: id.into(),
            direction,
            channel,
        }
    }

    /// Full daemon port name, e.g. `d2e84e43448844db_in:capture_1`.
    pub fn port_name(&self) -> String {
        format!(
            "{}:{}_{}",
            self.id.client_name(self.direction),
            self.direction.as_str(),
            self.channel
        )
    }
}

/// A requested capture → playback wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub source: PortRef,
    pub destination: PortRef,
}

/// A live capture port and every playback port it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGroup {
    pub source: PortRef,
    pub destinations: Vec<PortRef>,
}

/// A persisted desired connection. All four fields together form the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub source_id: DeviceId,
    pub source_channel: u32,
    pub destination_id: DeviceId,
    pub destination_channel: u32,
}

impl ConnectionEntry {
    pub fn source_port(&self) -> PortRef {
        PortRef::new(self.source_id.clone(), Direction::Capture, self.source_channel)
    }

    pub fn destination_port(&self) -> PortRef {
        PortRef::new(
            self.destination_id.clone(),
            Direction::Playback,
            self.destination_channel,
        )
    }
}

impl From<&Patch> for ConnectionEntry {
    fn from(patch: &Patch) -> Self {
        Self {
            source_id: patch.source.id.clone(),
            source_channel: patch.source.channel,
            destination_id: patch.destination.id.clone(),
            destination_channel: patch.destination.channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_regression_value() {
        let id = DeviceId::from_names("USB (USB Audio)", "USB Audio");
        assert_eq!(id.as_str(), "d2e84e43448844db");
        assert_eq!(id.as_str().len(), DEVICE_ID_LEN);
    }

    #[test]
    fn test_device_id_ignores_indices() {
        let before = DeviceRecord::new(1, "USB (USB Audio)", 0, "USB Audio");
        let after = DeviceRecord::new(3, "USB (USB Audio)", 2, "USB Audio");
        assert_eq!(before.id, after.id);
        assert_ne!(before.hw_address(), after.hw_address());
    }

    #[test]
    fn test_port_names() {
        let src = PortRef::new("abc123", Direction::Capture, 1);
        let dst = PortRef::new("def456", Direction::Playback, 2);
        assert_eq!(src.port_name(), "abc123_in:capture_1");
        assert_eq!(dst.port_name(), "def456_out:playback_2");
    }

    #[test]
    fn test_direction_accepts_legacy_names() {
        let port: PortRef =
            serde_json::from_str(r#"{"id":"abc","io_type":"in","channel":1}"#).unwrap();
        assert_eq!(port.direction, Direction::Capture);

        let port: PortRef =
            serde_json::from_str(r#"{"id":"abc","direction":"playback","channel":3}"#).unwrap();
        assert_eq!(port.direction, Direction::Playback);
    }

    #[test]
    fn test_load_request_accepts_both_client_spellings() {
        let modern: LoadedDevice = serde_json::from_str(
            r#"{"deviceId":"abc","client":"lowLatencyClient","rate":48000,"period":256,"nperiods":2}"#,
        )
        .unwrap();
        let legacy: LoadedDevice = serde_json::from_str(
            r#"{"deviceId":"abc","client":"zalsa","rate":48000,"period":256,"nperiods":2}"#,
        )
        .unwrap();
        assert_eq!(modern, legacy);
        assert_eq!(legacy.client.as_str(), "lowLatencyClient");

        let bad = serde_json::from_str::<LoadedDevice>(
            r#"{"deviceId":"abc","client":"pulse","rate":48000,"period":256,"nperiods":2}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_direction_from_token() {
        assert_eq!(Direction::from_token("in:capture"), Direction::Capture);
        assert_eq!(Direction::from_token("out:playback"), Direction::Playback);
    }
}
