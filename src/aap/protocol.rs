//! AAP protocol definitions and data structures.
//!
//! This module contains the packet signatures, command templates and typed
//! value domains for talking to AAP accessories. The byte-level constants
//! are grouped into a [`Protocol`] table so a device model can supply its own;
//! [`Protocol::AIRPODS`] is the built-in table.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::aap::capability::Capability;

/// A single inbound or outbound buffer.
pub type Packet = SmallVec<[u8; 32]>;

pub const PKT_HANDSHAKE: &[u8] = &[
   0x00, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
pub const PKT_SET_SPECIFIC_FEATURES: &[u8] = &[
   0x04, 0x00, 0x04, 0x00, 0x4d, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
pub const PKT_REQUEST_NOTIFICATIONS: &[u8] = &[
   0x04, 0x00, 0x04, 0x00, 0x0f, 0x00, 0xff, 0xff, 0xff, 0xff,
];

// Parsing headers
pub const HDR_ACK_HANDSHAKE: &[u8] = b"\x01\x00\x04\x00";
pub const HDR_ACK_FEATURES: &[u8] = b"\x04\x00\x04\x00\x2b";
pub const HDR_BATTERY_STATE: &[u8] = b"\x04\x00\x04\x00\x04\x00";
pub const HDR_EAR_DETECTION: &[u8] = b"\x04\x00\x04\x00\x06\x00";
pub const HDR_AWARENESS_DATA: &[u8] = b"\x04\x00\x04\x00\x4b\x00\x02\x00";

/// Control command identifiers, the byte following the `04 00 04 00 09 00`
/// control header.
pub mod ctl {
   pub const NOISE_CONTROL: u8 = 0x0d;
   pub const PRESS_SPEED: u8 = 0x17;
   pub const PRESS_DURATION: u8 = 0x18;
   pub const LONG_PRESS_CYCLE: u8 = 0x1a;
   pub const TONE_VOLUME: u8 = 0x1f;
   pub const SWIPE_LENGTH: u8 = 0x23;
   pub const SWIPE_MODE: u8 = 0x25;
   pub const AWARENESS_MODE: u8 = 0x28;
   pub const ADAPTIVE_LEVEL: u8 = 0x2e;
}

/// Length of a fixed-size control command packet.
pub const CTL_PACKET_LEN: usize = 11;

macro_rules! ctl_header {
   ($id:expr) => {
      &[0x04, 0x00, 0x04, 0x00, 0x09, 0x00, $id]
   };
}

/// Identifies one inbound packet family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
   /// Exact leading bytes.
   pub prefix: &'static [u8],
   /// Exact total length, if the family has one.
   pub len: Option<usize>,
   /// Offset of the first value byte.
   pub offset: usize,
}

impl Signature {
   pub const fn prefix(prefix: &'static [u8], offset: usize) -> Self {
      Self {
         prefix,
         len: None,
         offset,
      }
   }

   pub const fn exact(prefix: &'static [u8], len: usize, offset: usize) -> Self {
      Self {
         prefix,
         len: Some(len),
         offset,
      }
   }

   pub fn matches(&self, data: &[u8]) -> bool {
      data.starts_with(self.prefix) && self.len.is_none_or(|len| data.len() == len)
   }
}

/// Outgoing command template: `header ++ payload ++ suffix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
   pub header: &'static [u8],
   pub suffix: &'static [u8],
}

impl CommandTemplate {
   pub const fn new(header: &'static [u8], suffix: &'static [u8]) -> Self {
      Self { header, suffix }
   }
}

/// Inbound packet families, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum PacketKind {
   HandshakeAck,
   FeaturesAck,
   Battery,
   EarDetection,
   NoiseControl,
   AdaptiveLevel,
   AwarenessMode,
   AwarenessData,
   ToneVolume,
   PressSpeed,
   PressDuration,
   SwipeMode,
   SwipeLength,
}

impl PacketKind {
   /// Capability that must be enabled for the family to be decoded.
   pub const fn capability(self) -> Option<Capability> {
      match self {
         Self::HandshakeAck | Self::FeaturesAck | Self::Battery | Self::EarDetection => None,
         Self::NoiseControl => Some(Capability::NoiseControl),
         Self::AdaptiveLevel => Some(Capability::AdaptiveLevel),
         Self::AwarenessMode | Self::AwarenessData => Some(Capability::Awareness),
         Self::ToneVolume => Some(Capability::ToneVolume),
         Self::PressSpeed | Self::PressDuration => Some(Capability::PressSpeed),
         Self::SwipeMode | Self::SwipeLength => Some(Capability::VolumeSwipe),
      }
   }
}

/// Static packets sent during the handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakePackets {
   pub handshake: &'static [u8],
   pub set_specific_features: &'static [u8],
   pub request_notifications: &'static [u8],
}

/// Inbound family signatures.
#[derive(Debug, Clone, Copy)]
pub struct Signatures {
   pub handshake_ack: Signature,
   pub features_ack: Signature,
   pub battery: Signature,
   pub ear_detection: Signature,
   pub noise_control: Signature,
   pub adaptive_level: Signature,
   pub awareness_mode: Signature,
   pub awareness_data: Signature,
   pub tone_volume: Signature,
   pub press_speed: Signature,
   pub press_duration: Signature,
   pub swipe_mode: Signature,
   pub swipe_length: Signature,
}

/// Outbound command templates.
#[derive(Debug, Clone, Copy)]
pub struct Commands {
   pub noise_control: CommandTemplate,
   pub adaptive_level: CommandTemplate,
   pub awareness_mode: CommandTemplate,
   pub long_press_cycle: CommandTemplate,
   pub tone_volume: CommandTemplate,
   pub swipe_mode: CommandTemplate,
   pub swipe_length: CommandTemplate,
   pub press_speed: CommandTemplate,
   pub press_duration: CommandTemplate,
}

/// Complete byte catalogue for one accessory family.
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
   pub handshake: HandshakePackets,
   pub signatures: Signatures,
   pub commands: Commands,
}

const CTL_SUFFIX: &[u8] = &[0x00, 0x00, 0x00];

impl Protocol {
   pub const AIRPODS: Self = Self {
      handshake: HandshakePackets {
         handshake: PKT_HANDSHAKE,
         set_specific_features: PKT_SET_SPECIFIC_FEATURES,
         request_notifications: PKT_REQUEST_NOTIFICATIONS,
      },
      signatures: Signatures {
         handshake_ack: Signature::prefix(HDR_ACK_HANDSHAKE, 4),
         features_ack: Signature::prefix(HDR_ACK_FEATURES, 5),
         battery: Signature::prefix(HDR_BATTERY_STATE, 6),
         ear_detection: Signature::prefix(HDR_EAR_DETECTION, 6),
         noise_control: Signature::exact(ctl_header!(ctl::NOISE_CONTROL), CTL_PACKET_LEN, 7),
         adaptive_level: Signature::exact(ctl_header!(ctl::ADAPTIVE_LEVEL), CTL_PACKET_LEN, 7),
         awareness_mode: Signature::exact(ctl_header!(ctl::AWARENESS_MODE), CTL_PACKET_LEN, 7),
         awareness_data: Signature::prefix(HDR_AWARENESS_DATA, 9),
         tone_volume: Signature::prefix(ctl_header!(ctl::TONE_VOLUME), 9),
         press_speed: Signature::prefix(ctl_header!(ctl::PRESS_SPEED), 9),
         press_duration: Signature::prefix(ctl_header!(ctl::PRESS_DURATION), 9),
         swipe_mode: Signature::prefix(ctl_header!(ctl::SWIPE_MODE), 9),
         swipe_length: Signature::prefix(ctl_header!(ctl::SWIPE_LENGTH), 9),
      },
      commands: Commands {
         noise_control: CommandTemplate::new(ctl_header!(ctl::NOISE_CONTROL), CTL_SUFFIX),
         adaptive_level: CommandTemplate::new(ctl_header!(ctl::ADAPTIVE_LEVEL), CTL_SUFFIX),
         awareness_mode: CommandTemplate::new(ctl_header!(ctl::AWARENESS_MODE), CTL_SUFFIX),
         long_press_cycle: CommandTemplate::new(ctl_header!(ctl::LONG_PRESS_CYCLE), CTL_SUFFIX),
         tone_volume: CommandTemplate::new(ctl_header!(ctl::TONE_VOLUME), &[0x50, 0x00, 0x00]),
         swipe_mode: CommandTemplate::new(ctl_header!(ctl::SWIPE_MODE), CTL_SUFFIX),
         swipe_length: CommandTemplate::new(ctl_header!(ctl::SWIPE_LENGTH), CTL_SUFFIX),
         press_speed: CommandTemplate::new(ctl_header!(ctl::PRESS_SPEED), CTL_SUFFIX),
         press_duration: CommandTemplate::new(ctl_header!(ctl::PRESS_DURATION), CTL_SUFFIX),
      },
   };

   pub const fn signature(&self, kind: PacketKind) -> &Signature {
      let s = &self.signatures;
      match kind {
         PacketKind::HandshakeAck => &s.handshake_ack,
         PacketKind::FeaturesAck => &s.features_ack,
         PacketKind::Battery => &s.battery,
         PacketKind::EarDetection => &s.ear_detection,
         PacketKind::NoiseControl => &s.noise_control,
         PacketKind::AdaptiveLevel => &s.adaptive_level,
         PacketKind::AwarenessMode => &s.awareness_mode,
         PacketKind::AwarenessData => &s.awareness_data,
         PacketKind::ToneVolume => &s.tone_volume,
         PacketKind::PressSpeed => &s.press_speed,
         PacketKind::PressDuration => &s.press_duration,
         PacketKind::SwipeMode => &s.swipe_mode,
         PacketKind::SwipeLength => &s.swipe_length,
      }
   }
}

impl Default for Protocol {
   fn default() -> Self {
      Self::AIRPODS
   }
}

/// Battery reading component types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum Component {
   Single = 0x01,
   Right = 0x02,
   Left = 0x04,
   Case = 0x08,
}

impl Component {
   /// Battery slot reported for this component: 1 (single/left), 2 (right), 3 (case).
   pub const fn slot(self) -> u8 {
      match self {
         Self::Single | Self::Left => 1,
         Self::Right => 2,
         Self::Case => 3,
      }
   }
}

/// Status byte bit set while a component is charging.
pub const BATTERY_CHARGING_BIT: u8 = 0x01;

/// Charge status of one battery reading.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChargeStatus {
   Charging,
   Discharging,
}

impl ChargeStatus {
   pub const fn from_status_byte(status: u8) -> Self {
      if status & BATTERY_CHARGING_BIT != 0 {
         Self::Charging
      } else {
         Self::Discharging
      }
   }
}

/// One decoded battery reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryReading {
   /// 1 (single or left), 2 (right) or 3 (case).
   pub slot: u8,
   /// Percentage, clamped to 0..=100.
   pub level: u8,
   pub status: ChargeStatus,
}

/// Battery readings carried by one battery packet, indexed by slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryProperties {
   pub slots: [Option<BatteryReading>; 3],
}

impl BatteryProperties {
   pub const fn new() -> Self {
      Self { slots: [None; 3] }
   }

   /// Stores a reading in its slot. Later readings for the same slot win.
   pub fn insert(&mut self, reading: BatteryReading) {
      if let Some(dst) = self.slots.get_mut(usize::from(reading.slot).wrapping_sub(1)) {
         *dst = Some(reading);
      }
   }

   pub fn get(&self, slot: u8) -> Option<&BatteryReading> {
      self.slots.get(usize::from(slot).wrapping_sub(1))?.as_ref()
   }

   pub fn readings(&self) -> impl Iterator<Item = &BatteryReading> {
      self.slots.iter().flatten()
   }

   /// Flattens the readings into `battery{N}Level` / `battery{N}Status` keys.
   /// Slots without a reading contribute no keys.
   pub fn to_json(&self) -> serde_json::Value {
      let mut map = serde_json::Map::new();
      for r in self.readings() {
         map.insert(format!("battery{}Level", r.slot), r.level.into());
         map.insert(
            format!("battery{}Status", r.slot),
            <&str>::from(r.status).into(),
         );
      }
      serde_json::Value::Object(map)
   }
}

/// Noise control modes.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Default,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum NoiseControlMode {
   #[default]
   #[strum(to_string = "off")]
   Off = 0x01,
   #[strum(to_string = "anc", serialize = "nc")]
   Anc = 0x02,
   #[strum(to_string = "transparency", serialize = "trans")]
   Transparency = 0x03,
   #[strum(to_string = "adaptive", serialize = "adapt")]
   Adaptive = 0x04,
}

impl NoiseControlMode {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// Conversation awareness on/off.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Default,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AwarenessMode {
   On = 0x01,
   #[default]
   Off = 0x02,
}

/// Presence state of a single bud.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::FromRepr, strum::Display,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EarState {
   InEar = 0x00,
   OutOfEar = 0x01,
   InCase = 0x02,
}

impl EarState {
   pub const fn is_in_ear(self) -> bool {
      matches!(self, Self::InEar)
   }
}

/// Double/triple press speed.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PressSpeed {
   Default = 0x00,
   Slower = 0x01,
   Slowest = 0x02,
}

/// Press-and-hold duration.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PressDuration {
   Default = 0x00,
   Shorter = 0x01,
   Shortest = 0x02,
}

/// Volume swipe gesture on/off.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwipeMode {
   Enabled = 0x01,
   Disabled = 0x02,
}

/// Interval between volume swipe steps.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwipeLength {
   Default = 0x00,
   Longer = 0x01,
   Longest = 0x02,
}

/// Set of noise control modes a long press cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ListeningModeCycle(u8);

impl ListeningModeCycle {
   pub const OFF: u8 = 1 << 0;
   pub const ANC: u8 = 1 << 1;
   pub const TRANSPARENCY: u8 = 1 << 2;
   pub const ADAPTIVE: u8 = 1 << 3;

   pub const fn from_bits(bits: u8) -> Self {
      Self(bits)
   }

   pub fn from_modes(modes: impl IntoIterator<Item = NoiseControlMode>) -> Self {
      Self(modes.into_iter().fold(0, |acc, m| acc | Self::mode_bit(m)))
   }

   pub const fn bits(self) -> u8 {
      self.0
   }

   pub const fn contains(self, mode: NoiseControlMode) -> bool {
      self.0 & Self::mode_bit(mode) != 0
   }

   const fn mode_bit(mode: NoiseControlMode) -> u8 {
      match mode {
         NoiseControlMode::Off => Self::OFF,
         NoiseControlMode::Anc => Self::ANC,
         NoiseControlMode::Transparency => Self::TRANSPARENCY,
         NoiseControlMode::Adaptive => Self::ADAPTIVE,
      }
   }
}

/// Lowest raw notification tone volume byte.
pub const TONE_RAW_MIN: u8 = 15;
/// Highest raw notification tone volume byte.
pub const TONE_RAW_MAX: u8 = 100;

#[cfg(test)]
mod tests {
   use strum::IntoEnumIterator;

   use super::*;

   #[test]
   fn test_builtin_signatures_are_disjoint() {
      let proto = Protocol::AIRPODS;
      let samples: Vec<(PacketKind, Vec<u8>)> = PacketKind::iter()
         .map(|kind| {
            let sig = proto.signature(kind);
            let mut pkt = sig.prefix.to_vec();
            pkt.resize(sig.len.unwrap_or(sig.offset + 1).max(pkt.len()), 0);
            (kind, pkt)
         })
         .collect();

      for (kind, pkt) in &samples {
         let hits: Vec<_> = PacketKind::iter()
            .filter(|k| proto.signature(*k).matches(pkt))
            .collect();
         assert_eq!(hits, vec![*kind], "sample for {kind} matched {hits:?}");
      }
   }

   #[test]
   fn test_signature_exact_length() {
      let sig = Protocol::AIRPODS.signatures.noise_control;
      assert!(sig.matches(&[0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x0d, 0x02, 0, 0, 0]));
      assert!(!sig.matches(&[0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x0d, 0x02, 0, 0]));
      assert!(!sig.matches(&[0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x0d, 0x02, 0, 0, 0, 0]));
   }

   #[test]
   fn test_component_slots() {
      assert_eq!(Component::from_repr(0x04).map(Component::slot), Some(1));
      assert_eq!(Component::from_repr(0x01).map(Component::slot), Some(1));
      assert_eq!(Component::from_repr(0x02).map(Component::slot), Some(2));
      assert_eq!(Component::from_repr(0x08).map(Component::slot), Some(3));
      assert_eq!(Component::from_repr(0x00), None);
   }

   #[test]
   fn test_noise_mode_names() {
      assert_eq!("nc".parse::<NoiseControlMode>().ok(), Some(NoiseControlMode::Anc));
      assert_eq!(
         "transparency".parse::<NoiseControlMode>().ok(),
         Some(NoiseControlMode::Transparency)
      );
      assert_eq!(NoiseControlMode::Adaptive.to_str(), "adaptive");
      assert_eq!(NoiseControlMode::from_repr(0x05), None);
   }

   #[test]
   fn test_listening_mode_cycle_bits() {
      let cycle =
         ListeningModeCycle::from_modes([NoiseControlMode::Anc, NoiseControlMode::Transparency]);
      assert_eq!(cycle.bits(), 0x06);
      assert!(cycle.contains(NoiseControlMode::Anc));
      assert!(!cycle.contains(NoiseControlMode::Off));
   }
}
