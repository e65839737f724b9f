//! Packet decoders for the AAP protocol.
//!
//! Every decoder is a pure function from an already-classified buffer and its
//! family [`Signature`] to a typed value. Failures are reported as
//! [`ProtoError`] and are treated as "ignore this packet" by the session.

use log::debug;
use thiserror::Error;

use crate::aap::protocol::{
   AwarenessMode, BatteryProperties, BatteryReading, ChargeStatus, Component, EarState,
   NoiseControlMode, PressDuration, PressSpeed, Signature, SwipeLength, SwipeMode, TONE_RAW_MAX,
   TONE_RAW_MIN,
};

/// Error type for protocol parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtoError {
   /// Packet is too short for the expected format
   #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
   PacketTooShort { expected: usize, actual: usize },

   /// Invalid reading count in battery status packet
   #[error("Invalid battery count: {count} (must be 1-3)")]
   InvalidBatteryCount { count: u8 },

   /// A value byte lies outside the family's domain
   #[error("Unknown {field} value: 0x{value:02x}")]
   OutOfDomain { field: &'static str, value: u8 },
}

const MAX_BATTERY_READINGS: u8 = 3;
const BATTERY_STRIDE: usize = 5;

/// Highest conversational awareness level; the domain is 1..=9.
const AWARENESS_LEVEL_MAX: u8 = 9;
/// Awareness levels at or below this value mean media is attenuated.
const AWARENESS_ATTENUATED_MAX: u8 = 2;
const ADAPTIVE_LEVEL_MAX: u8 = 100;

fn byte_at(data: &[u8], offset: usize) -> Result<u8, ProtoError> {
   data.get(offset).copied().ok_or(ProtoError::PacketTooShort {
      expected: offset + 1,
      actual: data.len(),
   })
}

fn enum_at<T>(
   data: &[u8],
   sig: &Signature,
   field: &'static str,
   from_repr: impl FnOnce(u8) -> Option<T>,
) -> Result<T, ProtoError> {
   let value = byte_at(data, sig.offset)?;
   from_repr(value).ok_or(ProtoError::OutOfDomain { field, value })
}

/// Parses a battery status packet.
///
/// The count byte sits at the signature offset and must be 1..=3. Readings
/// follow in 5-byte records `[type, _, level, status, _]`. Unknown component
/// types and records cut short before their status byte are skipped.
pub fn parse_battery_status(data: &[u8], sig: &Signature) -> Result<BatteryProperties, ProtoError> {
   let count = byte_at(data, sig.offset)?;
   if !(1..=MAX_BATTERY_READINGS).contains(&count) {
      return Err(ProtoError::InvalidBatteryCount { count });
   }

   let mut props = BatteryProperties::new();
   let base = sig.offset + 1;
   for i in 0..usize::from(count) {
      let offset = base + BATTERY_STRIDE * i;
      let Some(record) = data.get(offset..offset + 4) else {
         debug!("Battery reading {i} truncated at offset {offset}");
         continue;
      };
      let (id, level, status) = (record[0], record[2], record[3]);

      let Some(component) = Component::from_repr(id) else {
         debug!("Unknown component type 0x{id:02x}");
         continue;
      };

      props.insert(BatteryReading {
         slot: component.slot(),
         level: level.min(100),
         status: ChargeStatus::from_status_byte(status),
      });
   }
   Ok(props)
}

/// Parses an ear detection packet into the two bud states.
///
/// Both bytes must be valid; otherwise the whole packet is rejected.
pub fn parse_ear_detection(data: &[u8], sig: &Signature) -> Result<(EarState, EarState), ProtoError> {
   let first = byte_at(data, sig.offset)?;
   let second = byte_at(data, sig.offset + 1)?;
   let bud1 = EarState::from_repr(first).ok_or(ProtoError::OutOfDomain {
      field: "ear state",
      value: first,
   })?;
   let bud2 = EarState::from_repr(second).ok_or(ProtoError::OutOfDomain {
      field: "ear state",
      value: second,
   })?;
   Ok((bud1, bud2))
}

pub fn parse_noise_mode(data: &[u8], sig: &Signature) -> Result<NoiseControlMode, ProtoError> {
   enum_at(data, sig, "noise control mode", NoiseControlMode::from_repr)
}

/// Parses the adaptive noise level. Values above 100 are rejected.
pub fn parse_adaptive_level(data: &[u8], sig: &Signature) -> Result<u8, ProtoError> {
   let value = byte_at(data, sig.offset)?;
   if value > ADAPTIVE_LEVEL_MAX {
      return Err(ProtoError::OutOfDomain {
         field: "adaptive level",
         value,
      });
   }
   Ok(value)
}

pub fn parse_awareness_mode(data: &[u8], sig: &Signature) -> Result<AwarenessMode, ProtoError> {
   enum_at(data, sig, "awareness mode", AwarenessMode::from_repr)
}

/// Parses a conversational awareness level report.
///
/// Returns `true` when the accessory is attenuating media for speech.
pub fn parse_awareness_data(data: &[u8], sig: &Signature) -> Result<bool, ProtoError> {
   let value = byte_at(data, sig.offset)?;
   if !(1..=AWARENESS_LEVEL_MAX).contains(&value) {
      return Err(ProtoError::OutOfDomain {
         field: "awareness level",
         value,
      });
   }
   Ok(value <= AWARENESS_ATTENUATED_MAX)
}

/// Maps a raw tone volume byte in 15..=100 onto a 0..=100 percentage.
pub fn tone_level_from_raw(raw: u8) -> Option<u8> {
   if !(TONE_RAW_MIN..=TONE_RAW_MAX).contains(&raw) {
      return None;
   }
   let span = f64::from(TONE_RAW_MAX - TONE_RAW_MIN);
   Some((f64::from(raw - TONE_RAW_MIN) / span * 100.0).round() as u8)
}

pub fn parse_tone_volume(data: &[u8], sig: &Signature) -> Result<u8, ProtoError> {
   let value = byte_at(data, sig.offset)?;
   tone_level_from_raw(value).ok_or(ProtoError::OutOfDomain {
      field: "tone volume",
      value,
   })
}

pub fn parse_press_speed(data: &[u8], sig: &Signature) -> Result<PressSpeed, ProtoError> {
   enum_at(data, sig, "press speed", PressSpeed::from_repr)
}

pub fn parse_press_duration(data: &[u8], sig: &Signature) -> Result<PressDuration, ProtoError> {
   enum_at(data, sig, "press duration", PressDuration::from_repr)
}

pub fn parse_swipe_mode(data: &[u8], sig: &Signature) -> Result<SwipeMode, ProtoError> {
   enum_at(data, sig, "swipe mode", SwipeMode::from_repr)
}

pub fn parse_swipe_length(data: &[u8], sig: &Signature) -> Result<SwipeLength, ProtoError> {
   enum_at(data, sig, "swipe length", SwipeLength::from_repr)
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::aap::protocol::{HDR_BATTERY_STATE, Protocol};

   const SIGS: &crate::aap::protocol::Signatures = &Protocol::AIRPODS.signatures;

   fn battery_packet(count: u8, records: &[u8]) -> Vec<u8> {
      let mut pkt = HDR_BATTERY_STATE.to_vec();
      pkt.push(count);
      pkt.extend_from_slice(records);
      pkt
   }

   #[test]
   fn test_battery_full_packet() {
      let pkt = battery_packet(
         3,
         &[
            0x04, 0x01, 80, 0x02, 0x01, //
            0x02, 0x01, 75, 0x01, 0x01, //
            0x08, 0x01, 40, 0x02, 0x01,
         ],
      );
      let props = parse_battery_status(&pkt, &SIGS.battery).unwrap();
      assert_eq!(
         props.get(1),
         Some(&BatteryReading {
            slot: 1,
            level: 80,
            status: ChargeStatus::Discharging
         })
      );
      assert_eq!(props.get(2).map(|r| r.status), Some(ChargeStatus::Charging));
      assert_eq!(props.get(3).map(|r| r.level), Some(40));
   }

   #[test]
   fn test_battery_levels_are_clamped() {
      for level in [0u8, 1, 99, 100, 101, 150, 255] {
         let pkt = battery_packet(1, &[0x04, 0x00, level, 0x00, 0x00]);
         let props = parse_battery_status(&pkt, &SIGS.battery).unwrap();
         assert_eq!(props.get(1).map(|r| r.level), Some(level.min(100)));
      }
   }

   #[test]
   fn test_battery_rejects_bad_counts() {
      for count in [0u8, 4, 0xff] {
         let pkt = battery_packet(count, &[0x04, 0x00, 50, 0x00, 0x00]);
         assert_eq!(
            parse_battery_status(&pkt, &SIGS.battery),
            Err(ProtoError::InvalidBatteryCount { count })
         );
      }
   }

   #[test]
   fn test_battery_skips_unknown_component() {
      let pkt = battery_packet(
         2,
         &[
            0x10, 0x00, 50, 0x00, 0x00, //
            0x02, 0x00, 60, 0x01, 0x00,
         ],
      );
      let props = parse_battery_status(&pkt, &SIGS.battery).unwrap();
      assert!(props.get(1).is_none());
      assert_eq!(props.get(2).map(|r| r.level), Some(60));
   }

   #[test]
   fn test_battery_declared_count_limits_readings() {
      // Second record would start at offset 12, past the case type byte, and is cut short.
      let pkt = battery_packet(2, &[0x04, 0x00, 150, 0x01, 0x08, 0x00, 0xfb, 0x00]);
      let props = parse_battery_status(&pkt, &SIGS.battery).unwrap();
      assert_eq!(props.readings().count(), 1);
      assert_eq!(
         props.to_json(),
         serde_json::json!({ "battery1Level": 100, "battery1Status": "charging" })
      );
   }

   #[test]
   fn test_ear_detection() {
      let pkt = [0x04, 0x00, 0x04, 0x00, 0x06, 0x00, 0x00, 0x02];
      assert_eq!(
         parse_ear_detection(&pkt, &SIGS.ear_detection),
         Ok((EarState::InEar, EarState::InCase))
      );

      let bad = [0x04, 0x00, 0x04, 0x00, 0x06, 0x00, 0x00, 0x07];
      assert!(parse_ear_detection(&bad, &SIGS.ear_detection).is_err());

      let short = [0x04, 0x00, 0x04, 0x00, 0x06, 0x00, 0x00];
      assert_eq!(
         parse_ear_detection(&short, &SIGS.ear_detection),
         Err(ProtoError::PacketTooShort {
            expected: 8,
            actual: 7
         })
      );
   }

   #[test]
   fn test_noise_mode_domain() {
      let mut pkt = [0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x0d, 0x03, 0x00, 0x00, 0x00];
      assert_eq!(
         parse_noise_mode(&pkt, &SIGS.noise_control),
         Ok(NoiseControlMode::Transparency)
      );
      for bad in [0x00, 0x05, 0xff] {
         pkt[7] = bad;
         assert!(parse_noise_mode(&pkt, &SIGS.noise_control).is_err());
      }
   }

   #[test]
   fn test_adaptive_level_rejects_above_100() {
      let mut pkt = [0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x2e, 100, 0x00, 0x00, 0x00];
      assert_eq!(parse_adaptive_level(&pkt, &SIGS.adaptive_level), Ok(100));
      pkt[7] = 101;
      assert!(parse_adaptive_level(&pkt, &SIGS.adaptive_level).is_err());
   }

   #[test]
   fn test_awareness_data_attenuation() {
      let mut pkt = [0x04, 0x00, 0x04, 0x00, 0x4b, 0x00, 0x02, 0x00, 0x01, 0x00];
      for (level, attenuated) in [(1, true), (2, true), (3, false), (9, false)] {
         pkt[9] = level;
         assert_eq!(parse_awareness_data(&pkt, &SIGS.awareness_data), Ok(attenuated));
      }
      for level in [0, 10] {
         pkt[9] = level;
         assert!(parse_awareness_data(&pkt, &SIGS.awareness_data).is_err());
      }
   }

   #[test]
   fn test_tone_level_bounds() {
      assert_eq!(tone_level_from_raw(15), Some(0));
      assert_eq!(tone_level_from_raw(100), Some(100));
      assert_eq!(tone_level_from_raw(57), Some(49));
      assert_eq!(tone_level_from_raw(14), None);
      assert_eq!(tone_level_from_raw(101), None);
   }

   #[test]
   fn test_small_enum_decoders() {
      let mut pkt = [0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x17, 0x00, 0x00, 0x02];
      assert_eq!(parse_press_speed(&pkt, &SIGS.press_speed), Ok(PressSpeed::Slowest));
      pkt[9] = 0x03;
      assert!(parse_press_speed(&pkt, &SIGS.press_speed).is_err());

      let pkt = [0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x25, 0x00, 0x00, 0x02];
      assert_eq!(parse_swipe_mode(&pkt, &SIGS.swipe_mode), Ok(SwipeMode::Disabled));
   }
}
