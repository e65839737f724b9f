//! Per-model capability flags.
//!
//! A [`Capabilities`] set is fixed when a session is created and selects
//! which optional decoders and setting-change commands are active.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An optional protocol feature an accessory model may support.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
   NoiseControl = 0,
   AdaptiveLevel = 1,
   /// Conversation awareness, including feature negotiation.
   Awareness = 2,
   /// Press speed and press duration.
   PressSpeed = 3,
   /// Volume swipe mode and swipe length.
   VolumeSwipe = 4,
   LongPressCycle = 5,
   ToneVolume = 6,
}

impl Capability {
   const fn bit(self) -> u8 {
      1 << self as u8
   }
}

/// Immutable set of [`Capability`] flags.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
   pub const NONE: Self = Self(0);
   pub const ALL: Self = Self(0x7f);

   /// Returns a copy of this set with `cap` added.
   #[must_use]
   pub const fn with(self, cap: Capability) -> Self {
      Self(self.0 | cap.bit())
   }

   pub const fn contains(self, cap: Capability) -> bool {
      self.0 & cap.bit() != 0
   }

   pub fn iter(self) -> impl Iterator<Item = Capability> {
      <Capability as strum::IntoEnumIterator>::iter().filter(move |&c| self.contains(c))
   }
}

impl FromIterator<Capability> for Capabilities {
   fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
      iter.into_iter().fold(Self::NONE, Self::with)
   }
}

impl fmt::Debug for Capabilities {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_set().entries(self.iter()).finish()
   }
}

/// Accessory models with a known capability preset.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Default,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceModel {
   /// Buds without any settings channel beyond battery and ear detection.
   #[default]
   Basic,
   AirPods3,
   AirPodsPro,
   AirPodsPro2,
   AirPodsMax,
}

impl DeviceModel {
   pub const fn capabilities(self) -> Capabilities {
      use Capability::*;

      match self {
         Self::Basic => Capabilities::NONE,
         Self::AirPods3 => Capabilities::NONE.with(PressSpeed).with(ToneVolume),
         Self::AirPodsPro => Capabilities::NONE
            .with(NoiseControl)
            .with(PressSpeed)
            .with(LongPressCycle)
            .with(ToneVolume),
         Self::AirPodsPro2 => Capabilities::ALL,
         Self::AirPodsMax => Capabilities::NONE
            .with(NoiseControl)
            .with(PressSpeed)
            .with(ToneVolume),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_capability_set_membership() {
      let caps: Capabilities = [Capability::NoiseControl, Capability::ToneVolume]
         .into_iter()
         .collect();
      assert!(caps.contains(Capability::NoiseControl));
      assert!(caps.contains(Capability::ToneVolume));
      assert!(!caps.contains(Capability::Awareness));
      assert_eq!(caps.iter().count(), 2);
   }

   #[test]
   fn test_all_contains_every_capability() {
      for cap in <Capability as strum::IntoEnumIterator>::iter() {
         assert!(Capabilities::ALL.contains(cap), "{cap} missing");
      }
      assert_eq!(Capabilities::ALL.iter().count(), 7);
   }

   #[test]
   fn test_model_presets() {
      assert_eq!(DeviceModel::Basic.capabilities(), Capabilities::NONE);
      assert!(DeviceModel::AirPodsPro2.capabilities().contains(Capability::Awareness));
      assert!(!DeviceModel::AirPodsPro.capabilities().contains(Capability::AdaptiveLevel));
   }

   #[test]
   fn test_capability_names() {
      assert_eq!("volume_swipe".parse::<Capability>().ok(), Some(Capability::VolumeSwipe));
      assert_eq!(Capability::LongPressCycle.to_string(), "long_press_cycle");
   }
}
