//! Command encoders for setting changes.
//!
//! Encoders never validate their argument against the protocol domain; they
//! only compute the payload byte and splice it into the command template.

use crate::aap::protocol::{
   AwarenessMode, CommandTemplate, Commands, ListeningModeCycle, NoiseControlMode, Packet,
   PressDuration, PressSpeed, SwipeLength, SwipeMode, TONE_RAW_MAX, TONE_RAW_MIN,
};

impl CommandTemplate {
   /// Builds `header ++ [payload] ++ suffix`.
   pub fn build(&self, payload: u8) -> Packet {
      self
         .header
         .iter()
         .copied()
         .chain([payload])
         .chain(self.suffix.iter().copied())
         .collect()
   }
}

/// Maps a 0..=100 percentage onto the raw 15..=100 tone volume byte.
pub fn tone_raw_from_level(level: u8) -> u8 {
   let span = f64::from(TONE_RAW_MAX - TONE_RAW_MIN);
   (f64::from(level) * span / 100.0 + f64::from(TONE_RAW_MIN)).round() as u8
}

impl Commands {
   pub fn anc_mode(&self, mode: NoiseControlMode) -> Packet {
      self.noise_control.build(mode as u8)
   }

   pub fn adaptive_level(&self, level: u8) -> Packet {
      self.adaptive_level.build(level)
   }

   pub fn awareness_mode(&self, mode: AwarenessMode) -> Packet {
      self.awareness_mode.build(mode as u8)
   }

   pub fn long_press_cycle(&self, cycle: ListeningModeCycle) -> Packet {
      self.long_press_cycle.build(cycle.bits())
   }

   pub fn noti_volume(&self, level: u8) -> Packet {
      self.tone_volume.build(tone_raw_from_level(level))
   }

   pub fn swipe_mode(&self, mode: SwipeMode) -> Packet {
      self.swipe_mode.build(mode as u8)
   }

   pub fn swipe_length(&self, length: SwipeLength) -> Packet {
      self.swipe_length.build(length as u8)
   }

   pub fn press_speed(&self, speed: PressSpeed) -> Packet {
      self.press_speed.build(speed as u8)
   }

   pub fn press_duration(&self, duration: PressDuration) -> Packet {
      self.press_duration.build(duration as u8)
   }
}
