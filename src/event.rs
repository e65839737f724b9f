//! Callback sink for decoded session updates.
//!
//! A session reports every validated, deduplicated update through a
//! [`SessionSink`]. All methods default to no-ops so a sink only implements
//! what it consumes.

use serde_json::json;
use tokio::sync::mpsc;

use crate::aap::protocol::{
   AwarenessMode, BatteryProperties, EarState, NoiseControlMode, PressDuration, PressSpeed,
   SwipeLength, SwipeMode,
};

/// Receiver of decoded device-state updates.
#[allow(unused_variables)]
pub trait SessionSink: Send {
   fn battery_properties(&mut self, props: &BatteryProperties) {}
   fn anc_mode(&mut self, mode: NoiseControlMode) {}
   fn adaptive_level(&mut self, level: u8) {}
   fn awareness_mode(&mut self, mode: AwarenessMode) {}
   fn in_ear_status(&mut self, bud1: EarState, bud2: EarState) {}
   fn awareness_data(&mut self, attenuated: bool) {}
   fn notification_tone_level(&mut self, level: u8) {}
   fn press_speed(&mut self, speed: PressSpeed) {}
   fn press_duration(&mut self, duration: PressDuration) {}
   fn volume_swipe_mode(&mut self, mode: SwipeMode) {}
   fn volume_swipe_length(&mut self, length: SwipeLength) {}
}

/// Owned form of every sink callback, for forwarding across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
   BatteryProperties(BatteryProperties),
   AncMode(NoiseControlMode),
   AdaptiveLevel(u8),
   AwarenessMode(AwarenessMode),
   InEarStatus(EarState, EarState),
   AwarenessData(bool),
   NotificationToneLevel(u8),
   PressSpeed(PressSpeed),
   PressDuration(PressDuration),
   VolumeSwipeMode(SwipeMode),
   VolumeSwipeLength(SwipeLength),
}

impl SessionEvent {
   pub const fn name(&self) -> &'static str {
      match self {
         Self::BatteryProperties(_) => "battery_properties",
         Self::AncMode(_) => "anc_mode",
         Self::AdaptiveLevel(_) => "adaptive_level",
         Self::AwarenessMode(_) => "awareness_mode",
         Self::InEarStatus(..) => "in_ear_status",
         Self::AwarenessData(_) => "awareness_data",
         Self::NotificationToneLevel(_) => "notification_tone_level",
         Self::PressSpeed(_) => "press_speed",
         Self::PressDuration(_) => "press_duration",
         Self::VolumeSwipeMode(_) => "volume_swipe_mode",
         Self::VolumeSwipeLength(_) => "volume_swipe_length",
      }
   }

   pub fn to_json(&self) -> serde_json::Value {
      let value = match self {
         Self::BatteryProperties(props) => props.to_json(),
         Self::AncMode(mode) => json!(mode.to_str()),
         Self::AdaptiveLevel(level) | Self::NotificationToneLevel(level) => json!(level),
         Self::AwarenessMode(mode) => json!(mode.to_string()),
         Self::InEarStatus(bud1, bud2) => json!({
             "bud1": bud1.to_string(),
             "bud2": bud2.to_string(),
         }),
         Self::AwarenessData(attenuated) => json!(attenuated),
         Self::PressSpeed(speed) => json!(speed.to_string()),
         Self::PressDuration(duration) => json!(duration.to_string()),
         Self::VolumeSwipeMode(mode) => json!(mode.to_string()),
         Self::VolumeSwipeLength(length) => json!(length.to_string()),
      };
      let mut map = serde_json::Map::new();
      map.insert(self.name().into(), value);
      serde_json::Value::Object(map)
   }
}

/// Sink that turns every callback into a [`SessionEvent`] and pushes it.
pub trait EventBus: Send {
   fn emit(&mut self, event: SessionEvent);
}

impl<B: EventBus> SessionSink for B {
   fn battery_properties(&mut self, props: &BatteryProperties) {
      self.emit(SessionEvent::BatteryProperties(*props));
   }
   fn anc_mode(&mut self, mode: NoiseControlMode) {
      self.emit(SessionEvent::AncMode(mode));
   }
   fn adaptive_level(&mut self, level: u8) {
      self.emit(SessionEvent::AdaptiveLevel(level));
   }
   fn awareness_mode(&mut self, mode: AwarenessMode) {
      self.emit(SessionEvent::AwarenessMode(mode));
   }
   fn in_ear_status(&mut self, bud1: EarState, bud2: EarState) {
      self.emit(SessionEvent::InEarStatus(bud1, bud2));
   }
   fn awareness_data(&mut self, attenuated: bool) {
      self.emit(SessionEvent::AwarenessData(attenuated));
   }
   fn notification_tone_level(&mut self, level: u8) {
      self.emit(SessionEvent::NotificationToneLevel(level));
   }
   fn press_speed(&mut self, speed: PressSpeed) {
      self.emit(SessionEvent::PressSpeed(speed));
   }
   fn press_duration(&mut self, duration: PressDuration) {
      self.emit(SessionEvent::PressDuration(duration));
   }
   fn volume_swipe_mode(&mut self, mode: SwipeMode) {
      self.emit(SessionEvent::VolumeSwipeMode(mode));
   }
   fn volume_swipe_length(&mut self, length: SwipeLength) {
      self.emit(SessionEvent::VolumeSwipeLength(length));
   }
}

impl EventBus for Vec<SessionEvent> {
   fn emit(&mut self, event: SessionEvent) {
      self.push(event);
   }
}

impl EventBus for mpsc::UnboundedSender<SessionEvent> {
   fn emit(&mut self, event: SessionEvent) {
      // The receiver going away just means nobody is listening any more.
      let _ = self.send(event);
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::aap::protocol::{BatteryReading, ChargeStatus};

   #[test]
   fn test_event_bus_forwards_callbacks() {
      let mut events: Vec<SessionEvent> = Vec::new();
      events.anc_mode(NoiseControlMode::Anc);
      events.in_ear_status(EarState::InEar, EarState::InCase);
      assert_eq!(
         events,
         vec![
            SessionEvent::AncMode(NoiseControlMode::Anc),
            SessionEvent::InEarStatus(EarState::InEar, EarState::InCase),
         ]
      );
   }

   #[test]
   fn test_event_json() {
      let mut props = BatteryProperties::new();
      props.insert(BatteryReading {
         slot: 3,
         level: 42,
         status: ChargeStatus::Discharging,
      });
      assert_eq!(
         SessionEvent::BatteryProperties(props).to_json(),
         json!({ "battery_properties": { "battery3Level": 42, "battery3Status": "discharging" } })
      );
      assert_eq!(
         SessionEvent::InEarStatus(EarState::OutOfEar, EarState::InEar).to_json(),
         json!({ "in_ear_status": { "bud1": "out_of_ear", "bud2": "in_ear" } })
      );
   }

   #[test]
   fn test_unbounded_sender_sink() {
      let (mut tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
      tx.notification_tone_level(73);
      assert_eq!(rx.try_recv().ok(), Some(SessionEvent::NotificationToneLevel(73)));
   }
}
