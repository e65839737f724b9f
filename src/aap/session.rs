//! Per-connection AAP session state machine.
//!
//! A [`Session`] owns the mutable state of one accessory connection. It runs
//! the handshake sequencer, classifies inbound buffers, applies decoded values
//! with change detection and reports them to a [`SessionSink`]. It performs no
//! I/O of its own: bytes go out through a [`Transport`], and the handshake
//! delay is exposed as a deadline for the caller's event loop to honour.

use std::time::Duration;

use log::{debug, info, warn};
use smol_str::SmolStr;
use strum::IntoEnumIterator;
use tokio::time::Instant;

use crate::{
   aap::{
      capability::{Capabilities, Capability},
      parser::{self, ProtoError},
      protocol::{
         AwarenessMode, EarState, ListeningModeCycle, NoiseControlMode, Packet, PacketKind,
         PressDuration, PressSpeed, Protocol, Signature, SwipeLength, SwipeMode,
      },
   },
   error::{AapError, Result},
   event::SessionSink,
};

/// Delay between feature negotiation and the notification request.
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(250);

/// Outbound half of the transport boundary. Sends are fire-and-forget.
pub trait Transport: Send {
   fn send(&mut self, packet: &[u8]);
}

impl Transport for Vec<Packet> {
   fn send(&mut self, packet: &[u8]) {
      self.push(Packet::from_slice(packet));
   }
}

/// Position of a session in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum HandshakePhase {
   /// Nothing sent yet.
   #[default]
   Idle,
   /// Handshake sent, waiting out [`HANDSHAKE_DELAY`].
   Negotiating,
   /// Notifications requested; settings may be changed.
   Active,
   /// Torn down; all further input is ignored.
   Destroyed,
}

/// Mutable per-connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
   pub phase: HandshakePhase,
   pub handshake_acked: bool,
   pub feature_ack_received: bool,
   pub anc_mode: NoiseControlMode,
   pub adaptive_level: Option<u8>,
   pub awareness_mode: AwarenessMode,
   pub bud1: Option<EarState>,
   pub bud2: Option<EarState>,
}

impl SessionState {
   /// Whether a previous ear reading exists and had no bud in an ear.
   fn all_buds_out(&self) -> bool {
      match (self.bud1, self.bud2) {
         (Some(bud1), Some(bud2)) => !bud1.is_in_ear() && !bud2.is_in_ear(),
         _ => false,
      }
   }
}

/// Represents the result of an update operation on session state.
#[derive(Debug, Clone, Copy)]
pub enum UpdateOp<T> {
   /// No change occurred
   Noop,
   /// The value changed; carries the previous value
   Updated(T),
}

impl<T: PartialEq> UpdateOp<T> {
   fn apply(dst: &mut T, new: T) -> Self {
      if *dst == new {
         Self::Noop
      } else {
         Self::Updated(std::mem::replace(dst, new))
      }
   }
}

/// One accessory connection.
pub struct Session<T, S> {
   protocol: &'static Protocol,
   caps: Capabilities,
   state: SessionState,
   deadline: Option<Instant>,
   transport: T,
   sink: S,
   label: SmolStr,
}

impl<T, S> Session<T, S> {
   pub fn state(&self) -> &SessionState {
      &self.state
   }

   pub const fn capabilities(&self) -> Capabilities {
      self.caps
   }

   pub fn label(&self) -> &SmolStr {
      &self.label
   }

   pub fn transport(&self) -> &T {
      &self.transport
   }

   pub fn transport_mut(&mut self) -> &mut T {
      &mut self.transport
   }

   pub fn sink(&self) -> &S {
      &self.sink
   }

   /// Pending handshake timer, if one is armed.
   pub const fn handshake_deadline(&self) -> Option<Instant> {
      self.deadline
   }

   pub fn is_active(&self) -> bool {
      self.state.phase == HandshakePhase::Active
   }

   pub fn is_destroyed(&self) -> bool {
      self.state.phase == HandshakePhase::Destroyed
   }
}

impl<T: Transport, S: SessionSink> Session<T, S> {
   pub fn new(protocol: &'static Protocol, caps: Capabilities, transport: T, sink: S) -> Self {
      Self {
         protocol,
         caps,
         state: SessionState::default(),
         deadline: None,
         transport,
         sink,
         label: SmolStr::new_static("aap"),
      }
   }

   /// Sets the prefix used in log lines, typically the device address.
   #[must_use]
   pub fn with_label(mut self, label: impl Into<SmolStr>) -> Self {
      self.label = label.into();
      self
   }

   /// Sends the handshake and, with awareness enabled, the feature
   /// negotiation packet, then arms the timer for the notification request.
   ///
   /// Only the first call on a session has any effect.
   pub fn begin_handshake(&mut self, now: Instant) {
      if self.state.phase != HandshakePhase::Idle {
         warn!("{}: handshake already {}", self.label, self.state.phase);
         return;
      }
      info!("{}: Starting handshake sequence...", self.label);
      let packets = &self.protocol.handshake;
      self.transport.send(packets.handshake);
      if self.caps.contains(Capability::Awareness) {
         debug!("{}: negotiating specific features", self.label);
         self.transport.send(packets.set_specific_features);
      }
      self.state.phase = HandshakePhase::Negotiating;
      self.deadline = Some(now + HANDSHAKE_DELAY);
   }

   /// Fires the handshake timer if it is armed and due.
   pub fn on_timer(&mut self, now: Instant) {
      let Some(deadline) = self.deadline else {
         return;
      };
      if now < deadline {
         return;
      }
      self.deadline = None;
      self
         .transport
         .send(self.protocol.handshake.request_notifications);
      self.state.phase = HandshakePhase::Active;
      info!(
         "{}: Handshake sequence completed (acked: {}, features acked: {})",
         self.label, self.state.handshake_acked, self.state.feature_ack_received
      );
   }

   /// Tears the session down: cancels the pending timer and stops dispatch.
   /// Calling it again is harmless.
   pub fn destroy(&mut self) {
      if self.is_destroyed() {
         return;
      }
      self.deadline = None;
      self.state.phase = HandshakePhase::Destroyed;
      info!("{}: Session destroyed", self.label);
   }

   /// Classifies one inbound buffer and runs every matching decoder.
   ///
   /// Unmatched buffers and buffers received after [`Session::destroy`] are
   /// dropped without a trace.
   pub fn dispatch(&mut self, data: &[u8]) {
      if self.is_destroyed() {
         return;
      }
      let protocol = self.protocol;
      for kind in PacketKind::iter() {
         let sig = protocol.signature(kind);
         if !sig.matches(data) {
            continue;
         }
         if let Some(cap) = kind.capability()
            && !self.caps.contains(cap)
         {
            continue;
         }
         if let Err(e) = self.decode(kind, sig, data) {
            debug!("{}: dropping {kind} packet: {e}", self.label);
         }
      }
   }

   fn decode(
      &mut self,
      kind: PacketKind,
      sig: &Signature,
      data: &[u8],
   ) -> std::result::Result<(), ProtoError> {
      match kind {
         PacketKind::HandshakeAck => {
            debug!("{}: Received handshake ACK", self.label);
            self.state.handshake_acked = true;
         },
         PacketKind::FeaturesAck => {
            debug!("{}: Received features ACK", self.label);
            self.state.feature_ack_received = true;
         },
         PacketKind::Battery => {
            let props = parser::parse_battery_status(data, sig)?;
            debug!("{}: Battery updated: {}", self.label, props.to_json());
            self.sink.battery_properties(&props);
         },
         PacketKind::EarDetection => {
            let (bud1, bud2) = parser::parse_ear_detection(data, sig)?;
            self.apply_ear_detection(bud1, bud2);
         },
         PacketKind::NoiseControl => {
            let mode = parser::parse_noise_mode(data, sig)?;
            if let UpdateOp::Updated(prev) = UpdateOp::apply(&mut self.state.anc_mode, mode) {
               debug!("{}: Noise mode updated: {prev} -> {mode}", self.label);
               self.sink.anc_mode(mode);
            }
         },
         PacketKind::AdaptiveLevel => {
            let level = parser::parse_adaptive_level(data, sig)?;
            if let UpdateOp::Updated(prev) =
               UpdateOp::apply(&mut self.state.adaptive_level, Some(level))
            {
               debug!("{}: Adaptive level updated: {prev:?} -> {level}", self.label);
               self.sink.adaptive_level(level);
            }
         },
         PacketKind::AwarenessMode => {
            let mode = parser::parse_awareness_mode(data, sig)?;
            if let UpdateOp::Updated(prev) =
               UpdateOp::apply(&mut self.state.awareness_mode, mode)
            {
               debug!("{}: Awareness mode updated: {prev} -> {mode}", self.label);
               self.sink.awareness_mode(mode);
            }
         },
         PacketKind::AwarenessData => {
            self.sink.awareness_data(parser::parse_awareness_data(data, sig)?);
         },
         PacketKind::ToneVolume => {
            self.sink.notification_tone_level(parser::parse_tone_volume(data, sig)?);
         },
         PacketKind::PressSpeed => {
            self.sink.press_speed(parser::parse_press_speed(data, sig)?);
         },
         PacketKind::PressDuration => {
            self.sink.press_duration(parser::parse_press_duration(data, sig)?);
         },
         PacketKind::SwipeMode => {
            self.sink.volume_swipe_mode(parser::parse_swipe_mode(data, sig)?);
         },
         PacketKind::SwipeLength => {
            self.sink.volume_swipe_length(parser::parse_swipe_length(data, sig)?);
         },
      }
      Ok(())
   }

   fn apply_ear_detection(&mut self, bud1: EarState, bud2: EarState) {
      let was_out = self.state.all_buds_out();

      if (self.state.bud1, self.state.bud2) != (Some(bud1), Some(bud2)) {
         self.state.bud1 = Some(bud1);
         self.state.bud2 = Some(bud2);
         debug!("{}: Ear detection updated: {bud1} {bud2}", self.label);
         self.sink.in_ear_status(bud1, bud2);
      }

      // Accessories drop the negotiated features once both buds are out.
      if self.caps.contains(Capability::Awareness)
         && self.state.feature_ack_received
         && was_out
         && (bud1.is_in_ear() || bud2.is_in_ear())
      {
         info!("{}: Bud back in ear, re-sending specific features", self.label);
         self
            .transport
            .send(self.protocol.handshake.set_specific_features);
      }
   }

   fn send_setting(&mut self, cap: Capability, packet: Packet) -> Result<()> {
      match self.state.phase {
         HandshakePhase::Destroyed => return Err(AapError::SessionClosed),
         HandshakePhase::Idle | HandshakePhase::Negotiating => {
            return Err(AapError::HandshakeIncomplete);
         },
         HandshakePhase::Active => {},
      }
      if !self.caps.contains(cap) {
         return Err(AapError::FeatureNotSupported(cap));
      }
      self.transport.send(&packet);
      Ok(())
   }

   pub fn set_anc_mode(&mut self, mode: NoiseControlMode) -> Result<()> {
      let packet = self.protocol.commands.anc_mode(mode);
      self.send_setting(Capability::NoiseControl, packet)
   }

   pub fn set_adaptive_level(&mut self, level: u8) -> Result<()> {
      let packet = self.protocol.commands.adaptive_level(level);
      self.send_setting(Capability::AdaptiveLevel, packet)
   }

   pub fn set_awareness_mode(&mut self, mode: AwarenessMode) -> Result<()> {
      let packet = self.protocol.commands.awareness_mode(mode);
      self.send_setting(Capability::Awareness, packet)
   }

   pub fn set_long_press_cycle(&mut self, cycle: ListeningModeCycle) -> Result<()> {
      let packet = self.protocol.commands.long_press_cycle(cycle);
      self.send_setting(Capability::LongPressCycle, packet)
   }

   pub fn set_noti_volume(&mut self, level: u8) -> Result<()> {
      let packet = self.protocol.commands.noti_volume(level);
      self.send_setting(Capability::ToneVolume, packet)
   }

   pub fn set_swipe_mode(&mut self, mode: SwipeMode) -> Result<()> {
      let packet = self.protocol.commands.swipe_mode(mode);
      self.send_setting(Capability::VolumeSwipe, packet)
   }

   pub fn set_swipe_length(&mut self, length: SwipeLength) -> Result<()> {
      let packet = self.protocol.commands.swipe_length(length);
      self.send_setting(Capability::VolumeSwipe, packet)
   }

   pub fn set_press_speed(&mut self, speed: PressSpeed) -> Result<()> {
      let packet = self.protocol.commands.press_speed(speed);
      self.send_setting(Capability::PressSpeed, packet)
   }

   pub fn set_press_duration(&mut self, duration: PressDuration) -> Result<()> {
      let packet = self.protocol.commands.press_duration(duration);
      self.send_setting(Capability::PressSpeed, packet)
   }
}
