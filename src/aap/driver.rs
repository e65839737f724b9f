//! Event loop running one [`Session`] on a tokio task.
//!
//! The task is the only owner of the session: inbound packets, setting-change
//! requests and the handshake timer are all serialised through one
//! `select!`, so decoders never run concurrently.

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time::{self, Instant},
};

use crate::{
   aap::{
      protocol::{
         AwarenessMode, ListeningModeCycle, NoiseControlMode, Packet, PressDuration, PressSpeed,
         SwipeLength, SwipeMode,
      },
      session::{Session, Transport},
   },
   error::{AapError, Result},
   event::SessionSink,
};

const INBOX_SIZE: usize = 32;

/// A setting change to apply on the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
   AncMode(NoiseControlMode),
   AdaptiveLevel(u8),
   AwarenessMode(AwarenessMode),
   LongPressCycle(ListeningModeCycle),
   NotiVolume(u8),
   SwipeMode(SwipeMode),
   SwipeLength(SwipeLength),
   PressSpeed(PressSpeed),
   PressDuration(PressDuration),
}

impl Request {
   fn apply<T: Transport, S: SessionSink>(self, session: &mut Session<T, S>) -> Result<()> {
      match self {
         Self::AncMode(mode) => session.set_anc_mode(mode),
         Self::AdaptiveLevel(level) => session.set_adaptive_level(level),
         Self::AwarenessMode(mode) => session.set_awareness_mode(mode),
         Self::LongPressCycle(cycle) => session.set_long_press_cycle(cycle),
         Self::NotiVolume(level) => session.set_noti_volume(level),
         Self::SwipeMode(mode) => session.set_swipe_mode(mode),
         Self::SwipeLength(length) => session.set_swipe_length(length),
         Self::PressSpeed(speed) => session.set_press_speed(speed),
         Self::PressDuration(duration) => session.set_press_duration(duration),
      }
   }
}

enum Command {
   Apply {
      request: Request,
      then: oneshot::Sender<Result<()>>,
   },
   Destroy,
}

/// Owner handle of a running session task.
///
/// Dropping the handle aborts the task.
#[derive(Debug)]
pub struct SessionHandle {
   inbox: mpsc::Sender<Command>,
   task: Option<JoinHandle<()>>,
}

impl Drop for SessionHandle {
   fn drop(&mut self) {
      if let Some(task) = self.task.take() {
         task.abort();
      }
   }
}

impl std::fmt::Debug for Command {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      match self {
         Self::Apply { request, .. } => f.debug_tuple("Apply").field(request).finish(),
         Self::Destroy => f.write_str("Destroy"),
      }
   }
}

/// Starts the handshake and runs `session` until the inbound stream ends or
/// the session is destroyed.
pub fn spawn<T, S, R>(session: Session<T, S>, inbound: R) -> SessionHandle
where
   T: Transport + 'static,
   S: SessionSink + 'static,
   R: Stream<Item = Result<Packet>> + Send + Unpin + 'static,
{
   let (inbox, rx) = mpsc::channel(INBOX_SIZE);
   let task = tokio::spawn(run(session, inbound, rx));
   SessionHandle {
      inbox,
      task: Some(task),
   }
}

async fn run<T, S, R>(mut session: Session<T, S>, mut inbound: R, mut inbox: mpsc::Receiver<Command>)
where
   T: Transport,
   S: SessionSink,
   R: Stream<Item = Result<Packet>> + Unpin,
{
   session.begin_handshake(Instant::now());

   loop {
      let deadline = session.handshake_deadline();
      select! {
         () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
            session.on_timer(Instant::now());
         },
         packet = inbound.next() => match packet {
            Some(Ok(packet)) => session.dispatch(&packet),
            Some(Err(e)) => {
               warn!("{}: Connection closed: {e}", session.label());
               break;
            },
            None => {
               debug!("{}: Inbound stream ended", session.label());
               break;
            },
         },
         cmd = inbox.recv() => match cmd {
            Some(Command::Apply { request, then }) => {
               let result = request.apply(&mut session);
               if let Err(e) = &result {
                  warn!("{}: {request:?} rejected: {e}", session.label());
               }
               let _ = then.send(result);
            },
            Some(Command::Destroy) | None => break,
         },
      }
   }

   session.destroy();
   info!("{}: Session task finished", session.label());
}

impl SessionHandle {
   /// Whether the session task has stopped.
   pub fn is_finished(&self) -> bool {
      self.task.as_ref().is_none_or(JoinHandle::is_finished)
   }

   /// Waits until the session task stops on its own.
   pub async fn closed(&mut self) {
      if let Some(task) = self.task.as_mut() {
         let _ = task.await;
         self.task = None;
      }
   }

   /// Tears down the session, cancelling a pending handshake timer, and waits
   /// for the task to stop. Safe to call repeatedly.
   pub async fn destroy(&mut self) {
      let _ = self.inbox.send(Command::Destroy).await;
      self.closed().await;
   }

   async fn request(&self, request: Request) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(Command::Apply { request, then: tx })
         .await
         .map_err(|_| AapError::SessionClosed)?;
      rx.await.map_err(|_| AapError::SessionClosed)?
   }

   pub async fn set_anc_mode(&self, mode: NoiseControlMode) -> Result<()> {
      self.request(Request::AncMode(mode)).await
   }

   pub async fn set_adaptive_level(&self, level: u8) -> Result<()> {
      self.request(Request::AdaptiveLevel(level)).await
   }

   pub async fn set_awareness_mode(&self, mode: AwarenessMode) -> Result<()> {
      self.request(Request::AwarenessMode(mode)).await
   }

   pub async fn set_long_press_cycle(&self, cycle: ListeningModeCycle) -> Result<()> {
      self.request(Request::LongPressCycle(cycle)).await
   }

   pub async fn set_noti_volume(&self, level: u8) -> Result<()> {
      self.request(Request::NotiVolume(level)).await
   }

   pub async fn set_swipe_mode(&self, mode: SwipeMode) -> Result<()> {
      self.request(Request::SwipeMode(mode)).await
   }

   pub async fn set_swipe_length(&self, length: SwipeLength) -> Result<()> {
      self.request(Request::SwipeLength(length)).await
   }

   pub async fn set_press_speed(&self, speed: PressSpeed) -> Result<()> {
      self.request(Request::PressSpeed(speed)).await
   }

   pub async fn set_press_duration(&self, duration: PressDuration) -> Result<()> {
      self.request(Request::PressDuration(duration)).await
   }
}

#[cfg(test)]
mod tests {
   use futures::stream::{self, BoxStream};

   use super::*;
   use crate::{
      aap::{
         capability::{Capabilities, Capability},
         protocol::{PKT_HANDSHAKE, PKT_REQUEST_NOTIFICATIONS, PKT_SET_SPECIFIC_FEATURES, Protocol},
         session::HANDSHAKE_DELAY,
      },
      event::SessionEvent,
   };

   impl Transport for mpsc::UnboundedSender<Packet> {
      fn send(&mut self, packet: &[u8]) {
         // The harness may drop its receiver before the session ends.
         let _ = mpsc::UnboundedSender::send(self, Packet::from_slice(packet));
      }
   }

   struct Harness {
      handle: SessionHandle,
      inbound: mpsc::UnboundedSender<Result<Packet>>,
      outbound: mpsc::UnboundedReceiver<Packet>,
      events: mpsc::UnboundedReceiver<SessionEvent>,
   }

   fn start(caps: Capabilities) -> Harness {
      let (out_tx, outbound) = mpsc::unbounded_channel();
      let (ev_tx, events) = mpsc::unbounded_channel();
      let (inbound, in_rx) = mpsc::unbounded_channel();
      let rx: BoxStream<'static, Result<Packet>> =
         stream::unfold(in_rx, |mut rx| async move { rx.recv().await.map(|p| (p, rx)) }).boxed();
      let session = Session::new(&Protocol::AIRPODS, caps, out_tx, ev_tx);
      Harness {
         handle: spawn(session, rx),
         inbound,
         outbound,
         events,
      }
   }

   async fn next_sent(h: &mut Harness) -> Option<Packet> {
      h.outbound.recv().await
   }

   #[tokio::test(start_paused = true)]
   async fn test_handshake_waits_before_requesting_notifications() {
      let mut h = start(Capabilities::NONE);
      let t0 = Instant::now();

      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_HANDSHAKE));
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_REQUEST_NOTIFICATIONS));
      assert!(t0.elapsed() >= HANDSHAKE_DELAY);

      h.handle.destroy().await;
      assert_eq!(next_sent(&mut h).await, None);
   }

   #[tokio::test(start_paused = true)]
   async fn test_handshake_with_awareness_negotiates_first() {
      let mut h = start(Capabilities::NONE.with(Capability::Awareness));
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_HANDSHAKE));
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_SET_SPECIFIC_FEATURES));
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_REQUEST_NOTIFICATIONS));
      h.handle.destroy().await;
   }

   #[tokio::test(start_paused = true)]
   async fn test_destroy_cancels_pending_timer() {
      let mut h = start(Capabilities::ALL);
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_HANDSHAKE));
      assert_eq!(next_sent(&mut h).await.as_deref(), Some(PKT_SET_SPECIFIC_FEATURES));

      h.handle.destroy().await;
      h.handle.destroy().await;
      time::advance(HANDSHAKE_DELAY * 2).await;

      assert_eq!(next_sent(&mut h).await, None);
      assert!(h.handle.is_finished());
      assert!(matches!(
         h.handle.set_anc_mode(NoiseControlMode::Anc).await,
         Err(AapError::SessionClosed)
      ));
   }

   #[tokio::test(start_paused = true)]
   async fn test_packets_and_requests_flow_through_task() {
      let mut h = start(Capabilities::ALL);
      for _ in 0..3 {
         next_sent(&mut h).await;
      }

      let pkt = [0x04, 0x00, 0x04, 0x00, 0x09, 0x00, 0x0d, 0x02, 0x00, 0x00, 0x00];
      h.inbound.send(Ok(Packet::from_slice(&pkt))).unwrap();
      assert_eq!(
         h.events.recv().await,
         Some(SessionEvent::AncMode(NoiseControlMode::Anc))
      );

      h.handle.set_noti_volume(100).await.unwrap();
      let sent = next_sent(&mut h).await.unwrap();
      assert_eq!(sent[Protocol::AIRPODS.commands.tone_volume.header.len()], 100);
      h.handle.destroy().await;
   }

   #[tokio::test(start_paused = true)]
   async fn test_transport_error_ends_session() {
      let mut h = start(Capabilities::NONE);
      h.inbound.send(Err(AapError::ConnectionLost)).unwrap();
      h.handle.closed().await;
      assert!(h.handle.is_finished());
      assert!(h.events.recv().await.is_none());
   }
}
