//! AAP session daemon.
//!
//! Connects to one configured device over L2CAP, runs the handshake and
//! logs every decoded state update as JSON.

use std::{env, sync::Arc, time::Duration};

use aapd::{
   aap::{driver, protocol::Protocol, session::Session},
   bluetooth::l2cap,
   config::Config,
   error::Result,
   event::{EventBus, SessionEvent},
};
use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{select, signal, sync::Notify, task::JoinSet, time};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting aapd...");

   let config = Config::load()?;
   info!(
      "Loaded configuration with {} known devices",
      config.known_devices.len()
   );

   let arg = env::args().nth(1);
   let device = config.select_device(arg.as_deref())?;
   let address = device.bd_address()?;
   let caps = device.capabilities();
   info!(
      "Connecting to {} ({address}, {}) with {caps:?}",
      device.name, device.model
   );

   let mut jset = JoinSet::new();
   let (receiver, sender) = l2cap::connect(&mut jset, address, None).await?;

   let events = EventProcessor::new();
   let logger = tokio::spawn(events.clone().log_events(address.to_string()));

   let session = Session::new(&Protocol::AIRPODS, caps, sender, events)
      .with_label(address.to_string());
   let mut handle = driver::spawn(session, receiver.into_stream());

   select! {
      res = signal::ctrl_c() => {
         res?;
         info!("Shutting down aapd...");
      },
      () = handle.closed() => {
         warn!("{address}: Session ended");
      },
   }

   handle.destroy().await;
   jset.shutdown().await;
   let _ = logger.await;

   Ok(())
}

struct EventQueue {
   queue: SegQueue<SessionEvent>,
   notifier: Notify,
}

/// Session sink handing events to the logging task.
#[derive(Clone)]
struct EventProcessor(Arc<EventQueue>);

impl EventProcessor {
   fn new() -> Self {
      Self(Arc::new(EventQueue {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      }))
   }

   async fn recv(&self) -> Option<SessionEvent> {
      loop {
         if let Some(event) = self.0.queue.pop() {
            return Some(event);
         }
         let notify = self.0.notifier.notified();
         if let Some(event) = self.0.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(&self.0) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn log_events(self, label: String) {
      while let Some(event) = self.recv().await {
         info!("{label}: {}", event.to_json());
      }
   }
}

impl EventBus for EventProcessor {
   fn emit(&mut self, event: SessionEvent) {
      self.0.queue.push(event);
      self.0.notifier.notify_waiters();
   }
}
