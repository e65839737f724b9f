//! L2CAP socket transport for AAP sessions.
//!
//! This module provides async L2CAP socket handling with separate
//! sender and receiver tasks. The sender half implements the session's
//! fire-and-forget [`Transport`]; the receiver half is a packet stream.

use std::{sync::Arc, time::Duration};

use bluer::{
   Address, AddressType,
   l2cap::{SeqPacket, Socket, SocketAddr},
};
use futures::{Stream, stream};
use log::{debug, warn};
use tokio::{sync::mpsc, task::JoinSet, time};

use crate::{
   aap::{protocol::Packet, session::Transport},
   error::{AapError, Result},
};

/// PSM (Protocol Service Multiplexer) for the AAP control channel
const PSM_CONTROL: u16 = 0x1001;
/// Maximum transmission unit for L2CAP packets
const L2CAP_MTU: usize = 672;
/// Timeout for connection attempts
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Depth of the inbound and outbound queues
const QUEUE_DEPTH: usize = 128;

/// Receiver half of an L2CAP connection.
#[derive(Debug)]
pub struct L2CapReceiver {
   rx: mpsc::Receiver<Result<Packet>>,
}

impl L2CapReceiver {
   pub async fn recv(&mut self) -> Result<Packet> {
      self.rx.recv().await.ok_or(AapError::ConnectionClosed)?
   }

   /// Turns the receiver into a stream that ends after the first error.
   pub fn into_stream(self) -> impl Stream<Item = Result<Packet>> + Send + Unpin {
      Box::pin(stream::unfold(Some(self), |this| async move {
         let mut this = this?;
         match this.recv().await {
            Ok(packet) => Some((Ok(packet), Some(this))),
            Err(e) => Some((Err(e), None)),
         }
      }))
   }
}

/// Sender half of an L2CAP connection.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct L2CapSender {
   tx: mpsc::Sender<Packet>,
}

impl L2CapSender {
   pub fn is_connected(&self) -> bool {
      !self.tx.is_closed()
   }

   /// Queues `data` for the writer task without waiting for it to be written.
   pub fn post(&self, data: &[u8]) -> Result<()> {
      self.tx.try_send(Packet::from_slice(data)).map_err(|e| match e {
         mpsc::error::TrySendError::Full(_) => AapError::QueueFull,
         mpsc::error::TrySendError::Closed(_) => AapError::ConnectionClosed,
      })
   }
}

impl Transport for L2CapSender {
   fn send(&mut self, packet: &[u8]) {
      if let Err(e) = self.post(packet) {
         warn!("Dropping outgoing packet {}: {e}", hex::encode(packet));
      }
   }
}

/// Opens the AAP control channel to `address`.
///
/// The reader and writer tasks are spawned onto `jset`, so dropping the set
/// closes the connection.
pub async fn connect(
   jset: &mut JoinSet<()>,
   address: Address,
   psm: Option<u16>,
) -> Result<(L2CapReceiver, L2CapSender)> {
   debug!("Creating L2CAP socket for {address}");

   let socket = Socket::new_seq_packet()?;
   let psm = psm.unwrap_or(PSM_CONTROL);
   let addr = SocketAddr::new(address, AddressType::BrEdr, psm);
   debug!("Connecting to {address}:{psm}");

   let seq_packet = time::timeout(CONNECT_TIMEOUT, socket.connect(addr))
      .await
      .map_err(|_| AapError::RequestTimeout)??;

   let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_DEPTH);
   let (in_tx, in_rx) = mpsc::channel(QUEUE_DEPTH);

   let seq_packet = Arc::new(seq_packet);
   jset.spawn(recv_thread(address, in_tx, seq_packet.clone()));
   jset.spawn(send_thread(address, cmd_rx, seq_packet));

   Ok((L2CapReceiver { rx: in_rx }, L2CapSender { tx: cmd_tx }))
}

async fn recv_thread(adr: Address, tx: mpsc::Sender<Result<Packet>>, sp: Arc<SeqPacket>) {
   let mut stack = [0u8; L2CAP_MTU];
   loop {
      let n = match sp.recv(&mut stack).await {
         Ok(n) => n,
         Err(e) => {
            warn!("{adr}: Receive failed: {e}");
            let _ = tx.send(Err(AapError::Io(e))).await;
            return;
         },
      };
      if n == 0 {
         warn!("{adr}: Connection lost");
         let _ = tx.send(Err(AapError::ConnectionLost)).await;
         return;
      }
      let recvd = &stack[..n];
      debug!("← {adr}: {}", hex::encode(recvd));
      if let Err(e) = tx.send(Ok(Packet::from_slice(recvd))).await {
         warn!("Failed to forward data: {e:?}");
         return;
      }
      stack[..n].fill(0);
   }
}

async fn send_thread(adr: Address, mut rx: mpsc::Receiver<Packet>, sp: Arc<SeqPacket>) {
   while let Some(data) = rx.recv().await {
      debug!("→ {adr}: {}", hex::encode(&data));
      if let Err(e) = sp.send(&data).await {
         warn!("{adr}: Failed to send data: {e}");
      }
   }
   debug!("{adr}: Writer shut down");
}

#[cfg(test)]
mod tests {
   use futures::StreamExt;

   use super::*;

   #[tokio::test]
   async fn test_sender_posts_without_waiting() {
      let (tx, mut rx) = mpsc::channel(1);
      let mut sender = L2CapSender { tx };
      Transport::send(&mut sender, &[0x01, 0x02]);
      assert_eq!(rx.recv().await.as_deref(), Some(&[0x01, 0x02][..]));

      sender.post(&[0x03]).unwrap();
      assert!(matches!(sender.post(&[0x04]), Err(AapError::QueueFull)));

      drop(rx);
      assert!(!sender.is_connected());
      assert!(matches!(sender.post(&[0x03]), Err(AapError::ConnectionClosed)));
   }

   #[tokio::test]
   async fn test_receiver_stream_ends_after_error() {
      let (tx, rx) = mpsc::channel(4);
      tx.send(Ok(Packet::from_slice(&[0xaa]))).await.unwrap();
      tx.send(Err(AapError::ConnectionLost)).await.unwrap();
      tx.send(Ok(Packet::from_slice(&[0xbb]))).await.unwrap();

      let items: Vec<_> = L2CapReceiver { rx }.into_stream().collect().await;
      assert_eq!(items.len(), 2);
      assert!(matches!(&items[0], Ok(p) if p.as_slice() == [0xaa]));
      assert!(matches!(&items[1], Err(AapError::ConnectionLost)));
   }
}
