// HA Coordinator - Home-automation coordinator daemon
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! UDP transport bridges.
//!
//! Each side (radio border router, BLE serial bridge) is reached through
//! one UDP socket. Every datagram must carry whole GFF frames; any other
//! datagram is dropped. Outbound frames go to the configured peer, or to
//! the last address heard from.

use std::net::SocketAddr;

use ha_controller::{FrameSink, HaError, OutboundNotice, SharedFrameQueue};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Datagram buffer size, larger than any GFF frame
const DATAGRAM_SIZE: usize = 2048;

/// One UDP side of the coordinator
pub struct Bridge {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    fixed_peer: bool,
    sink: FrameSink,
    notices: mpsc::Receiver<OutboundNotice>,
}

impl Bridge {
    /// Bind `bind` and feed frames into `sink`
    pub async fn bind(
        bind: SocketAddr,
        peer: Option<SocketAddr>,
        sink: FrameSink,
        notices: mpsc::Receiver<OutboundNotice>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        info!(
            "{:?} bridge listening on {}",
            sink.origin(),
            socket.local_addr()?
        );
        Ok(Self {
            socket,
            fixed_peer: peer.is_some(),
            peer,
            sink,
            notices,
        })
    }

    /// Shuttle frames until the controller stops
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut buf = [0u8; DATAGRAM_SIZE];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    if !self.fixed_peer {
                        self.peer = Some(from);
                    }
                    match self.sink.submit(&buf[..len]).await {
                        Ok(()) => {}
                        Err(HaError::Stopped) => break,
                        Err(e) => warn!("{:?} frame from {} dropped: {}", self.sink.origin(), from, e),
                    }
                }
                notice = self.notices.recv() => match notice {
                    Some(notice) => self.flush(&notice.queue).await?,
                    None => break,
                },
            }
        }
        debug!("{:?} bridge stopped", self.sink.origin());
        Ok(())
    }

    async fn flush(&self, queue: &SharedFrameQueue) -> std::io::Result<()> {
        loop {
            let frame = match queue.pop_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("{} unreadable, clearing: {}", queue.name(), e);
                    queue.clear();
                    return Ok(());
                }
            };
            match self.peer {
                Some(peer) => {
                    self.socket.send_to(&frame, peer).await?;
                }
                None => debug!("{}: no peer yet, frame dropped", queue.name()),
            }
        }
    }
}
