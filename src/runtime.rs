// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Controller task
//!
//! Runs a [`Controller`] as a tokio task fed by a bounded inbox, plus two
//! ticker tasks for the one-second and fine timers. Transports hand frames
//! over through [`ControllerHandle`], which pushes into the inbound queue
//! before posting the pending notification.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::controller::{Controller, ControllerMessage};
use crate::error::{HaError, Result};
use crate::frame::split_frames;
use crate::message::Origin;
use crate::queue::SharedFrameQueue;

/// Receive messages until the inbox closes or a shutdown is handled
pub async fn run(
    mut controller: Controller,
    mut inbox: mpsc::Receiver<ControllerMessage>,
) -> Controller {
    info!("controller task started");
    while let Some(message) = inbox.recv().await {
        if !controller.handle(message) {
            break;
        }
    }
    info!("controller task stopped");
    controller
}

async fn ticker<F>(tx: mpsc::Sender<ControllerMessage>, period: Duration, message: F)
where
    F: Fn() -> ControllerMessage,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    timer.tick().await;
    loop {
        timer.tick().await;
        if tx.send(message()).await.is_err() {
            debug!("ticker stopped, controller gone");
            break;
        }
    }
}

/// Inbound queue of one transport plus the controller inbox
#[derive(Debug, Clone)]
pub struct FrameSink {
    origin: Origin,
    queue: SharedFrameQueue,
    tx: mpsc::Sender<ControllerMessage>,
}

impl FrameSink {
    /// Side this sink feeds
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Push a datagram of whole frames, then tell the controller it is pending
    ///
    /// A datagram that is not exactly a run of well-formed frames is rejected
    /// before it reaches the queue.
    pub async fn submit(&self, datagram: &[u8]) -> Result<()> {
        split_frames(datagram)?;
        self.queue.push(datagram)?;
        let pending = match self.origin {
            Origin::Radio => ControllerMessage::RadioGffPending(self.queue.clone()),
            Origin::Ble => ControllerMessage::BleGffPending(self.queue.clone()),
        };
        self.tx.send(pending).await.map_err(|_| HaError::Stopped)
    }
}

/// Handle on a spawned controller task
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerMessage>,
    radio_inbound: SharedFrameQueue,
    ble_inbound: SharedFrameQueue,
    task: JoinHandle<Controller>,
    tickers: Vec<JoinHandle<()>>,
}

/// Restore `controller` state and run it with its tickers
///
/// Must be called from inside a tokio runtime.
pub fn spawn(mut controller: Controller) -> ControllerHandle {
    controller.start();

    let config = controller.config().clone();
    let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
    let radio_inbound = controller.radio_inbound().clone();
    let ble_inbound = controller.ble_inbound().clone();

    let fine_ms = config.fine_tick_ms.max(1);
    let tickers = vec![
        tokio::spawn(ticker(tx.clone(), Duration::from_secs(1), || {
            ControllerMessage::OneSecondTick
        })),
        tokio::spawn(ticker(
            tx.clone(),
            Duration::from_millis(fine_ms as u64),
            move || ControllerMessage::FineTick {
                elapsed_ms: fine_ms,
            },
        )),
    ];

    ControllerHandle {
        task: tokio::spawn(run(controller, rx)),
        tx,
        radio_inbound,
        ble_inbound,
        tickers,
    }
}

impl ControllerHandle {
    /// Sender for raw controller messages
    pub fn sender(&self) -> mpsc::Sender<ControllerMessage> {
        self.tx.clone()
    }

    /// Inbound side for one transport
    pub fn sink(&self, origin: Origin) -> FrameSink {
        let queue = match origin {
            Origin::Radio => self.radio_inbound.clone(),
            Origin::Ble => self.ble_inbound.clone(),
        };
        FrameSink {
            origin,
            queue,
            tx: self.tx.clone(),
        }
    }

    /// Hand a frame received from `origin` to the controller
    pub async fn submit(&self, origin: Origin, frame: &[u8]) -> Result<()> {
        self.sink(origin).submit(frame).await
    }

    /// Stop the tickers, save state and return the controller
    pub async fn shutdown(self) -> Result<Controller> {
        for ticker in &self.tickers {
            ticker.abort();
        }
        if self.tx.send(ControllerMessage::Shutdown).await.is_err() {
            debug!("controller task already stopped");
        }
        drop(self.tx);
        self.task.await.map_err(|_| HaError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{device_type, DeviceId};
    use crate::config::ControllerConfig;
    use crate::controller::OutboundNotice;
    use crate::message::GffMessage;

    const BUTTON: DeviceId = DeviceId::new(1, 1, 0, device_type::BUTTON);

    #[tokio::test(start_paused = true)]
    async fn test_report_then_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn(Controller::new(ControllerConfig::with_storage_root(dir.path())));

        let report = GffMessage::SetDevVal {
            device_id: BUTTON,
            value: 1,
        };
        handle.submit(Origin::Radio, &report.to_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let controller = handle.shutdown().await.unwrap();
        assert_eq!(controller.registry().get_value(BUTTON), Some(1));
        assert_eq!(controller.registry().get_ttl(BUTTON), Some(28));
        assert!(dir.path().join("dev_lst").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_reaches_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(ControllerConfig::with_storage_root(dir.path()));
        let (tx, mut rx) = mpsc::channel::<OutboundNotice>(4);
        controller.notify_ble(tx);
        let handle = spawn(controller);

        handle
            .submit(Origin::Ble, &GffMessage::GetNumOfDevs.to_bytes())
            .await
            .unwrap();
        let notice = rx.recv().await.unwrap();
        let frame = notice.queue.pop_frame().unwrap().unwrap();
        assert_eq!(
            GffMessage::from_bytes(&frame).unwrap(),
            GffMessage::SetNumOfDevs { count: 0 }
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_datagram_never_reaches_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(ControllerConfig::with_storage_root(dir.path()));
        controller.start();
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink {
            origin: Origin::Radio,
            queue: controller.radio_inbound().clone(),
            tx,
        };

        let truncated = [6, 0x00, 0x00, 1, 2];
        let result = sink.submit(&truncated).await;
        assert!(matches!(result, Err(HaError::Frame(_))));
        assert_eq!(controller.radio_inbound().occupied_size(), 0);

        let alive = GffMessage::Alive { device_id: BUTTON };
        sink.submit(&alive.to_bytes()).await.unwrap();
        let pending = rx.recv().await.unwrap();
        assert!(controller.handle(pending));

        // ALIVE for an unknown device stores nothing
        assert_eq!(controller.registry().len(), 0);
        assert_eq!(controller.radio_inbound().occupied_size(), 0);

        let report = GffMessage::SetDevVal {
            device_id: BUTTON,
            value: 1,
        };
        sink.submit(&report.to_bytes()).await.unwrap();
        assert!(controller.handle(rx.recv().await.unwrap()));
        assert_eq!(controller.registry().len(), 1);
        assert_eq!(controller.registry().get_value(BUTTON), Some(1));
    }

    #[tokio::test]
    async fn test_shutdown_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn(Controller::new(ControllerConfig::with_storage_root(dir.path())));
        handle.sender().send(ControllerMessage::Shutdown).await.unwrap();
        while !handle.task.is_finished() {
            tokio::task::yield_now().await;
        }
        let controller = handle.shutdown().await.unwrap();
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn(Controller::new(ControllerConfig::with_storage_root(dir.path())));
        handle.sender().send(ControllerMessage::Shutdown).await.unwrap();
        // Give the task a chance to exit
        while !handle.task.is_finished() {
            tokio::task::yield_now().await;
        }
        let result = handle
            .submit(Origin::Radio, &GffMessage::GetNumOfDevs.to_bytes())
            .await;
        assert!(matches!(result, Err(HaError::Stopped)));
    }
}
