//! Notification burst sent after a client enables notifications.

use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use log::{error, info, warn};
use rand_core::RngCore;

use crate::config::{BurstConfig, NOTIFY_LEN};
use crate::lifecycle::ConnectionTracker;
use crate::service::ValueHandle;

/// Sends a notification on a connection. Implemented by the platform stack.
#[allow(async_fn_in_trait)]
pub trait Notifier<C> {
    type Error: Debug;

    async fn notify(&mut self, conn: &C, handle: ValueHandle, data: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstOutcome {
    /// Priming packet plus every random packet was attempted.
    Completed,
    /// Nothing was sent, there was no connection.
    NotConnected,
    /// Random packet `iteration` (1-based) failed; the rest were dropped.
    SendFailed { iteration: usize },
    /// The connection went away before random packet `iteration` was sent.
    Disconnected { iteration: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    /// Notifications handed to the stack, priming packet included.
    pub attempted: usize,
    /// Notifications the stack accepted.
    pub delivered: usize,
    pub outcome: BurstOutcome,
}

pub struct BurstEngine<R> {
    rng: R,
    config: BurstConfig,
}

impl<R: RngCore> BurstEngine<R> {
    pub fn new(rng: R, config: BurstConfig) -> Self {
        Self { rng, config }
    }

    /// Stream one burst to the tracked connection.
    ///
    /// The first packet is all zeroes and its failure is only logged. Each of
    /// the following random packets is sent only while the connection that was
    /// current at the start is still tracked; a failed send ends the burst.
    pub async fn run<M, C, N>(
        &mut self,
        tracker: &ConnectionTracker<M, C>,
        notifier: &mut N,
        handle: ValueHandle,
    ) -> BurstReport
    where
        M: RawMutex,
        C: Clone,
        N: Notifier<C>,
    {
        let mut report = BurstReport {
            attempted: 0,
            delivered: 0,
            outcome: BurstOutcome::Completed,
        };

        let Some((conn, lease)) = tracker.lease() else {
            warn!("Notifications enabled without a connection");
            report.outcome = BurstOutcome::NotConnected;
            return report;
        };

        let mut msg = [0u8; NOTIFY_LEN];
        report.attempted += 1;
        match notifier.notify(&conn, handle, &msg).await {
            Ok(()) => {
                report.delivered += 1;
                info!("Notify msg ok");
            }
            Err(e) => error!("Notify msg failed: {:?}", e),
        }

        for iteration in 1..=self.config.packets {
            if !tracker.is_live(&lease) {
                warn!("Connection lost, dropping burst at packet {}", iteration);
                report.outcome = BurstOutcome::Disconnected { iteration };
                return report;
            }

            self.rng.fill_bytes(&mut msg);
            report.attempted += 1;
            if let Err(e) = notifier.notify(&conn, handle, &msg).await {
                error!("Notify {} failed: {:?}", iteration, e);
                report.outcome = BurstOutcome::SendFailed { iteration };
                return report;
            }
            report.delivered += 1;
            info!("Notify {} ok", iteration);

            if iteration < self.config.packets {
                Timer::after(self.config.interval).await;
            }
        }

        report
    }
}
