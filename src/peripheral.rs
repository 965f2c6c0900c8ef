use embassy_sync::blocking_mutex::raw::RawMutex;
use rand_core::RngCore;

use crate::burst::{BurstEngine, BurstReport, Notifier};
use crate::error::AttError;
use crate::lifecycle::ConnectionTracker;
use crate::service::{GattServer, ServiceDescriptor, WriteOutcome};

/// Routes stack events to the attribute server and the connection tracker.
pub struct Peripheral<M: RawMutex, C> {
    server: GattServer,
    tracker: ConnectionTracker<M, C>,
}

impl<M: RawMutex, C: Clone> Peripheral<M, C> {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            server: GattServer::new(descriptor),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn server(&self) -> &GattServer {
        &self.server
    }

    pub fn tracker(&self) -> &ConnectionTracker<M, C> {
        &self.tracker
    }

    pub fn connected(&self, conn: C, status: u8) -> bool {
        self.tracker.on_connected(conn, status)
    }

    pub fn disconnected(&self, reason: u8) -> Option<C> {
        let released = self.tracker.on_disconnected(reason);
        self.server.reset_ccc();
        released
    }

    pub fn read(&self, handle: u16, offset: u16, buf: &mut [u8]) -> Result<usize, AttError> {
        self.server.read(handle, offset, buf)
    }

    /// A [`WriteOutcome::NotificationsEnabled`] result asks the caller to run
    /// [`Peripheral::notify_burst`].
    pub fn write(&self, handle: u16, offset: u16, data: &[u8]) -> Result<WriteOutcome, AttError> {
        self.server.write(handle, offset, data)
    }

    pub async fn notify_burst<R, N>(&self, engine: &mut BurstEngine<R>, notifier: &mut N) -> BurstReport
    where
        R: RngCore,
        N: Notifier<C>,
    {
        engine
            .run(&self.tracker, notifier, self.server.handles().value)
            .await
    }
}
