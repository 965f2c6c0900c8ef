//! Stack bring-up and advertising.

use core::fmt::Debug;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use embassy_time::{Timer, with_timeout};
use log::{debug, error, info};

use crate::advertising::{LEGACY_AD_LEN, encode_advertising_data, encode_scan_response};
use crate::config::{BootConfig, DEVICE_NAME};
use crate::error::Error;
use crate::service::{ServiceDescriptor, ServiceHandles};

/// The platform BLE stack as seen by the bootstrap.
#[allow(async_fn_in_trait)]
pub trait BleStack {
    type Error: Debug;

    /// Request the stack to come up. Completion is reported through
    /// `readiness`, possibly after this returns.
    async fn enable(&mut self, readiness: &Readiness) -> Result<(), Self::Error>;

    /// Start connectable, scannable advertising with the given payloads.
    async fn start_advertising(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    Pending,
    Ready,
    Failed(i32),
}

/// Completion cell for the stack's readiness callback.
///
/// Lock-free so it can be completed from the stack's own context. Every `i32`
/// is a valid status; completion is tracked separately.
pub struct Readiness {
    done: AtomicBool,
    status: AtomicI32,
}

impl Readiness {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            status: AtomicI32::new(0),
        }
    }

    /// Readiness callback. `status` is zero on success, the stack's error otherwise.
    pub fn complete(&self, status: i32) {
        if status == 0 {
            info!("BLE stack ready");
        } else {
            error!("BLE enable failed (err {})", status);
        }
        self.status.store(status, Ordering::Relaxed);
        self.done.store(true, Ordering::Release);
    }

    pub fn status(&self) -> ReadyStatus {
        if !self.done.load(Ordering::Acquire) {
            return ReadyStatus::Pending;
        }
        match self.status.load(Ordering::Relaxed) {
            0 => ReadyStatus::Ready,
            err => ReadyStatus::Failed(err),
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Uninitialized,
    StackEnabling,
    StackReady,
    Advertising,
    Failed,
}

pub struct Bootstrap<'r> {
    state: BootState,
    readiness: &'r Readiness,
    descriptor: &'r ServiceDescriptor,
    config: BootConfig,
}

impl<'r> Bootstrap<'r> {
    pub fn new(readiness: &'r Readiness, descriptor: &'r ServiceDescriptor, config: BootConfig) -> Self {
        Self {
            state: BootState::Uninitialized,
            readiness,
            descriptor,
            config,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Enable, wait for readiness, then advertise.
    pub async fn run<S: BleStack>(&mut self, stack: &mut S) -> Result<ServiceHandles, Error<S::Error>> {
        self.init(stack).await?;
        self.wait_ready::<S::Error>().await?;
        self.start(stack).await
    }

    pub async fn init<S: BleStack>(&mut self, stack: &mut S) -> Result<(), Error<S::Error>> {
        info!("Initializing BLE...");
        self.state = BootState::StackEnabling;
        stack.enable(self.readiness).await.map_err(|e| {
            error!("bt enable failed: {:?}", e);
            self.state = BootState::Failed;
            Error::Enable(e)
        })
    }

    /// Poll the readiness cell until the stack answers or the timeout expires.
    pub async fn wait_ready<E: Debug>(&mut self) -> Result<(), Error<E>> {
        let poll = self.config.ready_poll;
        let readiness = self.readiness;
        let answer = with_timeout(self.config.ready_timeout, async {
            loop {
                match readiness.status() {
                    ReadyStatus::Ready => return Ok(()),
                    ReadyStatus::Failed(err) => return Err(err),
                    ReadyStatus::Pending => {
                        debug!("BLE stack not ready");
                        Timer::after(poll).await;
                    }
                }
            }
        })
        .await;

        match answer {
            Ok(Ok(())) => {
                info!("BLE ready");
                self.state = BootState::StackReady;
                Ok(())
            }
            Ok(Err(err)) => {
                self.state = BootState::Failed;
                Err(Error::NotReady(err))
            }
            Err(_) => {
                error!("BLE stack not ready after {} ms", self.config.ready_timeout.as_millis());
                self.state = BootState::Failed;
                Err(Error::ReadyTimeout)
            }
        }
    }

    /// Resolve the notify handle and start advertising.
    pub async fn start<S: BleStack>(&mut self, stack: &mut S) -> Result<ServiceHandles, Error<S::Error>> {
        let handles = self.descriptor.handles();

        let mut adv_data = [0u8; LEGACY_AD_LEN];
        let mut scan_data = [0u8; LEGACY_AD_LEN];
        let adv_len = encode_advertising_data(&mut adv_data).map_err(|_| Error::Encode)?;
        let scan_len = encode_scan_response(DEVICE_NAME, &mut scan_data).map_err(|_| Error::Encode)?;

        if let Err(e) = stack
            .start_advertising(&adv_data[..adv_len], &scan_data[..scan_len])
            .await
        {
            error!("advertising failed to start: {:?}", e);
            self.state = BootState::Failed;
            return Err(Error::Advertise(e));
        }

        info!("advertising done");
        self.state = BootState::Advertising;
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::{Duration, Instant};

    use super::*;

    #[derive(Default)]
    struct FakeStack {
        enable_err: Option<i32>,
        ready_status: Option<i32>,
        adv_err: Option<i32>,
        advertised: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl BleStack for FakeStack {
        type Error = i32;

        async fn enable(&mut self, readiness: &Readiness) -> Result<(), i32> {
            if let Some(err) = self.enable_err {
                return Err(err);
            }
            if let Some(status) = self.ready_status {
                readiness.complete(status);
            }
            Ok(())
        }

        async fn start_advertising(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), i32> {
            if let Some(err) = self.adv_err {
                return Err(err);
            }
            self.advertised.push((adv_data.to_vec(), scan_data.to_vec()));
            Ok(())
        }
    }

    fn quick() -> BootConfig {
        BootConfig {
            ready_poll: Duration::from_millis(5),
            ready_timeout: Duration::from_millis(100),
        }
    }

    static DESCRIPTOR: ServiceDescriptor = ServiceDescriptor::register(1);

    #[test]
    fn readiness_cell_transitions() {
        let readiness = Readiness::new();
        assert_eq!(readiness.status(), ReadyStatus::Pending);
        readiness.complete(0);
        assert_eq!(readiness.status(), ReadyStatus::Ready);

        let failed = Readiness::new();
        failed.complete(-5);
        assert_eq!(failed.status(), ReadyStatus::Failed(-5));

        let extreme = Readiness::new();
        extreme.complete(i32::MIN);
        assert_eq!(extreme.status(), ReadyStatus::Failed(i32::MIN));
    }

    #[test]
    fn any_failure_status_ends_the_wait() {
        let readiness = Readiness::new();
        let mut stack = FakeStack {
            ready_status: Some(i32::MIN),
            ..FakeStack::default()
        };
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        let start = Instant::now();
        assert_eq!(block_on(boot.run(&mut stack)), Err(Error::NotReady(i32::MIN)));
        assert!(start.elapsed() < quick().ready_timeout);
        assert_eq!(boot.state(), BootState::Failed);
    }

    #[test]
    fn reaches_advertising_within_poll_bound() {
        let readiness = Readiness::new();
        let mut stack = FakeStack {
            ready_status: Some(0),
            ..FakeStack::default()
        };
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());
        assert_eq!(boot.state(), BootState::Uninitialized);

        let start = Instant::now();
        let handles = block_on(boot.run(&mut stack)).unwrap();
        assert!(start.elapsed() < quick().ready_poll * 2);
        assert_eq!(boot.state(), BootState::Advertising);
        assert_eq!(handles, DESCRIPTOR.handles());

        let (adv, scan) = &stack.advertised[0];
        assert_eq!(adv.len(), 17);
        assert_eq!(scan[1], crate::advertising::AD_COMPLETE_LOCAL_NAME);
    }

    #[test]
    fn waits_for_late_readiness() {
        let readiness = Readiness::new();
        let mut stack = FakeStack::default();
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        let (result, ()) = block_on(join(boot.run(&mut stack), async {
            Timer::after(Duration::from_millis(20)).await;
            readiness.complete(0);
        }));
        assert!(result.is_ok());
        assert_eq!(stack.advertised.len(), 1);
    }

    #[test]
    fn enable_failure_is_fatal() {
        let readiness = Readiness::new();
        let mut stack = FakeStack {
            enable_err: Some(-19),
            ..FakeStack::default()
        };
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        assert_eq!(block_on(boot.run(&mut stack)), Err(Error::Enable(-19)));
        assert_eq!(boot.state(), BootState::Failed);
        assert!(stack.advertised.is_empty());
    }

    #[test]
    fn readiness_failure_is_terminal() {
        let readiness = Readiness::new();
        let mut stack = FakeStack {
            ready_status: Some(-11),
            ..FakeStack::default()
        };
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        assert_eq!(block_on(boot.run(&mut stack)), Err(Error::NotReady(-11)));
        assert_eq!(boot.state(), BootState::Failed);
        assert!(stack.advertised.is_empty());
    }

    #[test]
    fn silent_stack_times_out() {
        let readiness = Readiness::new();
        let mut stack = FakeStack::default();
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        assert_eq!(block_on(boot.run(&mut stack)), Err(Error::ReadyTimeout));
        assert_eq!(boot.state(), BootState::Failed);
    }

    #[test]
    fn advertising_failure_is_reported() {
        let readiness = Readiness::new();
        let mut stack = FakeStack {
            ready_status: Some(0),
            adv_err: Some(-12),
            ..FakeStack::default()
        };
        let mut boot = Bootstrap::new(&readiness, &DESCRIPTOR, quick());

        assert_eq!(block_on(boot.run(&mut stack)), Err(Error::Advertise(-12)));
        assert_eq!(boot.state(), BootState::Failed);
    }
}
