use bt_hci::cmd::le::LeReadLocalSupportedFeatures;
use bt_hci::controller::ControllerCmdSync;
use embassy_futures::join::join;
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::signal::Signal;
use gatt_burst::AttError;
use gatt_burst::advertising::LEGACY_AD_LEN;
use gatt_burst::bootstrap::{BleStack, Bootstrap, Readiness};
use gatt_burst::burst::{BurstEngine, Notifier};
use gatt_burst::config::{BootConfig, BurstConfig, DEVICE_NAME, READ_VALUE};
use gatt_burst::peripheral::Peripheral as Device;
use gatt_burst::service::{ServiceDescriptor, ValueHandle, WriteOutcome};
use log::{error, info, warn};
use rand::rngs::SmallRng;
use static_cell::StaticCell;
use trouble_host::gatt::GattConnectionEvent;
use trouble_host::prelude::*;

use crate::gatt::{BurstServer, Value};

const CONNECTIONS_MAX: usize = 1;
const L2CAP_CHANNELS_MAX: usize = 2; // Signal + att

const PERIPHERAL_ADDR_BYTES: [u8; 6] = [0xff, 0x1f, 0x1f, 0x1f, 0x1f, 0xc0];

static RESOURCES: StaticCell<
    HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX>,
> = StaticCell::new();

static SERVER: StaticCell<BurstServer<'static>> = StaticCell::new();

static READINESS: Readiness = Readiness::new();

type Tracked<'d> = Device<CriticalSectionRawMutex, Connection<'d, DefaultPacketPool>>;

/// [`BleStack`] on top of the trouble-host peripheral role.
struct TroubleStack<'p, 'd, 's, C: Controller> {
    stack: &'d Stack<'s, C, DefaultPacketPool>,
    peripheral: &'p mut Peripheral<'d, C, DefaultPacketPool>,
    advertiser: Option<Advertiser<'d, C, DefaultPacketPool>>,
    adv_data: [u8; LEGACY_AD_LEN],
    adv_len: usize,
    scan_data: [u8; LEGACY_AD_LEN],
    scan_len: usize,
}

impl<'p, 'd, 's, C: Controller> TroubleStack<'p, 'd, 's, C> {
    fn new(
        stack: &'d Stack<'s, C, DefaultPacketPool>,
        peripheral: &'p mut Peripheral<'d, C, DefaultPacketPool>,
    ) -> Self {
        Self {
            stack,
            peripheral,
            advertiser: None,
            adv_data: [0; LEGACY_AD_LEN],
            adv_len: 0,
            scan_data: [0; LEGACY_AD_LEN],
            scan_len: 0,
        }
    }

    /// The advertiser started by the bootstrap, or a fresh one with the same payloads.
    async fn advertiser(&mut self) -> Result<Advertiser<'d, C, DefaultPacketPool>, BleHostError<C::Error>> {
        if let Some(advertiser) = self.advertiser.take() {
            return Ok(advertiser);
        }
        info!("Advertising...");
        self.peripheral
            .advertise(
                &Default::default(),
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &self.adv_data[..self.adv_len],
                    scan_data: &self.scan_data[..self.scan_len],
                },
            )
            .await
    }
}

impl<C> BleStack for TroubleStack<'_, '_, '_, C>
where
    C: Controller + ControllerCmdSync<LeReadLocalSupportedFeatures>,
{
    type Error = BleHostError<C::Error>;

    /// The controller is up once it answers a command. A status error from
    /// the controller completes `readiness`; any other error means the
    /// command never reached it.
    async fn enable(&mut self, readiness: &Readiness) -> Result<(), Self::Error> {
        match self.stack.command(LeReadLocalSupportedFeatures::new()).await {
            Ok(_) => readiness.complete(0),
            Err(BleHostError::BleHost(trouble_host::Error::Hci(status))) => {
                readiness.complete(i32::from(status.to_status().into_inner()))
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn start_advertising(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), Self::Error> {
        self.adv_data[..adv_data.len()].copy_from_slice(adv_data);
        self.adv_len = adv_data.len();
        self.scan_data[..scan_data.len()].copy_from_slice(scan_data);
        self.scan_len = scan_data.len();

        let advertiser = self.advertiser().await?;
        self.advertiser = Some(advertiser);
        Ok(())
    }
}

/// [`Notifier`] sending through the characteristic of a GATT connection.
///
/// The tracked handle must be the link this notifier is bound to; a burst
/// that outlives its connection fails instead of reaching another peer.
struct GattNotifier<'a, 'd, 's> {
    conn: &'a GattConnection<'d, 's, DefaultPacketPool>,
    characteristic: Characteristic<Value>,
}

impl<'d> Notifier<Connection<'d, DefaultPacketPool>> for GattNotifier<'_, 'd, '_> {
    type Error = trouble_host::Error;

    async fn notify(
        &mut self,
        conn: &Connection<'d, DefaultPacketPool>,
        handle: ValueHandle,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        if conn.handle() != self.conn.raw().handle() {
            return Err(trouble_host::Error::Disconnected);
        }
        if handle.0 != self.characteristic.handle {
            return Err(trouble_host::Error::NotFound);
        }
        let value = Value::from_slice(data).map_err(|_| trouble_host::Error::InsufficientSpace)?;
        self.characteristic.notify(self.conn, &value).await
    }
}

pub async fn run<C>(controller: C, rng: SmallRng)
where
    C: Controller + ControllerCmdSync<LeReadLocalSupportedFeatures>,
{
    let address = Address::random(PERIPHERAL_ADDR_BYTES);
    info!("Starting BLE Stack with address {:?}", address);

    let resources = RESOURCES.init(HostResources::new());
    let stack = trouble_host::new(controller, resources).set_random_address(address);

    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let server = match BurstServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: DEVICE_NAME,
        appearance: &appearance::UNKNOWN,
    })) {
        Ok(server) => SERVER.init(server),
        Err(e) => {
            error!("Failed to build GATT server: {:?}", e);
            return;
        }
    };

    let descriptor = ServiceDescriptor::register(server.burst_service.handle);
    if descriptor.handles().value.0 != server.burst_service.data.handle {
        error!(
            "Attribute table mismatch: value at {}, expected {}",
            server.burst_service.data.handle,
            descriptor.handles().value.0
        );
        return;
    }

    let device: Tracked<'_> = Device::new(descriptor.clone());
    let mut engine = BurstEngine::new(rng, BurstConfig::default());

    let _ = join(runner.run(), async {
        let mut ble = TroubleStack::new(&stack, &mut peripheral);
        let mut boot = Bootstrap::new(&READINESS, &descriptor, BootConfig::default());

        if let Err(e) = boot.run(&mut ble).await {
            error!("BLE bring-up failed: {}", e);
            return;
        }

        loop {
            let advertiser = match ble.advertiser().await {
                Ok(advertiser) => advertiser,
                Err(e) => {
                    error!("advertising failed to start: {:?}", e);
                    return;
                }
            };

            let conn = match advertiser.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Connection failed: {:?}", e);
                    continue;
                }
            };

            let gatt_conn = match conn.with_attribute_server(server) {
                Ok(gatt_conn) => gatt_conn,
                Err(e) => {
                    warn!("Failed to attach GATT server: {:?}", e);
                    continue;
                }
            };

            device.connected(gatt_conn.raw().clone(), 0);
            serve(&device, server, &gatt_conn, &mut engine).await;
        }
    })
    .await;
}

/// Route GATT events of one connection until it closes.
///
/// Bursts run next to the event stream so that a disconnect is observed while
/// packets are still going out.
async fn serve<'d>(
    device: &Tracked<'d>,
    server: &BurstServer<'_>,
    conn: &GattConnection<'d, '_, DefaultPacketPool>,
    engine: &mut BurstEngine<SmallRng>,
) {
    let data = server.burst_service.data;
    let burst_requested: Signal<NoopRawMutex, ()> = Signal::new();

    let events = async {
        loop {
            match conn.next().await {
                GattConnectionEvent::Disconnected { reason } => {
                    device.disconnected(reason.into_inner());
                    return;
                }
                GattConnectionEvent::Gatt { event } => {
                    let verdict = match &event {
                        GattEvent::Read(ev) if ev.handle() == data.handle => {
                            stage_read(device, server, &data).map(|()| false)
                        }
                        GattEvent::Write(ev) => {
                            let handle = ev.handle();
                            ev.with_data(|offset, bytes| {
                                let offset = u16::try_from(offset).unwrap_or(u16::MAX);
                                device.write(handle, offset, bytes)
                            })
                            .map(|outcome| outcome == WriteOutcome::NotificationsEnabled)
                        }
                        _ => Ok(false),
                    };

                    let (reply, start_burst) = match verdict {
                        Ok(start_burst) => (event.accept(), start_burst),
                        Err(e) => {
                            warn!("Rejecting request: {}", e);
                            (event.reject(AttErrorCode::new(u8::from(e))), false)
                        }
                    };
                    match reply {
                        Ok(reply) => reply.send().await,
                        Err(e) => warn!("[gatt] error sending response: {:?}", e),
                    }
                    if start_burst {
                        burst_requested.signal(());
                    }
                }
                _ => {}
            }
        }
    };

    let bursts = async {
        let mut notifier = GattNotifier {
            conn,
            characteristic: data,
        };
        loop {
            burst_requested.wait().await;
            let report = device.notify_burst(engine, &mut notifier).await;
            info!(
                "Burst done: {} of {} delivered ({:?})",
                report.delivered, report.attempted, report.outcome
            );
        }
    };

    select(events, bursts).await;
}

/// Stage the characteristic value for a read the server is about to answer.
fn stage_read(
    device: &Tracked<'_>,
    server: &BurstServer<'_>,
    data: &Characteristic<Value>,
) -> Result<(), AttError> {
    let mut buf = [0u8; READ_VALUE.len()];
    let n = device.read(data.handle, 0, &mut buf)?;
    let value = Value::from_slice(&buf[..n]).map_err(|_| AttError::UnlikelyError)?;
    data.set(server, &value).map_err(|e| {
        warn!("Failed to stage read value: {:?}", e);
        AttError::UnlikelyError
    })
}

