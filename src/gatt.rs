use gatt_burst::config::MAX_ATTRIBUTE_LEN;
use heapless::Vec;
use trouble_host::prelude::*;

/// Backing storage of the characteristic. Sized for the longest write a peer
/// may send, since accepted writes are copied into it.
pub type Value = Vec<u8, MAX_ATTRIBUTE_LEN>;

#[gatt_server]
pub struct BurstServer {
    pub burst_service: BurstService,
}

#[gatt_service(uuid = "1234")]
pub struct BurstService {
    #[characteristic(uuid = "9876", read, write, notify)]
    pub data: Value,
}
