//! The custom GATT service: attribute table, typed handles and CCC state.

use core::ops::BitOr;
use core::sync::atomic::{AtomicU16, Ordering};

use log::{info, warn};

use crate::access::{on_read, on_write, read_at};
use crate::config::{CCC_UUID, CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::error::AttError;

const PRIMARY_SERVICE_UUID: u16 = 0x2800;
const CHARACTERISTIC_DECLARATION_UUID: u16 = 0x2803;

/// Characteristic properties, as carried in the characteristic declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties(u8);

impl Properties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Properties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Access permissions of a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Handle of the characteristic value; the target of notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle(pub u16);

/// Handle of the client characteristic configuration descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CccHandle(pub u16);

/// Handles assigned when the service is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandles {
    pub service: u16,
    pub declaration: u16,
    pub value: ValueHandle,
    pub ccc: CccHandle,
}

impl ServiceHandles {
    /// Last handle occupied by the service.
    pub fn end(&self) -> u16 {
        self.ccc.0
    }
}

/// Role of an entry in the attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    PrimaryService,
    CharacteristicDeclaration,
    CharacteristicValue,
    ClientCharacteristicConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub handle: u16,
    pub uuid: u16,
    pub kind: AttributeKind,
    pub permissions: Permissions,
}

/// Value written by a client into the CCC descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CccValue {
    #[default]
    Disabled,
    Notify,
    Indicate,
    NotifyAndIndicate,
}

impl CccValue {
    pub const fn bits(self) -> u16 {
        match self {
            Self::Disabled => 0x0000,
            Self::Notify => 0x0001,
            Self::Indicate => 0x0002,
            Self::NotifyAndIndicate => 0x0003,
        }
    }

    /// Reserved bits are ignored.
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0x0003 {
            0x0001 => Self::Notify,
            0x0002 => Self::Indicate,
            0x0003 => Self::NotifyAndIndicate,
            _ => Self::Disabled,
        }
    }

    pub const fn notifications(self) -> bool {
        matches!(self, Self::Notify | Self::NotifyAndIndicate)
    }
}

/// Attribute table of the service, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    handles: ServiceHandles,
    properties: Properties,
    attributes: [Attribute; 4],
}

impl ServiceDescriptor {
    /// Lay out the service starting at `first_handle`.
    ///
    /// The characteristic is readable: the read handler is wired, so the READ
    /// property and permission are declared alongside WRITE and NOTIFY.
    pub const fn register(first_handle: u16) -> Self {
        let handles = ServiceHandles {
            service: first_handle,
            declaration: first_handle + 1,
            value: ValueHandle(first_handle + 2),
            ccc: CccHandle(first_handle + 3),
        };

        let properties = Properties(
            Properties::READ.bits() | Properties::WRITE.bits() | Properties::NOTIFY.bits(),
        );

        let attributes = [
            Attribute {
                handle: handles.service,
                uuid: PRIMARY_SERVICE_UUID,
                kind: AttributeKind::PrimaryService,
                permissions: Permissions::READ,
            },
            Attribute {
                handle: handles.declaration,
                uuid: CHARACTERISTIC_DECLARATION_UUID,
                kind: AttributeKind::CharacteristicDeclaration,
                permissions: Permissions::READ,
            },
            Attribute {
                handle: handles.value.0,
                uuid: CHARACTERISTIC_UUID,
                kind: AttributeKind::CharacteristicValue,
                permissions: Permissions(Permissions::READ.0 | Permissions::WRITE.0),
            },
            Attribute {
                handle: handles.ccc.0,
                uuid: CCC_UUID,
                kind: AttributeKind::ClientCharacteristicConfiguration,
                permissions: Permissions(Permissions::READ.0 | Permissions::WRITE.0),
            },
        ];

        Self {
            handles,
            properties,
            attributes,
        }
    }

    pub fn handles(&self) -> ServiceHandles {
        self.handles
    }

    pub fn properties(&self) -> Properties {
        self.properties
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, handle: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.handle == handle)
    }

    fn service_value(&self) -> [u8; 2] {
        SERVICE_UUID.to_le_bytes()
    }

    fn declaration_value(&self) -> [u8; 5] {
        let [vh_lo, vh_hi] = self.handles.value.0.to_le_bytes();
        let [uuid_lo, uuid_hi] = CHARACTERISTIC_UUID.to_le_bytes();
        [self.properties.bits(), vh_lo, vh_hi, uuid_lo, uuid_hi]
    }
}

/// What a successful write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Data consumed by the characteristic's write handler.
    Consumed,
    /// The CCC changed into a notify-enabled value. Start one burst.
    NotificationsEnabled,
    /// The CCC was written without enabling notifications.
    CccUpdated(CccValue),
}

/// Attribute server for the single service.
pub struct GattServer {
    descriptor: ServiceDescriptor,
    ccc: AtomicU16,
}

impl GattServer {
    pub const fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            ccc: AtomicU16::new(0),
        }
    }

    pub fn handles(&self) -> ServiceHandles {
        self.descriptor.handles
    }

    pub fn ccc(&self) -> CccValue {
        CccValue::from_bits(self.ccc.load(Ordering::Acquire))
    }

    /// Forget the client configuration. Called on disconnect; nothing is bonded.
    pub fn reset_ccc(&self) {
        self.ccc.store(CccValue::Disabled.bits(), Ordering::Release);
    }

    pub fn read(&self, handle: u16, offset: u16, buf: &mut [u8]) -> Result<usize, AttError> {
        let attr = self
            .descriptor
            .attribute(handle)
            .ok_or(AttError::InvalidHandle)?;
        if !attr.permissions.contains(Permissions::READ) {
            return Err(AttError::ReadNotPermitted);
        }

        match attr.kind {
            AttributeKind::PrimaryService => read_at(&self.descriptor.service_value(), offset, buf),
            AttributeKind::CharacteristicDeclaration => {
                read_at(&self.descriptor.declaration_value(), offset, buf)
            }
            AttributeKind::CharacteristicValue => on_read(offset, buf),
            AttributeKind::ClientCharacteristicConfiguration => {
                read_at(&self.ccc().bits().to_le_bytes(), offset, buf)
            }
        }
    }

    pub fn write(&self, handle: u16, offset: u16, data: &[u8]) -> Result<WriteOutcome, AttError> {
        let attr = self
            .descriptor
            .attribute(handle)
            .ok_or(AttError::InvalidHandle)?;
        if !attr.permissions.contains(Permissions::WRITE) {
            return Err(AttError::WriteNotPermitted);
        }

        match attr.kind {
            AttributeKind::CharacteristicValue => {
                on_write(data, offset);
                Ok(WriteOutcome::Consumed)
            }
            AttributeKind::ClientCharacteristicConfiguration => self.write_ccc(offset, data),
            _ => Err(AttError::WriteNotPermitted),
        }
    }

    fn write_ccc(&self, offset: u16, data: &[u8]) -> Result<WriteOutcome, AttError> {
        if offset != 0 {
            return Err(AttError::InvalidOffset);
        }
        let bits = match *data {
            [lo] => u16::from(lo),
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            _ => return Err(AttError::InvalidAttributeValueLength),
        };

        let value = CccValue::from_bits(bits);
        if value == CccValue::Indicate || value == CccValue::NotifyAndIndicate {
            warn!("CCC requested indications, characteristic only notifies");
        }

        let previous = CccValue::from_bits(self.ccc.swap(value.bits(), Ordering::AcqRel));
        if value.notifications() && !previous.notifications() {
            info!("Notify enabled");
            Ok(WriteOutcome::NotificationsEnabled)
        } else {
            info!("CCC updated to {:?}", value);
            Ok(WriteOutcome::CccUpdated(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::config::{MAX_ATTRIBUTE_LEN, READ_VALUE};

    fn server() -> GattServer {
        GattServer::new(ServiceDescriptor::register(0x0010))
    }

    #[test]
    fn handles_are_typed_not_positional() {
        let desc = ServiceDescriptor::register(0x0010);
        let handles = desc.handles();
        assert_eq!(handles.value, ValueHandle(0x0012));
        assert_eq!(handles.ccc, CccHandle(0x0013));
        assert_eq!(handles.end(), 0x0013);

        let value = desc.attribute(handles.value.0).unwrap();
        assert_eq!(value.kind, AttributeKind::CharacteristicValue);
        assert_eq!(value.uuid, CHARACTERISTIC_UUID);
        let ccc = desc.attribute(handles.ccc.0).unwrap();
        assert_eq!(ccc.uuid, CCC_UUID);
    }

    #[test]
    fn attribute_table_is_contiguous() {
        let desc = ServiceDescriptor::register(0x0020);
        let kinds: Vec<_> = desc.attributes().iter().map(|a| (a.handle, a.kind)).collect();
        assert_eq!(
            kinds,
            [
                (0x0020, AttributeKind::PrimaryService),
                (0x0021, AttributeKind::CharacteristicDeclaration),
                (0x0022, AttributeKind::CharacteristicValue),
                (0x0023, AttributeKind::ClientCharacteristicConfiguration),
            ]
        );
        assert_eq!(desc.handles().end(), desc.attributes()[3].handle);
    }

    #[test]
    fn properties_and_permissions_agree() {
        let desc = ServiceDescriptor::register(1);
        let props = desc.properties();
        assert!(props.contains(Properties::WRITE | Properties::NOTIFY));
        assert!(props.contains(Properties::READ));
        assert!(!props.contains(Properties::INDICATE));

        let value = desc.attribute(desc.handles().value.0).unwrap();
        assert!(value.permissions.contains(Permissions::READ | Permissions::WRITE));
        let ccc = desc.attribute(desc.handles().ccc.0).unwrap();
        assert!(ccc.permissions.contains(Permissions::READ | Permissions::WRITE));
    }

    #[test]
    fn declarations_are_readable() {
        let server = server();
        let mut buf = [0; 8];
        assert_eq!(server.read(0x0010, 0, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0x34, 0x12]);

        assert_eq!(server.read(0x0011, 0, &mut buf), Ok(5));
        assert_eq!(&buf[..5], &[0x1A, 0x12, 0x00, 0x76, 0x98]);
    }

    #[test]
    fn value_read_goes_through_read_handler() {
        let server = server();
        let handle = server.handles().value.0;
        let mut buf = [0; 8];
        assert_eq!(server.read(handle, 0, &mut buf), Ok(4));
        assert_eq!(&buf[..4], &READ_VALUE);
        assert_eq!(server.read(handle, 5, &mut buf), Err(AttError::InvalidOffset));
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let server = server();
        let mut buf = [0; 4];
        assert_eq!(server.read(0x0001, 0, &mut buf), Err(AttError::InvalidHandle));
        assert_eq!(server.write(0x0020, 0, &[1]), Err(AttError::InvalidHandle));
    }

    #[test]
    fn declarations_are_not_writable() {
        let server = server();
        assert_eq!(server.write(0x0010, 0, &[1, 2]), Err(AttError::WriteNotPermitted));
        assert_eq!(server.write(0x0011, 0, &[1, 2]), Err(AttError::WriteNotPermitted));
    }

    #[test]
    fn value_write_is_consumed_and_read_is_unchanged() {
        let server = server();
        let handle = server.handles().value.0;
        assert_eq!(server.write(handle, 0, &[9; 40]), Ok(WriteOutcome::Consumed));

        let mut buf = [0; 4];
        server.read(handle, 0, &mut buf).unwrap();
        assert_eq!(buf, READ_VALUE);
    }

    #[test]
    fn value_write_accepts_longest_attribute() {
        let server = server();
        let handle = server.handles().value.0;
        let long = [0x5A; MAX_ATTRIBUTE_LEN];
        assert_eq!(server.write(handle, 0, &long), Ok(WriteOutcome::Consumed));
        assert_eq!(server.write(handle, 0, &long[..21]), Ok(WriteOutcome::Consumed));
    }

    #[test]
    fn ccc_enable_fires_once_per_transition() {
        let server = server();
        let ccc = server.handles().ccc.0;

        assert_eq!(
            server.write(ccc, 0, &[0x01, 0x00]),
            Ok(WriteOutcome::NotificationsEnabled)
        );
        assert_eq!(server.ccc(), CccValue::Notify);
        assert_eq!(
            server.write(ccc, 0, &[0x01, 0x00]),
            Ok(WriteOutcome::CccUpdated(CccValue::Notify))
        );

        assert_eq!(
            server.write(ccc, 0, &[0x00, 0x00]),
            Ok(WriteOutcome::CccUpdated(CccValue::Disabled))
        );
        assert_eq!(
            server.write(ccc, 0, &[0x01]),
            Ok(WriteOutcome::NotificationsEnabled)
        );
    }

    #[test]
    fn ccc_indicate_does_not_trigger() {
        let server = server();
        let ccc = server.handles().ccc.0;
        assert_eq!(
            server.write(ccc, 0, &[0x02, 0x00]),
            Ok(WriteOutcome::CccUpdated(CccValue::Indicate))
        );
    }

    #[test]
    fn ccc_write_is_validated() {
        let server = server();
        let ccc = server.handles().ccc.0;
        assert_eq!(server.write(ccc, 1, &[0x01]), Err(AttError::InvalidOffset));
        assert_eq!(
            server.write(ccc, 0, &[]),
            Err(AttError::InvalidAttributeValueLength)
        );
        assert_eq!(
            server.write(ccc, 0, &[0x01, 0x00, 0x00]),
            Err(AttError::InvalidAttributeValueLength)
        );
        assert_eq!(server.ccc(), CccValue::Disabled);
    }

    #[test]
    fn ccc_is_readable_and_resets() {
        let server = server();
        let ccc = server.handles().ccc.0;
        server.write(ccc, 0, &[0x01, 0x00]).unwrap();

        let mut buf = [0; 2];
        assert_eq!(server.read(ccc, 0, &mut buf), Ok(2));
        assert_eq!(buf, [0x01, 0x00]);

        server.reset_ccc();
        assert_eq!(server.ccc(), CccValue::Disabled);
    }
}
