//! Device transport seam. Implementations move framed bytes to and from a device;
//! this crate never retries and imposes no timeout of its own.

pub type DeviceHandle = u32;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("device handle {0} not open")]
    NoSuchDevice(DeviceHandle),
    #[error("no reply for command {0:#x}")]
    NoReply(u32),
    #[error("timeout")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(String),
}

/// A device found by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub product_id: u16,
    pub handle: DeviceHandle,
}

/// A minimal blocking command transport.
pub trait Transport {
    /// Send one framed command.
    fn write(&mut self, handle: DeviceHandle, command: u32, bytes: &[u8]) -> Result<()>;

    /// Send a framed request and return the framed reply.
    fn read(&mut self, handle: DeviceHandle, command: u32, request: &[u8]) -> Result<Vec<u8>>;

    /// List the devices currently attached.
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>>;
}

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockTransport, SentCommand};
