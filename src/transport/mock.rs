use super::{DeviceHandle, DeviceInfo, Result, Transport, TransportError};
use std::collections::{HashMap, VecDeque};

/// One command observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub handle: DeviceHandle,
    pub command: u32,
    pub bytes: Vec<u8>,
}

/// In-process transport. Records every write and read request, answers reads from
/// queued replies per command id, and enumerates a fixed device list.
#[derive(Debug, Default)]
pub struct MockTransport {
    devices: Vec<DeviceInfo>,
    replies: HashMap<u32, VecDeque<Vec<u8>>>,
    pub writes: Vec<SentCommand>,
    pub reads: Vec<SentCommand>,
    fail_next: Option<TransportError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, product_id: u16, handle: DeviceHandle) -> Self {
        self.devices.push(DeviceInfo { product_id, handle });
        self
    }

    /// Queue a framed reply for the next read of `command`.
    pub fn push_reply(&mut self, command: u32, frame: impl Into<Vec<u8>>) {
        self.replies.entry(command).or_default().push_back(frame.into());
    }

    /// Make the next write or read fail with `err`.
    pub fn fail_next(&mut self, err: TransportError) {
        self.fail_next = Some(err);
    }

    fn check(&mut self, handle: DeviceHandle) -> Result<()> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        if !self.devices.iter().any(|d| d.handle == handle) {
            return Err(TransportError::NoSuchDevice(handle));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn write(&mut self, handle: DeviceHandle, command: u32, bytes: &[u8]) -> Result<()> {
        self.check(handle)?;
        self.writes.push(SentCommand {
            handle,
            command,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn read(&mut self, handle: DeviceHandle, command: u32, request: &[u8]) -> Result<Vec<u8>> {
        self.check(handle)?;
        self.reads.push(SentCommand {
            handle,
            command,
            bytes: request.to_vec(),
        });
        self.replies
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .ok_or(TransportError::NoReply(command))
    }

    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}
