//! Command framing: wrap a serialized structure with a protocol header before it is
//! written, and strip that header from a reply before it is decoded.

use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame shorter than header: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("frame header mismatch: expected {expected:02x?}, got {got:02x?}")]
    HeaderMismatch { expected: Vec<u8>, got: Vec<u8> },
}

/// Per-API wire framing around a structure's bytes.
pub trait CommandFraming: fmt::Debug + Send + Sync {
    fn serialize_payload(&self, payload: &[u8]) -> Vec<u8>;
    fn extract_payload(&self, frame: &[u8]) -> Result<Vec<u8>, FramingError>;
}

/// No framing: the payload goes on the wire as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFraming;

impl CommandFraming for RawFraming {
    fn serialize_payload(&self, payload: &[u8]) -> Vec<u8> {
        payload.to_vec()
    }

    fn extract_payload(&self, frame: &[u8]) -> Result<Vec<u8>, FramingError> {
        Ok(frame.to_vec())
    }
}

/// A fixed header prepended on write and required (then stripped) on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixFraming {
    header: Vec<u8>,
}

impl PrefixFraming {
    pub fn new(header: impl Into<Vec<u8>>) -> Self {
        PrefixFraming {
            header: header.into(),
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }
}

impl CommandFraming for PrefixFraming {
    fn serialize_payload(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + payload.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(payload);
        out
    }

    fn extract_payload(&self, frame: &[u8]) -> Result<Vec<u8>, FramingError> {
        let n = self.header.len();
        if frame.len() < n {
            return Err(FramingError::Truncated {
                needed: n,
                got: frame.len(),
            });
        }
        let (head, body) = frame.split_at(n);
        if head != self.header.as_slice() {
            return Err(FramingError::HeaderMismatch {
                expected: self.header.clone(),
                got: head.to_vec(),
            });
        }
        Ok(body.to_vec())
    }
}
