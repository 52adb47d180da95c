//! # devdecl: Device Declaration and Structure Serialization
//!
//! Declare a device's command layout once, as typed, possibly nested and repeated
//! fields, then turn JSON command documents into the exact bytes the device expects
//! and byte replies back into JSON. Field values are checked against ranges, value
//! sets or computed rules before anything is sent.
//!
//! ## Pipeline
//!
//! | Stage | Module | Input → Output |
//! |-------|--------|----------------|
//! | Declare | [`schema`] | fields, structures, registry |
//! | Flatten | [`expand`] | `Structure` → `ExpandedStructure` (offsets, paths) |
//! | JSON | [`json`] | `serde_json::Value` ⇄ leaf values |
//! | Check | [`validate`] | leaf values → `Result<(), ValidationError>` |
//! | Bytes | [`codec`] | leaf values ⇄ little-endian buffer |
//! | Frame | [`framing`] | payload ⇄ command frame |
//! | I/O | [`device`], [`transport`] | framed bytes ⇄ device |
//!
//! ## Primitive types
//!
//! | Name | Size | Alignment |
//! |------|------|-----------|
//! | `uint8` | 1 | 1 |
//! | `uint16` | 2 | 2 |
//! | `uint32` | 4 | 4 |
//!
//! Each leaf is padded to its own alignment only. Nested structures are flattened
//! in place, so a `{status: uint8, value: uint16}` layout occupies four bytes with
//! `value` at offset 2.
//!
//! ## Paths
//!
//! Leaves are addressed by `/`-joined steps: `status`, `items/2`, `points/1/x`.
//! Integer steps index JSON arrays and every other step is an object key.
//!
//! ## Declarations
//!
//! Declarations can be built in code or loaded from JSON with [`loader`]; see
//! `tests/integration.rs` for an end-to-end example.

pub mod codec;
pub mod device;
pub mod dump;
pub mod expand;
pub mod expr;
pub mod framing;
pub mod json;
pub mod loader;
pub mod schema;
pub mod transport;
pub mod validate;

pub use codec::{populate_from_bytes, to_bytes, CodecError};
pub use device::{Api, ApiCommand, DeviceDeclaration, DeviceError, DeviceRegistry};
pub use expand::{expand, ExpandedField, ExpandedStructure};
pub use expr::{Environment, EvalError, Evaluated, Evaluator, ExprEvaluator};
pub use framing::{CommandFraming, FramingError, PrefixFraming, RawFraming};
pub use json::{populate_from_json, to_json};
pub use loader::{load_declaration_file, load_declaration_str, load_declarations_dir};
pub use schema::{
    ConcreteRule, Expression, Field, FieldRule, FieldType, PrimitiveType, SchemaError,
    SchemaRegistry, Structure,
};
#[cfg(feature = "mock")]
pub use transport::MockTransport;
pub use transport::{DeviceHandle, DeviceInfo, Transport, TransportError};
pub use validate::{is_valid, validate, RuleViolation, ValidationError};
