//! Device declarations and the read/write orchestration over a [`Transport`].
//!
//! | Direction | Pipeline |
//! |-----------|----------|
//! | write | JSON → populate → validate → bytes → frame → `Transport::write` |
//! | read  | JSON → populate → bytes → frame → `Transport::read` → unframe → JSON |
//!
//! Every call works on its own clone of the API's expanded structure, so the
//! declaration itself is never modified by I/O.

use crate::codec::{populate_from_bytes, to_bytes, CodecError};
use crate::expand::{expand, ExpandedStructure};
use crate::expr::{Evaluator, ExprEvaluator};
use crate::framing::{CommandFraming, FramingError};
use crate::json::{populate_from_json, to_json};
use crate::schema::{SchemaError, SchemaRegistry, Structure};
use crate::transport::{DeviceHandle, Transport, TransportError};
use crate::validate::{validate, ValidationError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown device `{0}`")]
    UnknownDevice(String),
    #[error("device `{device}` has no API `{api}`")]
    UnknownApi { device: String, api: String },
    #[error("API `{api}` refers to undeclared structure `{structure}`")]
    UnknownStructure { api: String, structure: String },
    #[error("duplicate device name: {0}")]
    DuplicateDevice(String),
    #[error("malformed command document: {0}")]
    MalformedCommand(String),
    #[error("device `{0}` has no handle; run discovery first")]
    NoHandle(String),
    #[error("API `{api}` has no {direction} command")]
    UnsupportedDirection {
        api: String,
        direction: &'static str,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Command id plus the framing that wraps its payload.
#[derive(Debug, Clone)]
pub struct ApiCommand {
    pub command_id: u32,
    pub framing: Arc<dyn CommandFraming>,
}

impl ApiCommand {
    pub fn new(command_id: u32, framing: impl CommandFraming + 'static) -> Self {
        ApiCommand {
            command_id,
            framing: Arc::new(framing),
        }
    }
}

/// A named operation pairing a structure with its read and/or write command.
#[derive(Debug, Clone)]
pub struct Api {
    pub name: String,
    pub structure: String,
    pub write: Option<ApiCommand>,
    pub read: Option<ApiCommand>,
}

impl Api {
    pub fn new(name: impl Into<String>, structure: impl Into<String>) -> Self {
        Api {
            name: name.into(),
            structure: structure.into(),
            write: None,
            read: None,
        }
    }

    pub fn with_write(mut self, command: ApiCommand) -> Self {
        self.write = Some(command);
        self
    }

    pub fn with_read(mut self, command: ApiCommand) -> Self {
        self.read = Some(command);
        self
    }
}

/// Everything known about one device type: its schema, the expansion of every
/// declared structure, and its APIs.
#[derive(Debug, Clone)]
pub struct DeviceDeclaration {
    pub name: String,
    pub product_id: Option<u16>,
    pub handle: Option<DeviceHandle>,
    registry: SchemaRegistry,
    expanded: HashMap<String, ExpandedStructure>,
    apis: BTreeMap<String, Api>,
}

impl DeviceDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        DeviceDeclaration {
            name: name.into(),
            product_id: None,
            handle: None,
            registry: SchemaRegistry::new(),
            expanded: HashMap::new(),
            apis: BTreeMap::new(),
        }
    }

    pub fn with_product_id(mut self, product_id: u16) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Declare a structure and expand it. Later structures may nest it by name.
    pub fn add_structure(&mut self, structure: Structure) -> Result<(), SchemaError> {
        let structure = self.registry.insert(structure)?;
        self.expanded.insert(structure.name.clone(), expand(&structure));
        Ok(())
    }

    pub fn add_api(&mut self, api: Api) -> Result<(), DeviceError> {
        if !self.expanded.contains_key(&api.structure) {
            return Err(DeviceError::UnknownStructure {
                api: api.name,
                structure: api.structure,
            });
        }
        self.apis.insert(api.name.clone(), api);
        Ok(())
    }

    pub fn set_handle(&mut self, handle: DeviceHandle) {
        self.handle = Some(handle);
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn expanded(&self, structure: &str) -> Option<&ExpandedStructure> {
        self.expanded.get(structure)
    }

    pub fn api(&self, name: &str) -> Option<&Api> {
        self.apis.get(name)
    }

    /// APIs sorted by name.
    pub fn apis(&self) -> impl Iterator<Item = &Api> {
        self.apis.values()
    }

    /// Fresh copy of the API's layout populated from `doc`.
    pub fn populate(
        &self,
        api: &str,
        doc: &Value,
        evaluator: &dyn Evaluator,
    ) -> Result<(&Api, ExpandedStructure), DeviceError> {
        let api = self.apis.get(api).ok_or_else(|| DeviceError::UnknownApi {
            device: self.name.clone(),
            api: api.to_string(),
        })?;
        let mut s = self
            .expanded
            .get(&api.structure)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownStructure {
                api: api.name.clone(),
                structure: api.structure.clone(),
            })?;
        populate_from_json(&mut s, doc, Some(evaluator))?;
        Ok((api, s))
    }

    /// Populated and validated payload for `api`, wrapped in its write framing.
    /// An API without a write command yields the bare payload.
    pub fn encode(
        &self,
        api: &str,
        doc: &Value,
        evaluator: &dyn Evaluator,
    ) -> Result<Vec<u8>, DeviceError> {
        let (api, s) = self.populate(api, doc, evaluator)?;
        validate(&s, evaluator)?;
        let payload = to_bytes(&s);
        Ok(match &api.write {
            Some(cmd) => cmd.framing.serialize_payload(&payload),
            None => payload,
        })
    }

    /// Strip the read framing from `frame` (none without a read command) and
    /// render the API's structure as JSON. Replies are not validated.
    pub fn decode(
        &self,
        api: &str,
        frame: &[u8],
        evaluator: &dyn Evaluator,
    ) -> Result<Value, DeviceError> {
        let (api, mut s) = self.populate(api, &Value::Null, evaluator)?;
        let payload = match &api.read {
            Some(cmd) => cmd.framing.extract_payload(frame)?,
            None => frame.to_vec(),
        };
        populate_from_bytes(&mut s, &payload)?;
        Ok(to_json(&s, Some(evaluator))?)
    }

    /// Populate, validate, serialize, frame and send one write command.
    /// Nothing reaches the transport if validation fails.
    pub fn write_command(
        &self,
        transport: &mut dyn Transport,
        api: &str,
        doc: &Value,
        evaluator: &dyn Evaluator,
    ) -> Result<(), DeviceError> {
        let (api, s) = self.populate(api, doc, evaluator)?;
        let cmd = api.write.as_ref().ok_or_else(|| DeviceError::UnsupportedDirection {
            api: api.name.clone(),
            direction: "write",
        })?;
        validate(&s, evaluator)?;
        let handle = self.handle.ok_or_else(|| DeviceError::NoHandle(self.name.clone()))?;
        let frame = cmd.framing.serialize_payload(&to_bytes(&s));
        tracing::debug!(
            device = %self.name,
            api = %api.name,
            command = cmd.command_id,
            len = frame.len(),
            "write"
        );
        transport.write(handle, cmd.command_id, &frame)?;
        Ok(())
    }

    /// Send a read request built from `doc` and decode the reply. Replies are
    /// not validated.
    pub fn read_command(
        &self,
        transport: &mut dyn Transport,
        api: &str,
        doc: &Value,
        evaluator: &dyn Evaluator,
    ) -> Result<Value, DeviceError> {
        let (api, mut s) = self.populate(api, doc, evaluator)?;
        let cmd = api.read.as_ref().ok_or_else(|| DeviceError::UnsupportedDirection {
            api: api.name.clone(),
            direction: "read",
        })?;
        let handle = self.handle.ok_or_else(|| DeviceError::NoHandle(self.name.clone()))?;
        let request = cmd.framing.serialize_payload(&to_bytes(&s));
        tracing::debug!(
            device = %self.name,
            api = %api.name,
            command = cmd.command_id,
            len = request.len(),
            "read"
        );
        let reply = transport.read(handle, cmd.command_id, &request)?;
        let payload = cmd.framing.extract_payload(&reply)?;
        tracing::debug!(device = %self.name, api = %api.name, len = payload.len(), "reply");
        populate_from_bytes(&mut s, &payload)?;
        Ok(to_json(&s, Some(evaluator))?)
    }
}

/// Declarations by device name, plus the evaluator used for their expressions.
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceDeclaration>,
    evaluator: Box<dyn Evaluator + Send + Sync>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_evaluator(ExprEvaluator)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(evaluator: impl Evaluator + Send + Sync + 'static) -> Self {
        DeviceRegistry {
            devices: BTreeMap::new(),
            evaluator: Box::new(evaluator),
        }
    }

    pub fn insert(&mut self, device: DeviceDeclaration) -> Result<(), DeviceError> {
        if self.devices.contains_key(&device.name) {
            return Err(DeviceError::DuplicateDevice(device.name));
        }
        self.devices.insert(device.name.clone(), device);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DeviceDeclaration> {
        self.devices.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceDeclaration> {
        self.devices.get_mut(name)
    }

    /// Devices sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDeclaration> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    /// `json_text` must be an object with exactly one key, the API name, whose
    /// value is the command document.
    pub fn write_to_device(
        &self,
        transport: &mut dyn Transport,
        device: &str,
        json_text: &str,
    ) -> Result<(), DeviceError> {
        let device = self.device(device)?;
        let (api, doc) = parse_command(json_text)?;
        device.write_command(transport, &api, &doc, self.evaluator())
    }

    /// Same command shape as [`write_to_device`](Self::write_to_device); returns the
    /// decoded reply as JSON text.
    pub fn read_from_device(
        &self,
        transport: &mut dyn Transport,
        device: &str,
        json_text: &str,
    ) -> Result<String, DeviceError> {
        let device = self.device(device)?;
        let (api, doc) = parse_command(json_text)?;
        let reply = device.read_command(transport, &api, &doc, self.evaluator())?;
        Ok(serde_json::to_string(&reply)?)
    }

    /// Enumerate attached devices and record the handle of every declaration whose
    /// product id matches. Returns how many declarations got a handle.
    pub fn attach_handles(&mut self, transport: &mut dyn Transport) -> Result<usize, DeviceError> {
        let mut attached = 0;
        for info in transport.enumerate_devices()? {
            let matched = self
                .devices
                .values_mut()
                .find(|d| d.product_id == Some(info.product_id));
            match matched {
                Some(device) => {
                    tracing::debug!(device = %device.name, handle = info.handle, "attached");
                    device.set_handle(info.handle);
                    attached += 1;
                }
                None => {
                    tracing::warn!(product_id = info.product_id, "no declaration for product");
                }
            }
        }
        Ok(attached)
    }

    fn device(&self, name: &str) -> Result<&DeviceDeclaration, DeviceError> {
        self.devices.get(name).ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))
    }
}

/// Split `{"<api>": {...}}` into the API name and its command document.
pub fn parse_command(json_text: &str) -> Result<(String, Value), DeviceError> {
    match serde_json::from_str::<Value>(json_text)? {
        Value::Object(members) if members.len() == 1 => {
            let (api, doc) = members
                .into_iter()
                .next()
                .ok_or_else(|| DeviceError::MalformedCommand("empty object".to_string()))?;
            Ok((api, doc))
        }
        Value::Object(members) => Err(DeviceError::MalformedCommand(format!(
            "expected exactly one API key, found {}",
            members.len()
        ))),
        other => Err(DeviceError::MalformedCommand(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::RawFraming;
    use crate::schema::Field;

    fn declaration() -> DeviceDeclaration {
        let mut d = DeviceDeclaration::new("lamp").with_product_id(0x1234);
        let reg = SchemaRegistry::new();
        d.add_structure(
            Structure::new("brightness").with_field(
                Field::of_type("level", "uint8", &reg)
                    .expect("level")
                    .with_range(0, 100),
            ),
        )
        .expect("structure");
        d.add_api(Api::new("brightness", "brightness").with_write(ApiCommand::new(7, RawFraming)))
            .expect("api");
        d
    }

    #[test]
    fn api_must_name_a_structure() {
        let mut d = declaration();
        let err = d.add_api(Api::new("color", "rgb")).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownStructure { .. }));
    }

    #[test]
    fn parse_command_requires_single_key() {
        let (api, doc) = parse_command(r#"{"brightness": {"level": 3}}"#).expect("split");
        assert_eq!(api, "brightness");
        assert_eq!(doc["level"], 3);

        for text in [r#"{}"#, r#"{"a": {}, "b": {}}"#, "[1]"] {
            assert!(
                matches!(parse_command(text), Err(DeviceError::MalformedCommand(_))),
                "{}",
                text
            );
        }
        assert!(matches!(parse_command("{"), Err(DeviceError::Json(_))));
    }

    #[test]
    fn populate_leaves_declaration_untouched() {
        let d = declaration();
        let doc = serde_json::json!({"level": 42});
        let (_, s) = d.populate("brightness", &doc, &ExprEvaluator).expect("populate");
        assert_eq!(s.get("level"), Some(42));
        assert_eq!(d.expanded("brightness").and_then(|e| e.get("level")), Some(0));
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_devices() {
        let mut reg = DeviceRegistry::new();
        reg.insert(declaration()).expect("insert");
        assert!(matches!(reg.insert(declaration()), Err(DeviceError::DuplicateDevice(_))));
        assert_eq!(reg.len(), 1);
        assert!(matches!(reg.device("fan"), Err(DeviceError::UnknownDevice(_))));
    }
}
