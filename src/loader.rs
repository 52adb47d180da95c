//! Device declarations from JSON documents.
//!
//! ```json
//! {
//!   "name": "lamp",
//!   "product_id": 4660,
//!   "structures": [
//!     { "name": "rgb", "fields": [
//!         { "name": "r", "type": "uint8", "range": [0, 255] },
//!         { "name": "mode", "type": "uint8", "values": [1, 2] } ] }
//!   ],
//!   "apis": [
//!     { "name": "rgb", "write": { "command": 16, "header": [170, 1] } }
//!   ]
//! }
//! ```
//!
//! Structures are declared in document order, so a nested type must come before
//! its first use. An API without `structure` uses the structure of its own name.

use crate::device::{Api, ApiCommand, DeviceDeclaration, DeviceRegistry};
use crate::expr::ExprEvaluator;
use crate::framing::{PrefixFraming, RawFraming};
use crate::schema::{Expression, Field, SchemaError, Structure};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceDoc {
    pub name: String,
    #[serde(default)]
    pub product_id: Option<u16>,
    #[serde(default)]
    pub structures: Vec<StructureDoc>,
    #[serde(default)]
    pub apis: Vec<ApiDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructureDoc {
    pub name: String,
    pub fields: Vec<FieldDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub constant: Option<u32>,
    #[serde(default)]
    pub range: Option<[u32; 2]>,
    #[serde(default)]
    pub values: Option<Vec<u32>>,
    #[serde(default)]
    pub deferred: Option<String>,
    #[serde(default)]
    pub to_json: Option<String>,
    #[serde(default)]
    pub from_json: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiDoc {
    pub name: String,
    #[serde(default)]
    pub structure: Option<String>,
    #[serde(default)]
    pub write: Option<CommandDoc>,
    #[serde(default)]
    pub read: Option<CommandDoc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDoc {
    pub command: u32,
    /// Bytes prepended to every payload; raw framing when absent or empty.
    #[serde(default)]
    pub header: Option<Vec<u8>>,
}

pub fn load_declaration_str(text: &str) -> anyhow::Result<DeviceDeclaration> {
    let doc: DeviceDoc = serde_json::from_str(text).context("decoding device declaration")?;
    build_declaration(&doc)
}

pub fn load_declaration_file(path: impl AsRef<Path>) -> anyhow::Result<DeviceDeclaration> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading declaration: {}", path.display()))?;
    load_declaration_str(&raw).with_context(|| format!("loading declaration: {}", path.display()))
}

/// Load every `*.json` file of `dir`, in file-name order.
pub fn load_declarations_dir(dir: impl AsRef<Path>) -> anyhow::Result<DeviceRegistry> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            entries.push(path);
        }
    }
    entries.sort();
    let mut reg = DeviceRegistry::new();
    for p in entries {
        let device = load_declaration_file(&p)?;
        reg.insert(device).with_context(|| format!("registering {}", p.display()))?;
    }
    tracing::debug!(dir = %dir.display(), devices = reg.len(), "declarations loaded");
    Ok(reg)
}

pub fn build_declaration(doc: &DeviceDoc) -> anyhow::Result<DeviceDeclaration> {
    let mut device = DeviceDeclaration::new(&doc.name);
    device.product_id = doc.product_id;
    for s in &doc.structures {
        let structure = build_structure(&device, s)
            .with_context(|| format!("structure `{}` of device `{}`", s.name, doc.name))?;
        device.add_structure(structure)?;
    }
    for a in &doc.apis {
        let structure = a.structure.clone().unwrap_or_else(|| a.name.clone());
        let mut api = Api::new(&a.name, structure);
        api.write = a.write.as_ref().map(build_command);
        api.read = a.read.as_ref().map(build_command);
        device.add_api(api).with_context(|| format!("API `{}` of device `{}`", a.name, doc.name))?;
    }
    Ok(device)
}

fn build_structure(device: &DeviceDeclaration, doc: &StructureDoc) -> anyhow::Result<Structure> {
    let mut structure = Structure::new(&doc.name);
    for f in &doc.fields {
        structure.add_field(build_field(device, f)?);
    }
    Ok(structure)
}

fn build_field(device: &DeviceDeclaration, doc: &FieldDoc) -> anyhow::Result<Field> {
    let mut field = Field::of_type(&doc.name, &doc.type_name, device.registry())?;
    if let Some(count) = doc.count {
        field = field.repeated(count)?;
    }
    if let Some(value) = doc.constant {
        field = field.constant(value)?;
    }
    let rules = [doc.range.is_some(), doc.values.is_some(), doc.deferred.is_some()];
    if rules.iter().filter(|r| **r).count() > 1 {
        bail!("field `{}` declares more than one rule", doc.name);
    }
    if let Some([lo, hi]) = doc.range {
        field = field.with_range(lo, hi);
    }
    if let Some(values) = &doc.values {
        field = field.with_values(values.iter().copied());
    }
    if let Some(src) = &doc.deferred {
        field = field.with_deferred(checked(&doc.name, src)?);
    }
    if let Some(src) = &doc.to_json {
        field = field.with_to_json(checked(&doc.name, src)?);
    }
    if let Some(src) = &doc.from_json {
        field = field.with_from_json(checked(&doc.name, src)?);
    }
    Ok(field)
}

fn checked(field: &str, src: &str) -> Result<Expression, SchemaError> {
    ExprEvaluator::check(src).map_err(|e| SchemaError::InvalidExpression {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Expression::new(src))
}

fn build_command(doc: &CommandDoc) -> ApiCommand {
    match doc.header.as_deref() {
        Some(header) if !header.is_empty() => {
            ApiCommand::new(doc.command, PrefixFraming::new(header))
        }
        _ => ApiCommand::new(doc.command, RawFraming),
    }
}
