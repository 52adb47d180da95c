//! Declared (unflattened) device schema: primitive catalog, field rules, fields,
//! structures and the per-device registry that resolves type names.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A primitive wire type from the fixed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveType {
    pub name: &'static str,
    pub size: usize,
    pub alignment: usize,
}

impl PrimitiveType {
    pub const UINT8: PrimitiveType = PrimitiveType {
        name: "uint8",
        size: 1,
        alignment: 1,
    };
    pub const UINT16: PrimitiveType = PrimitiveType {
        name: "uint16",
        size: 2,
        alignment: 2,
    };
    pub const UINT32: PrimitiveType = PrimitiveType {
        name: "uint32",
        size: 4,
        alignment: 4,
    };

    /// Every primitive the catalog knows, in size order.
    pub const CATALOG: [PrimitiveType; 3] = [Self::UINT8, Self::UINT16, Self::UINT32];

    pub fn from_name(name: &str) -> Option<PrimitiveType> {
        Self::CATALOG.iter().copied().find(|p| p.name == name)
    }
}

/// Opaque expression handle, evaluated lazily by an [`Evaluator`](crate::expr::Evaluator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
}

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Expression {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Validation rule attached to a field. A field owns at most one.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Inclusive on both ends.
    Range { lo: u32, hi: u32 },
    ValueSet(BTreeSet<u32>),
    /// Computed per validation pass from the current field values.
    Deferred(Expression),
}

/// A rule with concrete bounds, as produced by evaluating a deferred rule.
/// Lives only for the validation pass that computed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcreteRule {
    Range { lo: u32, hi: u32 },
    ValueSet(BTreeSet<u32>),
}

impl ConcreteRule {
    pub fn accepts(&self, value: u32) -> bool {
        match self {
            ConcreteRule::Range { lo, hi } => *lo <= value && value <= *hi,
            ConcreteRule::ValueSet(values) => values.contains(&value),
        }
    }
}

impl fmt::Display for ConcreteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcreteRule::Range { lo, hi } => write!(f, "[{}..{}]", lo, hi),
            ConcreteRule::ValueSet(values) => {
                let list: Vec<String> = values.iter().map(u32::to_string).collect();
                write!(f, "in({})", list.join(", "))
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown type `{type_name}` for field `{field}`")]
    UnknownType { field: String, type_name: String },
    #[error("duplicate structure name: {0}")]
    DuplicateStructure(String),
    #[error("invalid field name `{0}`: must be non-empty, contain no '/', and not be a number")]
    InvalidFieldName(String),
    #[error("field `{0}` must repeat at least once")]
    ZeroRepeatCount(String),
    #[error("field `{0}` has a structure type and cannot be constant")]
    ConstantOnStructure(String),
    #[error("constant {value} does not fit field `{field}` ({size} bytes)")]
    ConstantTooWide {
        field: String,
        value: u32,
        size: usize,
    },
    #[error("invalid expression on field `{field}`: {reason}")]
    InvalidExpression { field: String, reason: String },
}

/// What a field's type reference resolved to.
#[derive(Debug, Clone)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Nested(Arc<Structure>),
}

impl FieldType {
    pub fn name(&self) -> &str {
        match self {
            FieldType::Primitive(p) => p.name,
            FieldType::Nested(s) => &s.name,
        }
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            FieldType::Primitive(p) => p.size,
            FieldType::Nested(s) => s.total_size,
        }
    }
}

/// One named, typed element of a [`Structure`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    /// Size of one element, in bytes.
    pub element_size: usize,
    pub repeat_count: usize,
    pub constant: Option<u32>,
    pub rule: Option<FieldRule>,
    pub to_json: Option<Expression>,
    pub from_json: Option<Expression>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.parse::<u64>().is_ok() {
            return Err(SchemaError::InvalidFieldName(name));
        }
        Ok(Field {
            element_size: field_type.element_size(),
            name,
            field_type,
            repeat_count: 1,
            constant: None,
            rule: None,
            to_json: None,
            from_json: None,
        })
    }

    /// Declare a field whose type is named, resolving it through `registry`.
    pub fn of_type(
        name: impl Into<String>,
        type_name: &str,
        registry: &SchemaRegistry,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let field_type = registry.resolve(type_name).ok_or_else(|| SchemaError::UnknownType {
            field: name.clone(),
            type_name: type_name.to_string(),
        })?;
        Field::new(name, field_type)
    }

    pub fn repeated(mut self, count: usize) -> Result<Self, SchemaError> {
        if count == 0 {
            return Err(SchemaError::ZeroRepeatCount(self.name));
        }
        self.repeat_count = count;
        Ok(self)
    }

    pub fn constant(mut self, value: u32) -> Result<Self, SchemaError> {
        if !self.is_primitive() {
            return Err(SchemaError::ConstantOnStructure(self.name));
        }
        let size = self.element_size;
        if size < 4 && u64::from(value) >= (1u64 << (8 * size)) {
            return Err(SchemaError::ConstantTooWide {
                field: self.name,
                value,
                size,
            });
        }
        self.constant = Some(value);
        Ok(self)
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn with_range(self, lo: u32, hi: u32) -> Self {
        self.with_rule(FieldRule::Range { lo, hi })
    }

    pub fn with_values(self, values: impl IntoIterator<Item = u32>) -> Self {
        self.with_rule(FieldRule::ValueSet(values.into_iter().collect()))
    }

    pub fn with_deferred(self, expression: Expression) -> Self {
        self.with_rule(FieldRule::Deferred(expression))
    }

    pub fn with_to_json(mut self, expression: Expression) -> Self {
        self.to_json = Some(expression);
        self
    }

    pub fn with_from_json(mut self, expression: Expression) -> Self {
        self.from_json = Some(expression);
        self
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.field_type, FieldType::Primitive(_))
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn total_size(&self) -> usize {
        self.element_size * self.repeat_count
    }
}

/// A declared structure: ordered fields plus the running sum of their sizes.
///
/// `total_size` does not include alignment padding; the padded size is a property
/// of the [`ExpandedStructure`](crate::expand::ExpandedStructure).
#[derive(Debug, Clone)]
pub struct Structure {
    pub name: String,
    pub fields: Vec<Arc<Field>>,
    pub total_size: usize,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Structure {
            name: name.into(),
            fields: Vec::new(),
            total_size: 0,
        }
    }

    pub fn add_field(&mut self, field: Field) {
        self.total_size += field.total_size();
        self.fields.push(Arc::new(field));
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.add_field(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Per-device structure registry. Resolves nested type names at declaration time.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    structures: HashMap<String, Arc<Structure>>,
    order: Vec<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, structure: Structure) -> Result<Arc<Structure>, SchemaError> {
        if self.structures.contains_key(&structure.name) {
            return Err(SchemaError::DuplicateStructure(structure.name));
        }
        let name = structure.name.clone();
        let structure = Arc::new(structure);
        self.structures.insert(name.clone(), Arc::clone(&structure));
        self.order.push(name);
        Ok(structure)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Structure>> {
        self.structures.get(name)
    }

    /// Primitive if the catalog knows `type_name`, otherwise a declared structure.
    pub fn resolve(&self, type_name: &str) -> Option<FieldType> {
        if let Some(p) = PrimitiveType::from_name(type_name) {
            return Some(FieldType::Primitive(p));
        }
        self.get(type_name).map(|s| FieldType::Nested(Arc::clone(s)))
    }

    /// Structures in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Structure>> {
        self.order.iter().filter_map(|n| self.structures.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
