//! Flatten a declared [`Structure`] into an offset-addressed [`ExpandedStructure`].
//!
//! Nested structures are expanded in place (no offset reset), repeated fields produce
//! one leaf per element, and every primitive leaf is padded to its own alignment only.
//!
//! | Field | Path |
//! |-------|------|
//! | scalar `status` | `status` |
//! | `items` repeated 3 times | `items/0`, `items/1`, `items/2` |
//! | nested `origin: point` | `origin/x`, `origin/y` |
//! | `points: point` repeated 2 times | `points/0/x`, `points/0/y`, `points/1/x`, ... |

use crate::schema::{Field, FieldType, Structure};
use std::sync::Arc;

/// One primitive leaf of an expanded structure, carrying its per-operation value.
#[derive(Debug, Clone)]
pub struct ExpandedField {
    pub definition: Arc<Field>,
    pub path: String,
    pub offset: usize,
    pub size: usize,
    pub value: u32,
}

impl ExpandedField {
    /// Path steps: object keys and array indices.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    pub fn type_name(&self) -> &str {
        self.definition.field_type.name()
    }
}

/// Flattened, leaf-only view of a structure. Rebuild it with [`expand`]; never edit by hand.
#[derive(Debug, Clone)]
pub struct ExpandedStructure {
    pub name: String,
    pub fields: Vec<ExpandedField>,
    pub total_size: usize,
}

impl ExpandedStructure {
    pub fn field_by_path(&self, path: &str) -> Option<&ExpandedField> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn field_by_path_mut(&mut self, path: &str) -> Option<&mut ExpandedField> {
        self.fields.iter_mut().find(|f| f.path == path)
    }

    /// Set a leaf value by path. Returns false if no leaf has that path.
    pub fn set(&mut self, path: &str, value: u32) -> bool {
        match self.field_by_path_mut(path) {
            Some(f) => {
                f.value = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<u32> {
        self.field_by_path(path).map(|f| f.value)
    }

    /// Reset every non-constant leaf to zero and every constant to its declared value.
    pub fn reset(&mut self) {
        for f in &mut self.fields {
            f.value = f.definition.constant.unwrap_or(0);
        }
    }
}

/// Expand `structure` into its flat layout.
pub fn expand(structure: &Structure) -> ExpandedStructure {
    let mut out = ExpandedStructure {
        name: structure.name.clone(),
        fields: Vec::new(),
        total_size: 0,
    };
    add_fields(&mut out, &structure.fields, "");
    tracing::debug!(
        structure = %structure.name,
        leaves = out.fields.len(),
        size = out.total_size,
        "expanded structure"
    );
    out
}

fn add_fields(out: &mut ExpandedStructure, fields: &[Arc<Field>], prefix: &str) {
    for f in fields {
        add_field(out, f, prefix);
    }
}

fn add_field(out: &mut ExpandedStructure, f: &Arc<Field>, prefix: &str) {
    for i in 0..f.repeat_count {
        let part = if f.repeat_count > 1 {
            format!("{}/{}", f.name, i)
        } else {
            f.name.clone()
        };
        let path = if prefix.is_empty() {
            part
        } else {
            format!("{}/{}", prefix, part)
        };
        match &f.field_type {
            FieldType::Primitive(p) => {
                let offset = out.total_size + padding_for(out.total_size, p.alignment);
                tracing::trace!(%path, offset, size = p.size, "leaf");
                out.fields.push(ExpandedField {
                    definition: Arc::clone(f),
                    path,
                    offset,
                    size: p.size,
                    value: f.constant.unwrap_or(0),
                });
                out.total_size = offset + p.size;
            }
            FieldType::Nested(s) => add_fields(out, &s.fields, &path),
        }
    }
}

/// Bytes needed before a field of `alignment` placed at `cursor`.
pub fn padding_for(cursor: usize, alignment: usize) -> usize {
    if cursor == 0 || alignment == 0 || cursor % alignment == 0 {
        0
    } else {
        alignment - cursor % alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn field(name: &str, ty: &str, reg: &SchemaRegistry) -> Field {
        Field::of_type(name, ty, reg).expect("field")
    }

    #[test]
    fn alignment_pads_before_wider_fields_only() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(field("a", "uint8", &reg))
            .with_field(field("b", "uint32", &reg))
            .with_field(field("c", "uint16", &reg))
            .with_field(field("d", "uint8", &reg));
        let e = expand(&s);
        let offsets: Vec<usize> = e.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 10]);
        assert_eq!(e.total_size, 11);
    }

    #[test]
    fn repeated_primitive_yields_indexed_paths() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(field("name", "uint16", &reg).repeated(3).expect("rep"));
        let e = expand(&s);
        let paths: Vec<&str> = e.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["name/0", "name/1", "name/2"]);
        assert!(e.fields.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(e.total_size, 6);
    }

    #[test]
    fn nested_structures_flatten_in_place() {
        let mut reg = SchemaRegistry::new();
        let point = Structure::new("point")
            .with_field(field("x", "uint16", &reg))
            .with_field(field("y", "uint8", &reg));
        reg.insert(point).expect("point");
        let s = Structure::new("shape")
            .with_field(field("kind", "uint8", &reg))
            .with_field(field("points", "point", &reg).repeated(2).expect("rep"))
            .with_field(field("origin", "point", &reg));
        let e = expand(&s);
        let layout: Vec<(&str, usize)> =
            e.fields.iter().map(|f| (f.path.as_str(), f.offset)).collect();
        assert_eq!(
            layout,
            vec![
                ("kind", 0),
                ("points/0/x", 2),
                ("points/0/y", 4),
                ("points/1/x", 6),
                ("points/1/y", 8),
                ("origin/x", 10),
                ("origin/y", 12),
            ]
        );
        assert_eq!(e.total_size, 13);
        let last = e.fields.last().expect("last");
        assert_eq!(e.total_size, last.offset + last.size);
    }

    #[test]
    fn constants_are_seeded() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("s")
            .with_field(field("magic", "uint16", &reg).constant(0xBEEF).expect("const"))
            .with_field(field("v", "uint8", &reg));
        let mut e = expand(&s);
        assert_eq!(e.get("magic"), Some(0xBEEF));
        e.set("magic", 1);
        e.set("v", 9);
        e.reset();
        assert_eq!(e.get("magic"), Some(0xBEEF));
        assert_eq!(e.get("v"), Some(0));
    }

    #[test]
    fn every_path_resolves_to_its_leaf() {
        let mut reg = SchemaRegistry::new();
        reg.insert(Structure::new("pair")
            .with_field(field("a", "uint8", &reg))
            .with_field(field("b", "uint32", &reg)))
            .expect("pair");
        let s = Structure::new("s").with_field(field("p", "pair", &reg).repeated(3).expect("rep"));
        let e = expand(&s);
        for f in &e.fields {
            let found = e.field_by_path(&f.path).expect("resolves");
            assert_eq!(found.offset, f.offset);
        }
    }

    #[test]
    fn empty_structure_has_zero_size() {
        let e = expand(&Structure::new("empty"));
        assert!(e.fields.is_empty());
        assert_eq!(e.total_size, 0);
    }
}
