//! The flattening engine: decides, for every object the scan closes, which
//! table it belongs to and which rows to emit.
//!
//! The engine owns all conversion state: one accumulator per open object,
//! the ancestor identity stack used to synthesize foreign-key columns, and
//! the per-type registry of identifiers already written. It is a pure state
//! machine over [`Event`]s; delivery of the emitted rows is the table
//! manager's job.

use std::collections::{HashMap, HashSet};

use crate::shred::error::ShredError;
use crate::shred::parser::Event;
use crate::shred::path::{entity_table_name, link_table_name, table_name, PathStep};
use crate::shred::types::{Row, Scalar};

/// Field that makes an object a top-level entity
const ID_FIELD: &str = "id";

/// A row routed to a named table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub table: String,
    pub row: Row,
}

/// How an open object relates to its parent; fixed at open time.
///
/// The payload doubles as the object's entity type name: the owning array's
/// field for elements, the object's own field for embedded sub-objects.
#[derive(Debug)]
enum ObjectKind {
    Root,
    Element { collection: String },
    Embedded { field: String },
}

#[derive(Debug)]
struct ObjectState {
    kind: ObjectKind,
    /// Field accumulator, in encounter order
    fields: Row,
    /// Key parsed but value not yet seen
    pending_key: Option<String>,
    /// Whether this object pushed onto the ancestor identity stack
    pushed_id: bool,
}

impl ObjectState {
    fn type_name(&self) -> &str {
        match &self.kind {
            ObjectKind::Root => "root",
            ObjectKind::Element { collection } => collection,
            ObjectKind::Embedded { field } => field,
        }
    }
}

#[derive(Debug)]
struct ArrayState {
    /// Field name the array hangs off; elements take it as their entity type
    name: String,
}

#[derive(Debug)]
enum Container {
    Object(ObjectState),
    Array(ArrayState),
}

#[derive(Debug)]
struct Frame {
    /// This container's contribution to the path; `None` at the root
    step: Option<PathStep>,
    container: Container,
}

/// Streaming flattener; feed events in document order, collect emissions
pub struct Flattener {
    stack: Vec<Frame>,
    /// (entity type, identifier) per open ancestor that has one, root first
    ancestors: Vec<(String, Scalar)>,
    /// Identifiers already written per entity type
    seen: HashMap<String, HashSet<Scalar>>,
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new()
    }
}

impl Flattener {
    pub fn new() -> Self {
        Flattener {
            stack: Vec::new(),
            ancestors: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// Process one event, returning the rows it caused (at most two)
    pub fn handle(&mut self, event: Event) -> Result<Vec<Emission>, ShredError> {
        match event {
            Event::StartObject => {
                self.open_object()?;
                Ok(Vec::new())
            }
            Event::StartArray => {
                self.open_array()?;
                Ok(Vec::new())
            }
            Event::EndArray => {
                self.stack.pop();
                Ok(Vec::new())
            }
            Event::Key(key) => {
                self.set_key(key)?;
                Ok(Vec::new())
            }
            Event::String(value) => {
                self.scalar(Scalar::String(value))?;
                Ok(Vec::new())
            }
            Event::Number(value) => {
                self.scalar(Scalar::Number(value))?;
                Ok(Vec::new())
            }
            Event::Bool(value) => {
                self.scalar(Scalar::Bool(value))?;
                Ok(Vec::new())
            }
            Event::Null => {
                self.scalar(Scalar::Null)?;
                Ok(Vec::new())
            }
            Event::EndObject => self.close_object(),
        }
    }

    fn open_object(&mut self) -> Result<(), ShredError> {
        let (step, kind) = match self.stack.last_mut() {
            None => (None, ObjectKind::Root),
            Some(Frame {
                container: Container::Object(parent),
                ..
            }) => {
                let field = parent.pending_key.take().ok_or_else(|| {
                    ShredError::Unsupported("object value without a key".to_string())
                })?;
                (
                    Some(PathStep::Field(field.clone())),
                    ObjectKind::Embedded { field },
                )
            }
            Some(Frame {
                container: Container::Array(array),
                ..
            }) => (
                Some(PathStep::Item),
                ObjectKind::Element {
                    collection: array.name.clone(),
                },
            ),
        };
        self.stack.push(Frame {
            step,
            container: Container::Object(ObjectState {
                kind,
                fields: Vec::new(),
                pending_key: None,
                pushed_id: false,
            }),
        });
        Ok(())
    }

    fn open_array(&mut self) -> Result<(), ShredError> {
        let (step, name) = match self.stack.last_mut() {
            None => (None, String::from("root")),
            Some(Frame {
                container: Container::Object(parent),
                ..
            }) => {
                let field = parent.pending_key.take().ok_or_else(|| {
                    ShredError::Unsupported("array value without a key".to_string())
                })?;
                (Some(PathStep::Field(field.clone())), field)
            }
            Some(Frame {
                container: Container::Array(array),
                ..
            }) => (Some(PathStep::Item), array.name.clone()),
        };
        self.stack.push(Frame {
            step,
            container: Container::Array(ArrayState { name }),
        });
        Ok(())
    }

    fn set_key(&mut self, key: String) -> Result<(), ShredError> {
        match self.stack.last_mut() {
            Some(Frame {
                container: Container::Object(object),
                ..
            }) => {
                object.pending_key = Some(key);
                Ok(())
            }
            _ => Err(ShredError::Unsupported(
                "object key outside of an object".to_string(),
            )),
        }
    }

    fn scalar(&mut self, value: Scalar) -> Result<(), ShredError> {
        match self.stack.last_mut() {
            Some(Frame {
                container: Container::Object(object),
                ..
            }) => {
                let key = object.pending_key.take().ok_or_else(|| {
                    ShredError::Unsupported("scalar value without a key".to_string())
                })?;
                // A string or number identifier makes this object's identity
                // visible to everything nested under it
                if key == ID_FIELD
                    && !object.pushed_id
                    && matches!(value, Scalar::String(_) | Scalar::Number(_))
                {
                    let entity = object.type_name().to_string();
                    self.ancestors.push((entity, value.clone()));
                    object.pushed_id = true;
                }
                upsert(&mut object.fields, key, value);
                Ok(())
            }
            Some(Frame {
                container: Container::Array(_),
                ..
            }) => Err(ShredError::Unsupported(
                "arrays of scalar values have no tabular form".to_string(),
            )),
            None => Err(ShredError::Unsupported(
                "scalar value at document root".to_string(),
            )),
        }
    }

    /// The object-close classifier. Embedded sub-objects merge upward and
    /// never emit; array elements emit a link row and/or a data row per the
    /// rules in the module docs of [`crate::shred`].
    fn close_object(&mut self) -> Result<Vec<Emission>, ShredError> {
        let Some(frame) = self.stack.pop() else {
            return Err(ShredError::Unsupported(
                "unbalanced object close".to_string(),
            ));
        };
        let Container::Object(object) = frame.container else {
            return Err(ShredError::Unsupported(
                "unbalanced object close".to_string(),
            ));
        };

        let mut emissions = Vec::new();
        match object.kind {
            ObjectKind::Root => {}
            ObjectKind::Embedded { ref field } => {
                if let Some(Frame {
                    container: Container::Object(parent),
                    ..
                }) = self.stack.last_mut()
                {
                    for (key, value) in object.fields {
                        upsert(&mut parent.fields, format!("{field}__{key}"), value);
                    }
                }
            }
            ObjectKind::Element { ref collection } => {
                let is_top_level = object.fields.iter().any(|(key, _)| key == ID_FIELD);
                let name = table_name(
                    self.stack
                        .iter()
                        .filter_map(|f| f.step.as_ref())
                        .chain(frame.step.as_ref()),
                );
                if is_top_level {
                    // Occurrence first: the full ancestor-id chain at this
                    // nesting point, so joins can be reconstructed
                    if self.ancestors.len() > 1 {
                        emissions.push(Emission {
                            table: link_table_name(&name),
                            row: self.ancestor_row(),
                        });
                    }
                    // Then the entity itself, once per unique identifier
                    let id = object
                        .fields
                        .iter()
                        .find(|(key, _)| key == ID_FIELD)
                        .map(|(_, value)| value.clone());
                    if let Some(id) = id {
                        if self
                            .seen
                            .entry(collection.clone())
                            .or_default()
                            .insert(id)
                        {
                            emissions.push(Emission {
                                table: entity_table_name(collection),
                                row: object.fields,
                            });
                        }
                    }
                } else if !self.ancestors.is_empty() {
                    // Anonymous child rows are keyed by their ancestors
                    let mut row = self.ancestor_row();
                    for (key, value) in object.fields {
                        upsert(&mut row, key, value);
                    }
                    emissions.push(Emission { table: name, row });
                }
            }
        }

        // Closing takes this object's identity out of scope
        if object.pushed_id {
            self.ancestors.pop();
        }
        Ok(emissions)
    }

    fn ancestor_row(&self) -> Row {
        let mut row = Row::new();
        for (entity, id) in &self.ancestors {
            upsert(&mut row, format!("{entity}__id"), id.clone());
        }
        row
    }
}

/// Insert or overwrite, preserving first-insertion column order
fn upsert(row: &mut Row, key: String, value: Scalar) {
    match row.iter_mut().find(|(existing, _)| *existing == key) {
        Some((_, slot)) => *slot = value,
        None => row.push((key, value)),
    }
}
