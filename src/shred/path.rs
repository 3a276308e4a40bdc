//! Container paths and output table naming.
//!
//! A path is the sequence of steps from the document root to a container:
//! object fields by name, array elements by a position-less marker. Paths
//! only exist while their container is open; they are rendered to a table
//! name at the naming boundary and nowhere else.

/// One step of a container path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Descends into an object field
    Field(String),
    /// Descends into an array element
    Item,
}

/// Render a path as an output table name.
///
/// A field step followed by element steps collapses into a single
/// `name[*]` token (one `[*]` per array hop), and tokens join with `.`,
/// so an object two array hops deep is named `a[*].b[*]`. Elements of a
/// root-level array get the synthetic token `root[*]`. Deterministic:
/// equal paths always yield equal names.
pub fn table_name<'a>(steps: impl Iterator<Item = &'a PathStep>) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for step in steps {
        match step {
            PathStep::Field(name) => tokens.push(name.clone()),
            PathStep::Item => match tokens.last_mut() {
                Some(last) => last.push_str("[*]"),
                None => tokens.push(String::from("root[*]")),
            },
        }
    }
    tokens.join(".")
}

/// Name of the link table recording ancestor identifiers for occurrences
/// of the entity at `path_name`
pub fn link_table_name(path_name: &str) -> String {
    format!("{path_name}.id")
}

/// Name of the deduplicated table holding one row per unique entity of
/// `entity_type`, regardless of where occurrences were nested
pub fn entity_table_name(entity_type: &str) -> String {
    format!("{entity_type}[*]")
}
