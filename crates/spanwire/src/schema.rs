//! Field-marker schemas.
//!
//! A schema maps each serialized field of a type to a stable integer
//! *marker*. Markers, not names, travel on the wire, so a marker must never
//! change or be reused once a schema version has been released. Schemas are
//! managed outside this crate; codecs consume them through [`SchemaSource`].

use std::sync::Arc;

use dashmap::DashMap;

/// The released field markers of one type.
///
/// Fields are kept in the order they were declared to the descriptor; the
/// codec sorts them by name itself, so declaration order carries no meaning
/// on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDescriptor {
    fields: Vec<(String, u32)>,
}

impl SchemaDescriptor {
    /// Creates an empty schema.
    #[must_use]
    pub const fn new() -> Self { Self { fields: Vec::new() } }

    /// Adds a field with its marker, replacing an earlier entry of the same
    /// name.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, marker: u32) -> Self {
        self.insert(name, marker);
        self
    }

    /// Adds a field with its marker in place.
    pub fn insert(&mut self, name: impl Into<String>, marker: u32) {
        let name = name.into();
        if let Some(entry) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = marker;
        } else {
            self.fields.push((name, marker));
        }
    }

    /// Returns the marker assigned to `name`, if the field is part of the
    /// schema.
    #[must_use]
    pub fn marker(&self, name: &str) -> Option<u32> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, m)| *m)
    }

    /// Iterates over `(name, marker)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.fields.iter().map(|(n, m)| (n.as_str(), *m))
    }

    /// Returns the number of fields in the schema.
    #[must_use]
    pub fn len(&self) -> usize { self.fields.len() }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

impl<S: Into<String>> FromIterator<(S, u32)> for SchemaDescriptor {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        let mut schema = Self::new();
        for (name, marker) in iter {
            schema.insert(name, marker);
        }
        schema
    }
}

/// Supplies schemas by stable type name.
///
/// Returning `None` is fatal for the codec being constructed.
pub trait SchemaSource: Send + Sync {
    /// Returns the schema for `type_name`, if one has been released.
    fn schema(&self, type_name: &str) -> Option<SchemaDescriptor>;
}

impl<S: SchemaSource + ?Sized> SchemaSource for Arc<S> {
    fn schema(&self, type_name: &str) -> Option<SchemaDescriptor> {
        (**self).schema(type_name)
    }
}

impl<S: SchemaSource + ?Sized> SchemaSource for &S {
    fn schema(&self, type_name: &str) -> Option<SchemaDescriptor> {
        (**self).schema(type_name)
    }
}

/// A concurrent, in-memory [`SchemaSource`].
///
/// Cloning is cheap; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchemas {
    schemas: Arc<DashMap<String, SchemaDescriptor>>,
}

impl InMemorySchemas {
    /// Creates an empty schema table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Publishes the schema for `type_name`, returning the previous one.
    pub fn insert(
        &self,
        type_name: impl Into<String>,
        schema: SchemaDescriptor,
    ) -> Option<SchemaDescriptor> {
        self.schemas.insert(type_name.into(), schema)
    }

    /// Withdraws the schema for `type_name`.
    pub fn remove(&self, type_name: &str) -> Option<SchemaDescriptor> {
        self.schemas.remove(type_name).map(|(_, schema)| schema)
    }

    /// Returns the number of published schemas.
    #[must_use]
    pub fn len(&self) -> usize { self.schemas.len() }

    /// Returns `true` if no schema has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.schemas.is_empty() }
}

impl SchemaSource for InMemorySchemas {
    fn schema(&self, type_name: &str) -> Option<SchemaDescriptor> {
        self.schemas.get(type_name).map(|entry| entry.value().clone())
    }
}
