//! Shared records, schemas and registries for spanwire integration tests.

#![allow(missing_docs)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

use std::{
    sync::{Arc, Barrier},
    time::Duration,
};

use spanwire::{
    Decoder, Encoder, FieldValue, InMemorySchemas, Record, RegistryBuilder,
    RegistryError, SerializationContext, SerializationFault, Shared,
    TypeRegistry,
    model::{self, InvocationNode, TimerData},
};

// ============================================================================
// Schemas and registries
// ============================================================================

/// Publishes `fields` as the schema of `type_name` on `schemas`.
pub fn publish(
    schemas: &InMemorySchemas,
    type_name: &str,
    fields: &[(&str, u32)],
) {
    schemas.insert(type_name, fields.iter().copied().collect());
}

/// Builds a registry from `schemas`, registering types with `register`.
pub fn registry(
    schemas: InMemorySchemas,
    register: impl FnOnce(&mut RegistryBuilder) -> Result<(), RegistryError>,
) -> TypeRegistry {
    let mut builder = TypeRegistry::builder(schemas);
    register(&mut builder).unwrap();
    builder.build()
}

/// The standard registry used by the producer side of most tests.
pub fn standard() -> TypeRegistry { model::standard_registry().unwrap() }

// ============================================================================
// Versioned records
// ============================================================================

/// The record as released first: `a` (marker 1) and `b` (marker 2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[record(name = "it.Point")]
pub struct PointV1 {
    pub a: i32,
    pub b: String,
}

/// A later release that only knows `a`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[record(name = "it.Point")]
pub struct PointA {
    pub a: i32,
}

/// A later release that added `c` (marker 3) and `d` (marker 4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[record(name = "it.Point")]
pub struct PointV2 {
    pub a: i32,
    pub b: String,
    pub c: Option<u64>,
    pub d: Vec<String>,
}

/// The schema of `it.Point` restricted to `fields`, with released markers.
pub fn point_schemas(fields: &[&str]) -> InMemorySchemas {
    const MARKERS: [(&str, u32); 4] = [("a", 1), ("b", 2), ("c", 3), ("d", 4)];

    let schemas = InMemorySchemas::new();
    let released = MARKERS
        .iter()
        .filter(|(name, _)| fields.contains(name))
        .copied()
        .collect::<Vec<_>>();
    publish(&schemas, "it.Point", &released);
    schemas
}

/// A registry that knows `T` as `it.Point` under the given schema fields.
pub fn point_registry<T: Record>(fields: &[&str]) -> TypeRegistry {
    registry(point_schemas(fields), |builder| {
        builder.record::<T>()?;
        Ok(())
    })
}

// ============================================================================
// Object graphs
// ============================================================================

/// A node of an arbitrary graph of shared objects.
#[derive(Debug, Default, Record)]
#[record(name = "it.Link")]
pub struct Link {
    pub label: String,
    pub next: Option<Shared<Link>>,
    pub also: Option<Shared<Link>>,
}

impl Link {
    pub fn new(label: &str) -> Shared<Self> {
        Shared::new(Self { label: label.to_owned(), ..Self::default() })
    }
}

/// A registry tracking [`Link`] references.
pub fn link_registry() -> TypeRegistry {
    let schemas = InMemorySchemas::new();
    publish(&schemas, Link::TYPE_NAME, &[
        ("label", 1),
        ("next", 2),
        ("also", 3),
    ]);

    registry(schemas, |builder| {
        builder.tracked::<Link>()?;
        Ok(())
    })
}

/// Builds a call tree of `depth` levels with `breadth` children per node.
pub fn call_tree(depth: u32, breadth: u32) -> Shared<InvocationNode> {
    fn grow(node: &Shared<InvocationNode>, depth: u32, breadth: u32) {
        if depth == 0 {
            return;
        }
        for i in 0..breadth {
            let method = u64::from(depth * 100 + i);
            let child =
                InvocationNode::new(method, Duration::from_micros(method));
            child.write().timer = Some(TimerData {
                count: u64::from(i) + 1,
                ..TimerData::default()
            });
            grow(&child, depth - 1, breadth);
            InvocationNode::push_child(node, child);
        }
    }

    let root = InvocationNode::new(0, Duration::from_millis(1));
    grow(&root, depth, breadth);
    root
}

/// Collects the method identifiers of a call tree in depth-first order.
pub fn methods(node: &Shared<InvocationNode>) -> Vec<u64> {
    let node = node.read();
    std::iter::once(node.method_ident)
        .chain(node.children.iter().flat_map(methods))
        .collect()
}

// ============================================================================
// Clone isolation
// ============================================================================

/// A field that, while being encoded, meets another thread at a barrier
/// twice: once to let it start mutating and once to wait for it to finish.
#[derive(Debug, Clone, Default)]
pub struct Gate(pub Option<Arc<Barrier>>);

impl FieldValue for Gate {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        if let Some(barrier) = &self.0 {
            barrier.wait();
            barrier.wait();
        }
        encoder.emit_bool(false);
        Ok(())
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        decoder.read_bool()?;
        Ok(Self::default())
    }
}

/// A value a collector keeps updating while it is being sent.
///
/// `gate` sorts before `value`, so it is encoded first.
#[derive(Debug, Clone, Default, Record)]
#[record(name = "it.Sampled")]
pub struct Sampled {
    pub gate: Gate,
    pub value: u64,
}

/// A registry snapshotting [`Sampled`] with `Clone`.
pub fn sampled_registry() -> TypeRegistry {
    let schemas = InMemorySchemas::new();
    publish(&schemas, Sampled::TYPE_NAME, &[("gate", 1), ("value", 2)]);

    registry(schemas, |builder| {
        builder.cloning::<Sampled>(spanwire::CloneViaClone)?;
        Ok(())
    })
}
