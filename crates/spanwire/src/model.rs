//! The telemetry types the platform ships with.
//!
//! [`standard_registry`] registers them in their released tag order and
//! [`standard_schemas`] publishes their released field markers. Both lists
//! are wire format: new types and fields are only ever appended.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use crate::{
    AnyValue, Config, DefaultConfig, ParentLinkReconstructor, ParentLinked,
    Record, ReferenceTrackingCodec, RegistryBuilder, RegistryError,
    SchemaDescriptor, Shared, TypeRegistry, WeakShared,
    cloning::CloneViaClone,
    schema::{InMemorySchemas, SchemaSource},
};

/// Identifiers and time stamp shared by every measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[record(name = "apm.MeasurementBase")]
pub struct MeasurementBase {
    /// Agent the measurement was taken on.
    pub platform_ident: u64,
    /// Sensor that produced it.
    pub sensor_type_ident: u64,
    /// Instrumented method.
    pub method_ident: u64,
    /// When the measurement was taken.
    pub timestamp: Option<SystemTime>,
}

/// Aggregated timings of one method.
#[derive(Debug, Clone, Default, PartialEq, Record)]
#[record(name = "apm.TimerData")]
pub struct TimerData {
    /// Identifiers of the measured method.
    #[record(flatten)]
    pub base: MeasurementBase,
    /// Number of recorded invocations.
    pub count: u64,
    /// Sum of all durations, in milliseconds.
    pub duration: f64,
    /// Shortest duration, in milliseconds.
    pub min: f64,
    /// Longest duration, in milliseconds.
    pub max: f64,
}

impl TimerData {
    /// Adds one invocation of `duration_ms` milliseconds.
    pub fn add(&mut self, duration_ms: f64) {
        if self.count == 0 {
            self.min = duration_ms;
            self.max = duration_ms;
        } else {
            self.min = self.min.min(duration_ms);
            self.max = self.max.max(duration_ms);
        }
        self.count += 1;
        self.duration += duration_ms;
    }

    /// Mean duration in milliseconds, `None` before the first invocation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.duration / self.count as f64)
    }
}

/// A node of a recorded call tree.
///
/// Children are stored; the parent pointer is not, and is rebuilt after
/// reading by [`ParentLinkReconstructor`].
#[derive(Debug, Default, Record)]
#[record(name = "apm.InvocationNode")]
pub struct InvocationNode {
    /// Invoked method.
    pub method_ident: u64,
    /// When the invocation started.
    pub timestamp: Option<SystemTime>,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// Timings collected inside this invocation, if any.
    pub timer: Option<TimerData>,
    /// Nested invocations in call order.
    pub children: Vec<Shared<InvocationNode>>,
    /// The calling node.
    #[record(transient)]
    pub parent: WeakShared<InvocationNode>,
}

impl InvocationNode {
    /// Creates a root node for `method_ident`.
    #[must_use]
    pub fn new(method_ident: u64, duration: Duration) -> Shared<Self> {
        Shared::new(Self { method_ident, duration, ..Self::default() })
    }

    /// Appends `child` to `parent` and points it back at `parent`.
    pub fn push_child(parent: &Shared<Self>, child: Shared<Self>) {
        child.write().parent = parent.downgrade();
        parent.write().children.push(child);
    }

    /// Returns the calling node, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Shared<Self>> { self.parent.upgrade() }

    /// Counts the nodes below this one.
    #[must_use]
    pub fn nested_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.read().nested_count())
            .sum()
    }
}

impl ParentLinked for InvocationNode {
    fn children(&self) -> Vec<Shared<Self>> { self.children.clone() }

    fn set_parent(&mut self, parent: WeakShared<Self>) {
        self.parent = parent;
    }
}

/// The key of one entry in the storage index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[record(name = "apm.IndexEntry")]
pub struct IndexEntry {
    /// Agent the indexed data belongs to.
    pub platform_ident: u64,
    /// Sensor that produced it.
    pub sensor_type_ident: u64,
    /// Method it was measured on.
    pub method_ident: u64,
    /// Stable name of the indexed record type.
    pub record_type: String,
    /// Earliest time stamp covered.
    pub from: Option<SystemTime>,
    /// Latest time stamp covered.
    pub to: Option<SystemTime>,
}

impl IndexEntry {
    /// Returns `true` if `time` falls into the covered range. Open ends
    /// match everything.
    #[must_use]
    pub fn covers(&self, time: SystemTime) -> bool {
        self.from.is_none_or(|from| from <= time)
            && self.to.is_none_or(|to| time <= to)
    }
}

/// A single named value reported by an agent.
#[derive(Debug, Clone, Default, Record)]
#[record(name = "apm.MetricSample")]
pub struct MetricSample {
    /// Metric name.
    pub name: String,
    /// The value; its type is only known at runtime.
    pub value: Option<AnyValue>,
    /// Free-form dimensions.
    pub tags: HashMap<String, String>,
    /// When the value was sampled.
    pub timestamp: Option<SystemTime>,
}

/// The released field markers of the standard types.
#[must_use]
pub fn standard_schemas() -> InMemorySchemas {
    let schemas = InMemorySchemas::new();

    schemas.insert(
        TimerData::TYPE_NAME,
        SchemaDescriptor::new()
            .field("platform_ident", 1)
            .field("sensor_type_ident", 2)
            .field("method_ident", 3)
            .field("timestamp", 4)
            .field("count", 5)
            .field("duration", 6)
            .field("min", 7)
            .field("max", 8),
    );
    schemas.insert(
        InvocationNode::TYPE_NAME,
        SchemaDescriptor::new()
            .field("method_ident", 1)
            .field("timestamp", 2)
            .field("duration", 3)
            .field("children", 4)
            .field("timer", 5),
    );
    schemas.insert(
        IndexEntry::TYPE_NAME,
        SchemaDescriptor::new()
            .field("platform_ident", 1)
            .field("sensor_type_ident", 2)
            .field("method_ident", 3)
            .field("record_type", 4)
            .field("from", 5)
            .field("to", 6),
    );
    schemas.insert(
        MetricSample::TYPE_NAME,
        SchemaDescriptor::new()
            .field("name", 1)
            .field("value", 2)
            .field("tags", 3)
            .field("timestamp", 4),
    );

    schemas
}

/// Registers the standard types on `builder` in their released order.
///
/// # Errors
///
/// Fails if a schema is missing from the builder's source or a type is
/// already registered.
pub fn register_standard(
    builder: &mut RegistryBuilder,
) -> Result<&mut RegistryBuilder, RegistryError> {
    builder
        .record::<TimerData>()?
        .cloning::<TimerData>(CloneViaClone)?
        .retired("apm.ExceptionSensorData")?
        .record::<IndexEntry>()?
        .record::<MetricSample>()?;

    let node = builder.field_codec::<InvocationNode>()?;
    builder.register(
        ReferenceTrackingCodec::new(node).with_fixup(ParentLinkReconstructor),
    )
}

/// Builds a registry of the standard types from `schemas`, configured by
/// `C`.
///
/// # Errors
///
/// Fails like [`register_standard`].
pub fn standard_registry_with<C: Config>(
    schemas: impl SchemaSource + 'static,
) -> Result<TypeRegistry, RegistryError> {
    let mut builder = TypeRegistry::builder_with::<C>(schemas);
    register_standard(&mut builder)?;
    Ok(builder.build())
}

/// Builds a registry of the standard types with their released schemas.
///
/// # Errors
///
/// Fails like [`register_standard`].
pub fn standard_registry() -> Result<TypeRegistry, RegistryError> {
    standard_registry_with::<DefaultConfig>(standard_schemas())
}
