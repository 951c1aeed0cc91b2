use std::{
    any::TypeId,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use super::{CloneScope, CloneStrategy, CloneViaClone, CloneViaRoundTrip};
use crate::{
    Record,
    context::SerializationContext,
    error::CloneFailure,
    registry::TypeRegistry,
    schema::{InMemorySchemas, SchemaDescriptor},
    shared::Shared,
    wire::Encoder,
};

#[derive(Debug, Default, Clone, Record)]
#[record(name = "test.Tally")]
struct Tally {
    count: u64,
    parts: Vec<Shared<Tally>>,
}

fn tally(count: u64, parts: Vec<Shared<Tally>>) -> Shared<Tally> {
    Shared::new(Tally { count, parts })
}

fn registry(strategy: impl CloneStrategy<Tally> + 'static) -> TypeRegistry {
    let schemas = InMemorySchemas::new();
    schemas.insert(
        Tally::TYPE_NAME,
        SchemaDescriptor::new().field("count", 1).field("parts", 2),
    );

    let mut builder = TypeRegistry::builder(schemas);
    builder.cloning::<Tally>(strategy).unwrap();
    builder.build()
}

fn total(node: &Shared<Tally>) -> u64 {
    let node = node.read();
    node.count + node.parts.iter().map(total).sum::<u64>()
}

fn round_trip(registry: &TypeRegistry, value: &Shared<Tally>) -> Shared<Tally> {
    let bytes = registry.serialize_to_vec(value).unwrap();
    registry.from_bytes(&bytes).unwrap()
}

/// Deep-copies through the scope and counts its invocations.
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl CloneStrategy<Tally> for Counting {
    fn clone_value(
        &self,
        value: &Tally,
        scope: &CloneScope<'_, Tally>,
    ) -> Result<Tally, CloneFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(scope.nested_context().is_cloning(TypeId::of::<Tally>()));

        CloneViaRoundTrip.clone_value(value, scope)
    }
}

#[test]
fn snapshot_is_encoded() {
    let registry = registry(CloneViaClone);
    let original = tally(3, vec![tally(4, Vec::new())]);

    let decoded = round_trip(&registry, &original);

    assert!(!decoded.ptr_eq(&original));
    assert_eq!(total(&decoded), 7);
}

#[test]
fn round_trip_strategy_copies_deeply() {
    let registry = registry(CloneViaRoundTrip);
    let original = tally(1, vec![tally(2, Vec::new()), tally(5, Vec::new())]);

    let decoded = round_trip(&registry, &original);

    assert_eq!(total(&decoded), 8);
    assert_eq!(decoded.read().parts.len(), 2);
}

#[test]
fn nested_values_of_the_cloned_type_are_not_cloned_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry(Counting { calls: calls.clone() });
    let original =
        tally(1, vec![tally(2, vec![tally(3, Vec::new())]), tally(4, vec![])]);

    let decoded = round_trip(&registry, &original);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(total(&decoded), 10);
}

#[test]
fn failed_clone_falls_back_to_the_original() {
    let registry = registry(|_: &Tally| -> Result<Tally, CloneFailure> {
        Err(CloneFailure::new(Tally::TYPE_NAME, "busy"))
    });
    let original = tally(6, vec![tally(1, Vec::new())]);

    let decoded = round_trip(&registry, &original);

    assert_eq!(total(&decoded), 7);
}

#[test]
fn panicking_strategy_falls_back_to_the_original() {
    let registry = registry(|_: &Tally| -> Result<Tally, CloneFailure> {
        panic!("strategy bug")
    });
    let original = tally(9, Vec::new());

    let decoded = round_trip(&registry, &original);

    assert_eq!(total(&decoded), 9);

    // the value is still usable after the panic
    original.write().count += 1;
    assert_eq!(original.read().count, 10);
}

#[test]
fn guard_is_released_after_the_write() {
    let registry = registry(CloneViaClone);
    let codec = registry.codec_of::<Shared<Tally>>().unwrap();
    let mut context = SerializationContext::new();

    codec
        .write(
            &tally(1, Vec::new()),
            &mut Encoder::new(),
            &registry,
            &mut context,
        )
        .unwrap();

    assert!(!context.is_cloning(TypeId::of::<Tally>()));
}

#[test]
fn shared_instances_stay_shared() {
    let registry = registry(CloneViaClone);
    let shared = tally(2, Vec::new());
    let original = tally(0, vec![shared.clone(), shared]);

    let decoded = round_trip(&registry, &original);

    let parts = decoded.read().parts.clone();
    assert!(parts[0].ptr_eq(&parts[1]));
    assert_eq!(parts[0].read().count, 2);
}

#[test]
fn two_node_cycle_terminates() {
    let registry = registry(CloneViaClone);
    let a = tally(1, Vec::new());
    let b = tally(2, vec![a.clone()]);
    a.write().parts.push(b.clone());

    let decoded = round_trip(&registry, &a);

    let next = decoded.read().parts[0].clone();
    assert_eq!(next.read().count, 2);
    assert!(next.read().parts[0].ptr_eq(&decoded));

    a.write().parts.clear();
    decoded.write().parts.clear();
}

#[test]
fn self_reference_terminates() {
    let registry = registry(CloneViaClone);
    let a = tally(5, Vec::new());
    a.write().parts.push(a.clone());

    let decoded = round_trip(&registry, &a);

    assert!(decoded.read().parts[0].ptr_eq(&decoded));
    assert_eq!(decoded.read().count, 5);

    a.write().parts.clear();
    decoded.write().parts.clear();
}

#[test]
fn deep_copy_of_a_cycle_terminates() {
    let registry = registry(CloneViaRoundTrip);
    let a = tally(1, Vec::new());
    let b = tally(2, vec![a.clone()]);
    a.write().parts.push(b.clone());

    let decoded = round_trip(&registry, &a);

    // the snapshot is a copy, so the cycle closes among copied nodes
    let next = decoded.read().parts[0].clone();
    let back = next.read().parts[0].clone();
    assert_eq!(next.read().count, 2);
    assert_eq!(back.read().count, 1);
    assert!(back.read().parts[0].ptr_eq(&next));

    a.write().parts.clear();
    next.write().parts.clear();
}

#[test]
fn nested_shared_values_are_assigned_ids() {
    let registry = registry(CloneViaClone);
    let shared = tally(3, Vec::new());
    let original = tally(0, vec![shared.clone()]);
    let mut context = SerializationContext::new();
    let codec = registry.codec_of::<Shared<Tally>>().unwrap();

    codec
        .write(&original, &mut Encoder::new(), &registry, &mut context)
        .unwrap();

    assert_eq!(context.written_references(), 2);
}
