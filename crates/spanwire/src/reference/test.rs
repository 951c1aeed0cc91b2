use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::ReferenceTrackingCodec;
use crate::{
    Record,
    context::SerializationContext,
    error::{InvalidReferenceFault, SerializationFault},
    registry::TypeRegistry,
    schema::{InMemorySchemas, SchemaDescriptor},
    shared::Shared,
    wire::Encoder,
};

#[derive(Debug, Default, Record)]
#[record(name = "test.Node")]
struct Node {
    name: String,
    next: Option<Shared<Node>>,
    peers: Vec<Shared<Node>>,
}

#[derive(Debug, Default, Record)]
#[record(name = "test.Holder")]
struct Holder {
    node: Option<Shared<Node>>,
}

fn node(name: &str) -> Shared<Node> {
    Shared::new(Node { name: name.to_owned(), ..Node::default() })
}

fn schemas() -> InMemorySchemas {
    let schemas = InMemorySchemas::new();
    schemas.insert(
        Node::TYPE_NAME,
        SchemaDescriptor::new()
            .field("name", 1)
            .field("next", 2)
            .field("peers", 3),
    );
    schemas.insert(Holder::TYPE_NAME, SchemaDescriptor::new().field("node", 1));
    schemas
}

fn registry() -> TypeRegistry {
    let mut builder = TypeRegistry::builder(schemas());
    builder.tracked::<Node>().unwrap().tracked::<Holder>().unwrap();
    builder.build()
}

fn round_trip(registry: &TypeRegistry, root: &Shared<Node>) -> Shared<Node> {
    let bytes = registry.serialize_to_vec(root).unwrap();
    registry.from_bytes(&bytes).unwrap()
}

#[test]
fn cycle_comes_back_as_the_same_objects() {
    let registry = registry();
    let a = node("a");
    let b = node("b");
    a.write().next = Some(b.clone());
    b.write().next = Some(a.clone());

    let decoded = round_trip(&registry, &a);

    let b = decoded.read().next.clone().unwrap();
    let back = b.read().next.clone().unwrap();
    assert!(back.ptr_eq(&decoded));
    assert_eq!(b.read().name, "b");
    assert_eq!(back.read().name, "a");
}

#[test]
fn self_reference() {
    let registry = registry();
    let a = node("self");
    a.write().next = Some(a.clone());

    let decoded = round_trip(&registry, &a);

    let next = decoded.read().next.clone().unwrap();
    assert!(next.ptr_eq(&decoded));
}

#[test]
fn shared_instance_is_written_once() {
    let registry = registry();
    let shared = node("shared-payload-name");
    let root = node("root");
    root.write().peers = vec![shared.clone(), shared.clone(), shared];

    let bytes = registry.serialize_to_vec(&root).unwrap();
    let decoded: Shared<Node> = registry.from_bytes(&bytes).unwrap();

    let peers = decoded.read().peers.clone();
    assert_eq!(peers.len(), 3);
    assert!(peers[0].ptr_eq(&peers[1]));
    assert!(peers[1].ptr_eq(&peers[2]));
    assert_eq!(peers[0].read().name, "shared-payload-name");

    let occurrences = bytes
        .windows("shared-payload-name".len())
        .filter(|window| *window == b"shared-payload-name".as_slice())
        .count();
    assert_eq!(occurrences, 1);
}

#[test]
fn distinct_but_equal_objects_stay_distinct() {
    let registry = registry();
    let root = node("root");
    root.write().peers = vec![node("twin"), node("twin")];

    let decoded = round_trip(&registry, &root);

    let peers = decoded.read().peers.clone();
    assert!(!peers[0].ptr_eq(&peers[1]));
}

#[test]
fn ids_do_not_leak_between_operations() {
    let registry = registry();
    let a = node("a");
    a.write().next = Some(a.clone());

    let first = registry.serialize_to_vec(&a).unwrap();
    let second = registry.serialize_to_vec(&a).unwrap();

    assert_eq!(first, second);
}

#[test]
fn written_objects_are_pinned_for_the_operation() {
    let registry = registry();
    let a = node("a");
    let b = node("b");
    a.write().peers = vec![b.clone(), b.clone()];

    let codec = registry.codec_of::<Shared<Node>>().unwrap();
    let mut context = SerializationContext::new();
    codec
        .write(&a, &mut Encoder::new(), &registry, &mut context)
        .unwrap();

    assert_eq!(context.written_references(), 2);
    assert_eq!(b.strong_count(), 4);

    context.reset();
    assert_eq!(b.strong_count(), 3);
}

#[test]
fn unknown_id_is_an_invalid_reference() {
    let registry = registry();
    let tag = u8::try_from(registry.tag_of::<Shared<Node>>().unwrap()).unwrap();

    let fault = registry.from_bytes::<Shared<Node>>(&[tag, 5]).unwrap_err();

    assert!(matches!(
        fault,
        SerializationFault::InvalidReference(InvalidReferenceFault { id: 5 })
    ));
}

#[test]
fn reference_to_another_type_is_rejected() {
    let registry = registry();
    let tag =
        u8::try_from(registry.tag_of::<Shared<Holder>>().unwrap()).unwrap();

    // a new Holder (id 1) whose `node` field refers back to id 1
    let bytes = [tag, 0, 1, 1, 2, 1, 1];
    let fault = registry.from_bytes::<Shared<Holder>>(&bytes).unwrap_err();

    assert_eq!(fault.field_path(), [(Holder::TYPE_NAME, "node")]);
    assert!(matches!(
        fault.root_cause(),
        SerializationFault::ReferenceTypeMismatch { id: 1, .. }
    ));
}

#[test]
fn fixup_runs_once_per_outermost_read() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut builder = TypeRegistry::builder(schemas());
    let inner = builder.field_codec::<Node>().unwrap();
    builder
        .register(ReferenceTrackingCodec::new(inner).with_fixup(
            move |root: &mut Shared<Node>| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(root.read().name, "root");
                Ok::<(), SerializationFault>(())
            },
        ))
        .unwrap();
    let registry = builder.build();

    let root = node("root");
    let child = node("child");
    child.write().next = Some(node("grandchild"));
    root.write().peers = vec![child];

    let bytes = registry.serialize_to_vec(&root).unwrap();
    registry.from_bytes::<Shared<Node>>(&bytes).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    registry.from_bytes::<Shared<Node>>(&bytes).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn shared_and_by_value_codecs_coexist() {
    let mut builder = TypeRegistry::builder(schemas());
    builder.record::<Node>().unwrap().tracked::<Node>().unwrap();
    let registry = builder.build();

    let by_value = registry.tag_of::<Node>().unwrap();
    let shared = registry.tag_of::<Shared<Node>>().unwrap();
    assert_eq!(shared, by_value + 1);
    assert_eq!(
        registry.codec_by_tag(shared).unwrap().type_name(),
        "Shared<test.Node>"
    );
}
