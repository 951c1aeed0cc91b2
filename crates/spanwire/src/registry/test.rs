use std::{
    io,
    time::{Duration, SystemTime},
};

use super::{BY_NAME_TAG, FIRST_APPLICATION_TAG, TypeRegistry};
use crate::{
    Record,
    config::{ByNameConfig, UnregisteredTypePolicy},
    error::{RegistryError, SerializationFault},
    schema::{InMemorySchemas, SchemaDescriptor},
    wire::{Decoder, Encoder},
};

#[derive(Debug, Default, PartialEq, Record)]
#[record(name = "test.Sample")]
struct Sample {
    value: u32,
}

#[derive(Debug, Default, PartialEq, Record)]
#[record(name = "test.Sample")]
struct Impostor {
    value: u32,
}

#[derive(Debug, Default, PartialEq, Record)]
#[record(name = "test.Later")]
struct Later {
    label: String,
}

fn schemas() -> InMemorySchemas {
    let schemas = InMemorySchemas::new();
    schemas.insert("test.Sample", SchemaDescriptor::new().field("value", 1));
    schemas.insert("test.Later", SchemaDescriptor::new().field("label", 1));
    schemas
}

#[test]
fn builtins_take_the_first_tags() {
    let registry = TypeRegistry::builder(InMemorySchemas::new()).build();

    assert_eq!(registry.tag_of::<bool>(), Some(1));
    assert_eq!(registry.tag_of::<u32>(), Some(4));
    assert_eq!(registry.tag_of::<f64>(), Some(11));
    assert_eq!(registry.tag_of::<String>(), Some(13));
    assert_eq!(registry.tag_of::<Duration>(), Some(14));
    assert_eq!(registry.tag_of::<SystemTime>(), Some(15));
    assert_eq!(registry.tag_count(), FIRST_APPLICATION_TAG as usize - 1);
    assert_eq!(registry.policy(), UnregisteredTypePolicy::Strict);
}

#[test]
fn builtin_values_are_top_level_records() {
    let registry = TypeRegistry::builder(InMemorySchemas::new()).build();

    let bytes = registry.serialize_to_vec(&300u32).unwrap();
    assert_eq!(bytes, [4, 0xac, 0x02]);
    assert_eq!(registry.from_bytes::<u32>(&bytes).unwrap(), 300);

    let bytes = registry.serialize_to_vec(&"trace".to_owned()).unwrap();
    assert_eq!(registry.from_bytes::<String>(&bytes).unwrap(), "trace");
}

#[test]
fn application_types_follow_registration_order() {
    let mut builder = TypeRegistry::builder(schemas());
    builder.record::<Sample>().unwrap().record::<Later>().unwrap();
    let registry = builder.build();

    assert_eq!(registry.tag_of::<Sample>(), Some(FIRST_APPLICATION_TAG));
    assert_eq!(registry.tag_of::<Later>(), Some(FIRST_APPLICATION_TAG + 1));
    assert_eq!(
        registry.codec_by_tag(FIRST_APPLICATION_TAG).unwrap().type_name(),
        "test.Sample"
    );
    assert!(registry.codec_by_tag(0).is_none());
    assert!(registry.codec_by_tag(FIRST_APPLICATION_TAG + 2).is_none());
}

#[test]
fn appending_types_keeps_old_records_readable() {
    let mut old = TypeRegistry::builder(schemas());
    old.record::<Sample>().unwrap();
    let old = old.build();

    let mut new = TypeRegistry::builder(schemas());
    new.record::<Sample>().unwrap().record::<Later>().unwrap();
    let new = new.build();

    let bytes = old.serialize_to_vec(&Sample { value: 8 }).unwrap();
    assert_eq!(new.from_bytes::<Sample>(&bytes).unwrap(), Sample { value: 8 });
    assert_eq!(old.tag_of::<Sample>(), new.tag_of::<Sample>());
}

#[test]
fn retired_slot_keeps_later_tags_stable() {
    let mut builder = TypeRegistry::builder(schemas());
    builder
        .record::<Sample>()
        .unwrap()
        .retired("test.Gone")
        .unwrap()
        .record::<Later>()
        .unwrap();
    let registry = builder.build();

    assert_eq!(registry.tag_of::<Later>(), Some(FIRST_APPLICATION_TAG + 2));

    let retired = u8::try_from(FIRST_APPLICATION_TAG + 1).unwrap();
    let fault = registry.from_bytes::<Sample>(&[retired]).unwrap_err();
    assert!(matches!(
        fault,
        SerializationFault::RetiredType { type_name }
            if type_name == "test.Gone"
    ));
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut builder = TypeRegistry::builder(schemas());
    builder.record::<Sample>().unwrap();

    assert!(matches!(
        builder.record::<Sample>(),
        Err(RegistryError::DuplicateType { .. })
    ));
    assert!(matches!(
        builder.record::<Impostor>(),
        Err(RegistryError::DuplicateName { .. })
    ));
    assert!(matches!(
        builder.retired("test.Sample"),
        Err(RegistryError::DuplicateName { .. })
    ));
}

#[test]
fn record_without_schema_is_rejected() {
    let mut builder = TypeRegistry::builder(InMemorySchemas::new());

    assert!(matches!(
        builder.record::<Sample>(),
        Err(RegistryError::SchemaMissing(_))
    ));
}

#[test]
fn strict_policy_rejects_unregistered_types() {
    let registry = TypeRegistry::builder(schemas()).build();

    let fault = registry.serialize_to_vec(&Sample { value: 1 }).unwrap_err();
    assert!(matches!(fault, SerializationFault::UnregisteredType { .. }));

    let mut builder = TypeRegistry::builder(schemas());
    let codec = builder.field_codec::<Sample>().unwrap();
    assert!(matches!(
        builder.by_name(codec),
        Err(RegistryError::ByNameDisabled { .. })
    ));
}

#[test]
fn by_name_policy_writes_the_type_name() {
    let mut builder = TypeRegistry::builder_with::<ByNameConfig>(schemas());
    let codec = builder.field_codec::<Sample>().unwrap();
    builder.by_name(codec).unwrap();
    let registry = builder.build();

    assert_eq!(registry.policy(), UnregisteredTypePolicy::ByName);
    assert_eq!(registry.tag_of::<Sample>(), None);

    let bytes = registry.serialize_to_vec(&Sample { value: 2 }).unwrap();
    let mut decoder = Decoder::new(&bytes);
    assert_eq!(decoder.read_u32().unwrap(), BY_NAME_TAG);
    assert_eq!(decoder.read_str().unwrap(), "test.Sample");

    let decoded = registry.from_bytes::<Sample>(&bytes).unwrap();
    assert_eq!(decoded, Sample { value: 2 });
}

#[test]
fn unknown_name_is_reported() {
    let registry = TypeRegistry::builder(schemas()).build();
    let mut encoder = Encoder::new();
    encoder.emit_u32(BY_NAME_TAG);
    encoder.emit_str("test.Nowhere");

    let fault =
        registry.from_bytes::<Sample>(encoder.as_bytes()).unwrap_err();

    assert!(matches!(
        fault,
        SerializationFault::UnknownTypeName { type_name }
            if type_name == "test.Nowhere"
    ));
}

#[test]
fn unknown_tag_is_reported() {
    let registry = TypeRegistry::builder(schemas()).build();

    let fault = registry.from_bytes::<Sample>(&[99]).unwrap_err();

    assert!(matches!(fault, SerializationFault::UnknownTag { tag: 99 }));
}

#[test]
fn wrong_expected_type_is_a_mismatch() {
    let registry = TypeRegistry::builder(schemas()).build();
    let bytes = registry.serialize_to_vec(&7u8).unwrap();

    let fault = registry.from_bytes::<u16>(&bytes).unwrap_err();

    assert!(matches!(fault, SerializationFault::TypeMismatch { .. }));
}

#[test]
fn records_can_be_streamed() {
    let mut builder = TypeRegistry::builder(schemas());
    builder.record::<Sample>().unwrap().record::<Later>().unwrap();
    let registry = builder.build();

    let mut sink = Vec::new();
    registry.serialize(&Sample { value: 1 }, &mut sink).unwrap();
    registry.serialize(&Later { label: "x".to_owned() }, &mut sink).unwrap();
    registry.serialize(&Sample { value: 2 }, &mut sink).unwrap();

    let mut decoder = Decoder::new(&sink);
    let first = registry.deserialize_as::<Sample>(&mut decoder).unwrap();
    let second = registry.deserialize(&mut decoder).unwrap();
    let third = registry.deserialize_as::<Sample>(&mut decoder).unwrap();

    assert_eq!(first.value, 1);
    assert_eq!(second.downcast_ref::<Later>().unwrap().label, "x");
    assert_eq!(third.value, 2);
    assert!(decoder.is_empty());
}

#[test]
fn sink_failures_are_reported() {
    struct Broken;

    impl io::Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    let registry = TypeRegistry::builder(schemas()).build();

    let fault = registry.serialize(&1u64, &mut Broken).unwrap_err();

    assert!(matches!(fault, SerializationFault::Io(_)));
}
