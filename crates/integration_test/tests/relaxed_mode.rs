//! Types without a coordinated tag, written by name.

#![allow(missing_docs)]

use spanwire::{
    ByNameConfig, Decoder, RegistryError, SerializationFault, TypeRegistry,
    model::{self, TimerData},
    registry::BY_NAME_TAG,
};
use spanwire_integration_test::{PointA, PointV1, publish};

fn relaxed<P: spanwire::Record>(fields: &[(&str, u32)]) -> TypeRegistry {
    let schemas = model::standard_schemas();
    publish(&schemas, "it.Point", fields);

    let mut builder = TypeRegistry::builder_with::<ByNameConfig>(schemas);
    model::register_standard(&mut builder).unwrap();
    let codec = builder.field_codec::<P>().unwrap();
    builder.by_name(codec).unwrap();
    builder.build()
}

#[test]
fn by_name_types_carry_their_name() {
    let registry = relaxed::<PointV1>(&[("a", 1), ("b", 2)]);
    let point = PointV1 { a: 4, b: "n".to_owned() };

    let bytes = registry.serialize_to_vec(&point).unwrap();

    let mut decoder = Decoder::new(&bytes);
    assert_eq!(decoder.read_u32().unwrap(), BY_NAME_TAG);
    assert_eq!(decoder.read_str().unwrap(), "it.Point");
    assert_eq!(registry.from_bytes::<PointV1>(&bytes).unwrap(), point);
}

#[test]
fn tagged_types_keep_their_tags() {
    let relaxed = relaxed::<PointV1>(&[("a", 1), ("b", 2)]);
    let strict = model::standard_registry().unwrap();
    let timer = TimerData { count: 9, ..TimerData::default() };

    let bytes = relaxed.serialize_to_vec(&timer).unwrap();

    assert_eq!(bytes, strict.serialize_to_vec(&timer).unwrap());
    assert_eq!(strict.from_bytes::<TimerData>(&bytes).unwrap(), timer);
}

#[test]
fn readers_resolve_the_name_independently_of_registration_order() {
    let writer = relaxed::<PointV1>(&[("a", 1), ("b", 2)]);

    // the reader knows a narrower version of the same named type
    let schemas = model::standard_schemas();
    publish(&schemas, "it.Point", &[("a", 1)]);
    let mut builder = TypeRegistry::builder_with::<ByNameConfig>(schemas);
    let codec = builder.field_codec::<PointA>().unwrap();
    builder.by_name(codec).unwrap();
    model::register_standard(&mut builder).unwrap();
    let reader = builder.build();

    let bytes = writer
        .serialize_to_vec(&PointV1 { a: 11, b: "dropped".to_owned() })
        .unwrap();

    assert_eq!(reader.from_bytes::<PointA>(&bytes).unwrap(), PointA { a: 11 });
}

#[test]
fn strict_readers_do_not_know_the_name() {
    let writer = relaxed::<PointV1>(&[("a", 1), ("b", 2)]);
    let strict = model::standard_registry().unwrap();

    let bytes =
        writer.serialize_to_vec(&PointV1 { a: 1, b: String::new() }).unwrap();
    let fault = strict.from_bytes::<PointV1>(&bytes).unwrap_err();

    assert!(matches!(
        fault,
        SerializationFault::UnknownTypeName { type_name }
            if type_name == "it.Point"
    ));
}

#[test]
fn by_name_needs_the_relaxed_policy() {
    let schemas = model::standard_schemas();
    publish(&schemas, "it.Point", &[("a", 1), ("b", 2)]);
    let mut builder = TypeRegistry::builder(schemas);
    let codec = builder.field_codec::<PointV1>().unwrap();

    assert!(matches!(
        builder.by_name(codec),
        Err(RegistryError::ByNameDisabled { .. })
    ));
}
