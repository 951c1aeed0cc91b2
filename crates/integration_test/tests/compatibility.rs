//! Readers and writers built from different releases interoperate.

#![allow(missing_docs)]

use spanwire::{
    InMemorySchemas, Record, SerializationFault, TypeRegistry,
    model::{self, IndexEntry, MetricSample, TimerData},
};
use spanwire_integration_test::{
    PointA, PointV1, PointV2, point_registry, publish, registry,
};

#[test]
fn reader_that_knows_fewer_markers_skips_the_rest() {
    let writer = point_registry::<PointV1>(&["a", "b"]);
    let reader = point_registry::<PointA>(&["a"]);

    let bytes =
        writer.serialize_to_vec(&PointV1 { a: 5, b: "x".to_owned() }).unwrap();

    assert_eq!(reader.from_bytes::<PointA>(&bytes).unwrap(), PointA { a: 5 });
}

#[test]
fn reader_that_knows_more_markers_keeps_defaults() {
    let writer = point_registry::<PointV1>(&["a", "b"]);
    let reader = point_registry::<PointV2>(&["a", "b", "c", "d"]);

    let bytes =
        writer.serialize_to_vec(&PointV1 { a: 1, b: "y".to_owned() }).unwrap();

    assert_eq!(reader.from_bytes::<PointV2>(&bytes).unwrap(), PointV2 {
        a: 1,
        b: "y".to_owned(),
        c: None,
        d: Vec::new(),
    });
}

#[test]
fn newer_writer_older_reader() {
    let writer = point_registry::<PointV2>(&["a", "b", "c", "d"]);
    let reader = point_registry::<PointV1>(&["a", "b"]);
    let point = PointV2 {
        a: -9,
        b: "kept".to_owned(),
        c: Some(u64::MAX),
        d: vec!["x".repeat(200), "y".to_owned()],
    };

    let bytes = writer.serialize_to_vec(&point).unwrap();

    assert_eq!(reader.from_bytes::<PointV1>(&bytes).unwrap(), PointV1 {
        a: -9,
        b: "kept".to_owned(),
    });
}

#[test]
fn field_dropped_from_the_schema_is_not_written() {
    let full = point_registry::<PointV1>(&["a", "b"]);
    let without_b = point_registry::<PointV1>(&["a"]);
    let point = PointV1 { a: 3, b: "secret".to_owned() };

    let bytes = without_b.serialize_to_vec(&point).unwrap();

    let decoded = full.from_bytes::<PointV1>(&bytes).unwrap();
    assert_eq!(decoded, PointV1 { a: 3, b: String::new() });
    assert!(!bytes.windows(6).any(|window| window == b"secret"));
}

#[test]
fn many_records_of_one_type_share_a_header() {
    #[derive(Debug, Default, Record)]
    #[record(name = "it.Batch")]
    struct Batch {
        points: Vec<PointV1>,
    }

    let schemas = InMemorySchemas::new();
    publish(&schemas, "it.Point", &[("a", 1), ("b", 2)]);
    publish(&schemas, "it.Batch", &[("points", 1)]);
    let writer = registry(schemas, |builder| {
        builder.record::<PointV1>()?.record::<Batch>()?;
        Ok(())
    });

    let reader_schemas = InMemorySchemas::new();
    publish(&reader_schemas, "it.Point", &[("a", 1)]);
    publish(&reader_schemas, "it.Batch", &[("points", 1)]);

    #[derive(Debug, Default, Record)]
    #[record(name = "it.Batch")]
    struct NarrowBatch {
        points: Vec<PointA>,
    }

    let reader = registry(reader_schemas, |builder| {
        builder.record::<PointA>()?.record::<NarrowBatch>()?;
        Ok(())
    });

    let batch = Batch {
        points: (0..50)
            .map(|a| PointV1 { a, b: format!("p{a}") })
            .collect(),
    };
    let bytes = writer.serialize_to_vec(&batch).unwrap();
    let decoded = reader.from_bytes::<NarrowBatch>(&bytes).unwrap();

    assert_eq!(
        decoded.points,
        (0..50).map(|a| PointA { a }).collect::<Vec<_>>()
    );
}

#[test]
fn appended_tags_keep_old_data_readable() {
    // release N: the standard types only
    let old = model::standard_registry().unwrap();
    let timer = TimerData { count: 4, ..TimerData::default() };
    let entry = IndexEntry { method_ident: 12, ..IndexEntry::default() };
    let timer_bytes = old.serialize_to_vec(&timer).unwrap();
    let entry_bytes = old.serialize_to_vec(&entry).unwrap();

    // release N+k: appended types after the standard ones
    let schemas = model::standard_schemas();
    publish(&schemas, "it.Point", &[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
    let mut builder = TypeRegistry::builder(schemas);
    model::register_standard(&mut builder)
        .unwrap()
        .record::<PointV2>()
        .unwrap()
        .retired("it.Obsolete")
        .unwrap();
    let new = builder.build();

    assert_eq!(new.from_bytes::<TimerData>(&timer_bytes).unwrap(), timer);
    assert_eq!(new.from_bytes::<IndexEntry>(&entry_bytes).unwrap(), entry);
    assert_eq!(new.tag_of::<MetricSample>(), old.tag_of::<MetricSample>());
}

#[test]
fn older_reader_rejects_appended_tags() {
    let old = model::standard_registry().unwrap();

    let schemas = model::standard_schemas();
    publish(&schemas, "it.Point", &[("a", 1), ("b", 2)]);
    let mut builder = TypeRegistry::builder(schemas);
    model::register_standard(&mut builder)
        .unwrap()
        .record::<PointV1>()
        .unwrap();
    let new = builder.build();

    let bytes = new
        .serialize_to_vec(&PointV1 { a: 1, b: String::new() })
        .unwrap();
    let fault = old.from_bytes::<PointV1>(&bytes).unwrap_err();

    assert!(matches!(fault, SerializationFault::UnknownTag { .. }));
}
