//! Values come back equal to what was written.

#![allow(missing_docs)]

use std::{
    collections::HashMap,
    time::{Duration, UNIX_EPOCH},
};

use spanwire::{
    AnyValue, Shared,
    model::{
        IndexEntry, InvocationNode, MeasurementBase, MetricSample, TimerData,
    },
};
use spanwire_integration_test::{
    PointV1, call_tree, methods, point_registry, standard,
};

fn timer() -> TimerData {
    let mut timer = TimerData {
        base: MeasurementBase {
            platform_ident: 1,
            sensor_type_ident: 2,
            method_ident: 3,
            timestamp: Some(UNIX_EPOCH + Duration::new(1_650_000_000, 5)),
        },
        ..TimerData::default()
    };
    timer.add(0.5);
    timer.add(12.25);
    timer
}

#[test]
fn timer_data() {
    let registry = standard();
    let timer = timer();

    let bytes = registry.serialize_to_vec(&timer).unwrap();

    assert_eq!(registry.from_bytes::<TimerData>(&bytes).unwrap(), timer);
}

#[test]
fn index_entry() {
    let registry = standard();
    let entry = IndexEntry {
        platform_ident: 10,
        sensor_type_ident: 20,
        method_ident: 30,
        record_type: "apm.TimerData".to_owned(),
        from: Some(UNIX_EPOCH),
        to: None,
    };

    let bytes = registry.serialize_to_vec(&entry).unwrap();

    assert_eq!(registry.from_bytes::<IndexEntry>(&bytes).unwrap(), entry);
}

#[test]
fn call_tree_keeps_shape_and_order() {
    let registry = standard();
    let tree = call_tree(4, 3);

    let bytes = registry.serialize_to_vec(&tree).unwrap();
    let decoded: Shared<InvocationNode> = registry.from_bytes(&bytes).unwrap();

    assert_eq!(methods(&decoded), methods(&tree));
    assert_eq!(decoded.read().nested_count(), 3 + 9 + 27 + 81);

    let first = decoded.read().children[0].clone();
    let timer = first.read().timer.clone().unwrap();
    assert_eq!(timer.count, 1);
}

#[test]
fn metric_values_of_every_registered_kind() {
    let registry = standard();
    let values = [
        AnyValue::new(true),
        AnyValue::new(-5i64),
        AnyValue::new(3.5f32),
        AnyValue::new("up".to_owned()),
        AnyValue::new(Duration::from_millis(250)),
        AnyValue::new(timer()),
    ];

    for value in values {
        let sample = MetricSample {
            name: "queue.depth".to_owned(),
            value: Some(value.clone()),
            tags: HashMap::from([("zone".to_owned(), "eu".to_owned())]),
            timestamp: None,
        };

        let bytes = registry.serialize_to_vec(&sample).unwrap();
        let decoded: MetricSample = registry.from_bytes(&bytes).unwrap();

        let decoded_value = decoded.value.unwrap();
        assert_eq!(decoded_value.value_type(), value.value_type());
        assert_eq!(decoded.tags, sample.tags);
    }

    let sample = MetricSample {
        value: Some(AnyValue::new(timer())),
        ..MetricSample::default()
    };
    let bytes = registry.serialize_to_vec(&sample).unwrap();
    let decoded: MetricSample = registry.from_bytes(&bytes).unwrap();
    assert_eq!(
        decoded.value.unwrap().downcast_ref::<TimerData>(),
        Some(&timer())
    );
}

#[test]
fn strings_longer_than_one_length_byte() {
    let registry = point_registry::<PointV1>(&["a", "b"]);

    for len in [127, 128, 300, 20_000] {
        let point = PointV1 { a: -1, b: "s".repeat(len) };

        let bytes = registry.serialize_to_vec(&point).unwrap();

        assert_eq!(registry.from_bytes::<PointV1>(&bytes).unwrap(), point);
    }
}

#[test]
fn multibyte_characters_count_as_bytes() {
    let registry = point_registry::<PointV1>(&["a", "b"]);
    // 64 characters, 128 bytes
    let point = PointV1 { a: 7, b: "ü".repeat(64) };

    let bytes = registry.serialize_to_vec(&point).unwrap();

    assert_eq!(registry.from_bytes::<PointV1>(&bytes).unwrap(), point);
}
