#![allow(missing_docs)]

use std::time::{Duration, UNIX_EPOCH};

use spanwire::{
    Shared, TypeRegistry,
    model::{self, InvocationNode, MeasurementBase, TimerData},
};

/// The standard registry.
///
/// # Panics
///
/// Panics if the standard types cannot be registered.
#[must_use]
pub fn registry() -> TypeRegistry {
    model::standard_registry().expect("standard types register")
}

/// Builds a call tree with `breadth` children per node, `depth` levels deep.
///
/// Every node carries a timer, so the tree exercises nested records as well
/// as reference tracking.
#[must_use]
pub fn call_tree(depth: u32, breadth: u32) -> Shared<InvocationNode> {
    fn grow(node: &Shared<InvocationNode>, depth: u32, breadth: u32) {
        if depth == 0 {
            return;
        }
        for i in 0..breadth {
            let method = (u64::from(depth) << 16) | u64::from(i);
            let child = InvocationNode::new(method, Duration::from_micros(37));
            child.write().timer = Some(timer(method));
            grow(&child, depth - 1, breadth);
            InvocationNode::push_child(node, child);
        }
    }

    let root = InvocationNode::new(0, Duration::from_millis(4));
    grow(&root, depth, breadth);
    root
}

#[must_use]
pub fn timer(method_ident: u64) -> TimerData {
    let mut timer = TimerData {
        base: MeasurementBase {
            platform_ident: 1,
            sensor_type_ident: 7,
            method_ident,
            timestamp: Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        },
        ..TimerData::default()
    };
    timer.add(0.25);
    timer.add(1.5);
    timer
}
