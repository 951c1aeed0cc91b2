use std::{any::TypeId, sync::Arc, thread};

use super::ContextPool;
use crate::shared::Shared;

#[test]
fn returned_bundles_are_reused_fresh() {
    let pool = ContextPool::new(2, 64);
    let pinned = Shared::new(5u32);

    {
        let mut bundle = pool.acquire();
        let (encoder, context) = bundle.parts();
        encoder.emit_str("partial record");
        context.begin_header(TypeId::of::<u32>());
        context.register_written(pinned.identity(), pinned.erase()).unwrap();
        assert_eq!(pinned.strong_count(), 2);
    }

    assert_eq!(pool.idle(), 1);
    assert_eq!(pinned.strong_count(), 1);

    let bundle = pool.acquire();
    assert_eq!(pool.idle(), 0);
    assert!(bundle.encoder.as_bytes().is_empty());
    assert!(bundle.context.is_fresh());
}

#[test]
fn acquire_does_not_block_when_empty() {
    let pool = ContextPool::new(1, 0);

    let first = pool.acquire();
    let second = pool.acquire();
    let third = pool.acquire();
    drop((first, second, third));

    // only one bundle is kept
    assert_eq!(pool.idle(), 1);
    assert_eq!(pool.capacity(), 1);
}

#[test]
fn zero_sized_pool_still_works() {
    let pool = ContextPool::new(0, 0);
    drop(pool.acquire());

    assert_eq!(pool.capacity(), 1);
}

#[test]
fn concurrent_borrowers_get_distinct_bundles() {
    let pool = Arc::new(ContextPool::new(4, 16));

    let handles = (0..8u8)
        .map(|n| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..100 {
                    let mut bundle = pool.acquire();
                    let (encoder, context) = bundle.parts();
                    assert!(encoder.as_bytes().is_empty());
                    assert!(context.is_fresh());

                    encoder.emit_u8(n);
                    context.begin_header(TypeId::of::<u8>());
                    assert_eq!(encoder.as_bytes(), &[n]);
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.idle() <= 4);
}
