//! Independent jobs never share adapter instances.

mod support;

use std::sync::Arc;
use std::thread;

use sluice_engine::{resolve, Extractable, Loadable};

#[test]
fn test_concurrent_resolves_return_distinct_instances() {
    let registry = Arc::new(support::registry());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || resolve(&registry, "memory://1", "jsonl:///tmp").unwrap())
        })
        .collect();
    let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let sources: Vec<*const u8> = resolved
        .iter()
        .map(|r| std::ptr::from_ref::<dyn Extractable>(r.source.as_ref()).cast::<u8>())
        .collect();
    let destinations: Vec<*const u8> = resolved
        .iter()
        .map(|r| std::ptr::from_ref::<dyn Loadable>(r.destination.as_ref()).cast::<u8>())
        .collect();

    for i in 0..sources.len() {
        for j in (i + 1)..sources.len() {
            assert_ne!(sources[i], sources[j]);
            assert_ne!(destinations[i], destinations[j]);
        }
    }
}
