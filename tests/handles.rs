//! Integration tests for the handle types.
//!
//! Object lifetimes are tracked with a per-test probe counter (tests run
//! in parallel, so a single process-wide counter would cross-talk). Every
//! test asserts the counter returns to zero once the handles are gone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use grip::{Shared, SharedArray, Unique, UniqueArray, Weak};
use parking_lot::Mutex;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Payload that reports construction and destruction to a shared counter.
struct Probe {
    value: i32,
    live: Arc<AtomicUsize>,
}

impl Probe {
    fn new(value: i32, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            value,
            live: Arc::clone(live),
        }
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn live_counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[test]
fn shared_single_combined_construction() {
    init_tracing();
    let live = live_counter();
    {
        let handle = Shared::new(Probe::new(100, &live));
        assert_eq!(handle.use_count(), 1);
        assert!(handle.is_unique());
        assert_eq!(handle.value, 100);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn shared_array_combined_construction_and_mutation() {
    let live = live_counter();
    {
        let mut handle = SharedArray::from_fn(5, |i| Probe::new(i as i32, &live));
        assert_eq!(handle.len(), 5);
        assert_eq!(live.load(Ordering::SeqCst), 5);

        handle.get_mut().unwrap()[2].value = 42;
        assert_eq!(handle[2].value, 42);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn weak_expires_when_last_strong_drops() {
    let live = live_counter();
    let mut shared = Shared::new(Probe::new(7, &live));
    let weak = shared.downgrade();
    assert_eq!(weak.use_count(), 1);
    assert!(!weak.expired());

    shared.reset();
    assert!(weak.expired());
    assert!(weak.upgrade().is_none());
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn swap_exchanges_without_destruction() {
    let live = live_counter();
    let mut a = Shared::new(Probe::new(1, &live));
    let mut b = Shared::new(Probe::new(2, &live));
    let (a_ptr, b_ptr) = (a.get(), b.get());

    a.swap(&mut b);
    assert_eq!(a.get(), b_ptr);
    assert_eq!(b.get(), a_ptr);
    assert_eq!(a.value, 2);
    assert_eq!(b.value, 1);
    assert_eq!(a.use_count(), 1);
    assert_eq!(b.use_count(), 1);
    // Nothing was destroyed by the exchange.
    assert_eq!(live.load(Ordering::SeqCst), 2);
}

#[test]
fn unique_array_release_and_manual_destroy() {
    let live = live_counter();
    let mut handle =
        UniqueArray::from_vec(vec![Probe::new(1, &live), Probe::new(2, &live)]);
    assert_eq!(live.load(Ordering::SeqCst), 2);

    let (ptr, len) = handle.release();
    assert!(handle.is_null());
    assert_eq!(live.load(Ordering::SeqCst), 2);

    // Manual destruction reclaims exactly those two elements, once.
    drop(unsafe { UniqueArray::from_raw_parts(ptr, len) });
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn unique_release_reset_round_trip() {
    let live = live_counter();
    let mut handle = Unique::new(Probe::new(9, &live));
    let addr = handle.get();

    let raw = handle.release();
    unsafe { handle.reset_raw(raw) };

    assert_eq!(handle.get(), addr);
    assert_eq!(handle.value, 9);
    assert_eq!(live.load(Ordering::SeqCst), 1);
    drop(handle);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn reset_on_null_handles_is_noop() {
    let mut unique: Unique<u32> = Unique::default();
    unique.reset();
    assert!(unique.is_null());

    let mut shared: Shared<u32> = Shared::default();
    shared.reset();
    assert!(shared.is_null());
    assert_eq!(shared.use_count(), 0);

    let mut weak: Weak<u32> = Weak::default();
    weak.reset();
    assert!(weak.expired());
}

#[test]
fn self_assignment_preserves_state() {
    let live = live_counter();
    let mut handle = Shared::new(Probe::new(40, &live));
    let alias = handle.clone();
    assert_eq!(handle.use_count(), 2);

    handle.clone_from(&alias);
    assert_eq!(handle.use_count(), 2);
    assert_eq!(handle.value, 40);
    assert!(handle.ptr_eq(&alias));
    assert_eq!(live.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_takes_over_unique() {
    let live = live_counter();
    let unique = Unique::new(Probe::new(200, &live));
    let shared = Shared::from_unique(unique);
    assert_eq!(shared.use_count(), 1);
    assert_eq!(shared.value, 200);
    assert_eq!(live.load(Ordering::SeqCst), 1);
    drop(shared);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn separate_path_supports_weak_observers() {
    let live = live_counter();
    let shared = Shared::from_box(Box::new(Probe::new(3, &live)));
    let weak = shared.downgrade();

    let upgraded = weak.upgrade().unwrap();
    assert_eq!(upgraded.value, 3);
    assert_eq!(shared.use_count(), 2);

    drop(upgraded);
    drop(shared);
    assert!(weak.expired());
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn shared_array_from_vec_separate_path() {
    let live = live_counter();
    {
        let values = vec![Probe::new(10, &live), Probe::new(11, &live)];
        let handle = SharedArray::from_vec(values);
        assert_eq!(handle.len(), 2);
        assert_eq!(handle[1].value, 11);

        let weak = handle.downgrade();
        assert_eq!(weak.upgrade().unwrap().len(), 2);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn clones_are_usable_across_threads() {
    init_tracing();
    let live = live_counter();
    let shared = Shared::new(Probe::new(77, &live));

    thread::scope(|scope| {
        for _ in 0..8 {
            let local = shared.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    let inner = local.clone();
                    assert_eq!(inner.value, 77);
                }
            });
        }
    });

    assert_eq!(shared.use_count(), 1);
    assert_eq!(live.load(Ordering::SeqCst), 1);
    drop(shared);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_upgrades_race_against_final_drop() {
    let live = live_counter();
    for _ in 0..50 {
        let shared = Shared::new(Probe::new(1, &live));
        let weak = shared.downgrade();

        thread::scope(|scope| {
            let upgrader = scope.spawn(move || {
                let mut hits = 0usize;
                while let Some(strong) = weak.upgrade() {
                    assert_eq!(strong.value, 1);
                    hits += 1;
                    if hits > 1000 {
                        break;
                    }
                }
            });
            scope.spawn(move || drop(shared));
            upgrader.join().unwrap();
        });
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

/// Probe that additionally records its drop order.
struct OrderProbe {
    index: usize,
    log: Arc<Mutex<Vec<usize>>>,
    live: Arc<AtomicUsize>,
}

impl OrderProbe {
    fn new(index: usize, log: &Arc<Mutex<Vec<usize>>>, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            index,
            log: Arc::clone(log),
            live: Arc::clone(live),
        }
    }
}

impl Drop for OrderProbe {
    fn drop(&mut self) {
        self.log.lock().push(self.index);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn partial_array_construction_unwinds_in_reverse() {
    let live = live_counter();
    let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        SharedArray::from_fn(5, |i| {
            if i == 3 {
                panic!("constructor failure");
            }
            OrderProbe::new(i, &log, &live)
        })
    }));

    assert!(result.is_err());
    // The three constructed elements were destroyed, newest first.
    assert_eq!(*log.lock(), vec![2, 1, 0]);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn weak_observers_survive_array_destruction() {
    let live = live_counter();
    let shared = SharedArray::from_fn(3, |i| Probe::new(i as i32, &live));
    let weak_a = shared.downgrade();
    let weak_b = weak_a.clone();

    drop(shared);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(weak_a.expired());
    assert!(weak_b.expired());
    assert!(weak_a.upgrade().is_none());
    assert!(weak_b.upgrade().is_none());
}
