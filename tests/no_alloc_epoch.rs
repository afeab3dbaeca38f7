use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use strassen_search::{RunConfig, Search, UpdateRule};

struct CountingAlloc {
    allocs: AtomicUsize,
    reallocs: AtomicUsize,
}

impl CountingAlloc {
    const fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
        }
    }

    fn reset(&self) {
        self.allocs.store(0, Ordering::Relaxed);
        self.reallocs.store(0, Ordering::Relaxed);
    }

    fn alloc_events(&self) -> usize {
        self.allocs.load(Ordering::Relaxed) + self.reallocs.load(Ordering::Relaxed)
    }
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::new();

fn search(training_size: usize, update_rule: UpdateRule) -> Search {
    Search::new(RunConfig {
        epochs: 1,
        training_size,
        test_size: training_size / 4,
        learning_rate: 1e-4,
        update_rule,
        ..RunConfig::default()
    })
    .unwrap()
}

#[test]
fn epochs_do_not_allocate_per_sample() {
    if cfg!(feature = "matrixmultiply") {
        // The `matrixmultiply` backend may allocate internal scratch buffers.
        return;
    }

    // Tests share the allocator, so both rules are measured in one test.
    for rule in [UpdateRule::MOMENTUM, UpdateRule::ADAM] {
        let mut small = search(16, rule);
        let mut large = search(16 * 64, rule);

        ALLOC.reset();
        small.run_epoch();
        let alloc_small = ALLOC.alloc_events();

        ALLOC.reset();
        large.run_epoch();
        let alloc_large = ALLOC.alloc_events();

        assert_eq!(
            alloc_small,
            alloc_large,
            "{}: expected allocation count to be independent of batch size",
            rule.name()
        );
    }
}
