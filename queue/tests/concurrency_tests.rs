//! Concurrency properties shared by both queue variants

use queue::{BlockingQueue, LockFreeQueue, WorkQueue};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

/// Spawn `producers` threads pushing disjoint ranges, then drain with a
/// single consumer and return everything it saw.
fn produce_then_drain<Q>(queue: Arc<Q>, producers: usize, per_producer: usize) -> Vec<usize>
where
    Q: WorkQueue<usize> + 'static,
{
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..per_producer {
                    queue.push(p * per_producer + i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer panicked");
    }

    let mut drained = Vec::with_capacity(producers * per_producer);
    while let Some(value) = queue.pop() {
        drained.push(value);
    }
    drained
}

#[rstest]
#[case(1, 1000)]
#[case(4, 1000)]
#[case(8, 500)]
fn no_loss_no_dup_single_consumer_lock_free(#[case] producers: usize, #[case] per: usize) {
    let queue = Arc::new(LockFreeQueue::new());
    let mut drained = produce_then_drain(queue, producers, per);

    assert_eq!(drained.len(), producers * per);
    drained.sort_unstable();
    for (i, value) in drained.iter().enumerate() {
        assert_eq!(*value, i);
    }
}

#[rstest]
#[case(4, 1000)]
fn no_loss_no_dup_single_consumer_blocking(#[case] producers: usize, #[case] per: usize) {
    let queue = Arc::new(BlockingQueue::new());
    let mut drained = produce_then_drain(queue, producers, per);

    assert_eq!(drained.len(), producers * per);
    drained.sort_unstable();
    for (i, value) in drained.iter().enumerate() {
        assert_eq!(*value, i);
    }
}

#[rstest]
#[case(4, 2, 1000)]
#[case(2, 4, 1000)]
fn no_loss_no_dup_multi_consumer(
    #[case] producers: usize,
    #[case] consumers: usize,
    #[case] per: usize,
) {
    let queue = Arc::new(LockFreeQueue::new());
    let total_consumed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let producer_handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..per {
                    queue.push(i);
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let total_consumed = Arc::clone(&total_consumed);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) || !queue.is_empty() {
                    if queue.pop().is_some() {
                        total_consumed.fetch_add(1, Ordering::AcqRel);
                    } else {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for handle in producer_handles {
        handle.join().expect("producer panicked");
    }
    done.store(true, Ordering::Release);
    for handle in consumer_handles {
        handle.join().expect("consumer panicked");
    }

    assert_eq!(total_consumed.load(Ordering::Acquire), producers * per);
    assert!(queue.pop().is_none());
}

/// A single producer's values come out in the order they went in, even
/// while the consumer races the producer.
#[test]
fn fifo_per_producer_under_contention() {
    let queue = Arc::new(LockFreeQueue::new());
    const COUNT: usize = 10_000;

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..COUNT {
                queue.push(i);
            }
        })
    };

    let mut seen = 0;
    let mut last: Option<usize> = None;
    while seen < COUNT {
        if let Some(value) = queue.pop() {
            if let Some(previous) = last {
                assert!(value > previous, "{value} observed after {previous}");
            }
            last = Some(value);
            seen += 1;
        } else {
            thread::yield_now();
        }
    }

    producer.join().expect("producer panicked");
    assert!(queue.is_empty());
}

/// The trait seam behaves identically for both variants.
#[rstest]
#[case::lock_free(Arc::new(LockFreeQueue::new()) as Arc<dyn WorkQueue<usize>>)]
#[case::blocking(Arc::new(BlockingQueue::new()) as Arc<dyn WorkQueue<usize>>)]
fn work_queue_contract(#[case] queue: Arc<dyn WorkQueue<usize>>) {
    assert!(queue.is_empty());
    queue.push(1);
    queue.push(2);
    assert!(!queue.is_empty());
    assert_eq!(queue.pop(), Some(1));
    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), None);
}
