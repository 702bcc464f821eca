//! Producer/consumer handoff through deferred views.

use ballast_buffer::NativeList;
use ballast_core::{AllocatorLabel, BufferError};
use crossbeam_channel::bounded;

#[test]
fn consumer_reads_batches_through_deferred_view() {
    ballast_test_utils::init_tracing();
    let mut list = NativeList::<u64>::with_capacity(4, AllocatorLabel::Persistent).unwrap();
    let deferred = list.as_deferred_view().unwrap();

    let (ready_tx, ready_rx) = bounded::<usize>(0);
    let (ack_tx, ack_rx) = bounded::<u64>(0);

    let consumer = std::thread::spawn(move || {
        let mut sums = Vec::new();
        for expected_len in ready_rx {
            let (len, sum) = deferred
                .read(|items| (items.len(), items.iter().sum::<u64>()))
                .unwrap();
            assert_eq!(len, expected_len);
            sums.push(sum);
            ack_tx.send(sum).unwrap();
        }
        assert_eq!(deferred.resolve().unwrap_err(), BufferError::UseAfterFree);
        sums
    });

    for batch in 0..5u64 {
        let values: Vec<u64> = (0..10).map(|i| batch * 100 + i).collect();
        list.add_range(&values).unwrap();
        ready_tx.send(list.len()).unwrap();
        ack_rx.recv().unwrap();
    }
    list.dispose().unwrap();
    drop(ready_tx);

    let sums = consumer.join().unwrap();
    assert_eq!(sums.len(), 5);
    assert!(sums.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn snapshot_sent_to_worker_goes_stale_after_mutation() {
    let mut list = NativeList::<u32>::with_capacity(8, AllocatorLabel::Persistent).unwrap();
    list.add_range(&[1, 2, 3]).unwrap();
    let view = list.as_flat_view().unwrap();

    let (read_tx, read_rx) = bounded(0);
    let (go_tx, go_rx) = bounded::<()>(0);
    let worker = std::thread::spawn(move || {
        read_tx.send(view.to_vec()).unwrap();
        go_rx.recv().unwrap();
        view.to_vec()
    });

    let first = read_rx.recv().unwrap();
    list.add(4).unwrap();
    go_tx.send(()).unwrap();
    let second = worker.join().unwrap();

    assert_eq!(first.unwrap(), vec![1, 2, 3]);
    assert!(matches!(second, Err(BufferError::StaleView { .. })));
    list.dispose().unwrap();
}

#[test]
fn owner_writes_while_another_thread_polls_a_stale_view() {
    let mut list = NativeList::<u64>::with_capacity(4, AllocatorLabel::Persistent).unwrap();
    list.add(1).unwrap();
    let view = list.as_flat_view().unwrap();
    list.add(2).unwrap();

    let stop = std::sync::atomic::AtomicBool::new(false);
    let polls = std::thread::scope(|s| {
        let poller = s.spawn(|| {
            let mut polls = 0u64;
            loop {
                assert!(matches!(view.to_vec(), Err(BufferError::StaleView { .. })));
                polls += 1;
                if stop.load(std::sync::atomic::Ordering::Relaxed) {
                    return polls;
                }
            }
        });
        for i in 0..200_000u64 {
            list.set(0, i).unwrap();
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        poller.join().unwrap()
    });
    assert!(polls > 0);
    assert_eq!(list.get(0).unwrap(), 199_999);
    list.dispose().unwrap();
}
