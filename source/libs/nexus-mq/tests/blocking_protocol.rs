//! CONTEXT: Integration tests for the blocking send/receive protocol
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 8 integration tests
//!
//! TEST_SCOPE:
//!   - Receivers block on empty queues and on queues holding only other types
//!   - Senders block on full arenas and resume after a receive frees space
//!   - Destroying a queue wakes blocked senders and receivers with QueueRemoved
//!   - Per-type FIFO under concurrent producers and consumers
//!
//! TEST_SCENARIOS:
//!   - end_to_end_hello_world(): two sends, two receives, third receive blocks
//!   - receive_blocks_until_exact_type_arrives(): non-empty queue, wrong type
//!   - full_arena_blocks_sender_until_space_frees(): blocked send completes, survivor intact
//!   - woken_sender_reblocks_while_space_is_short(): partial free is not enough
//!   - destroy_wakes_blocked_receiver(): QueueRemoved after last detach
//!   - destroy_wakes_blocked_sender(): QueueRemoved after owner exit
//!   - concurrent_producers_keep_per_type_order(): stress with a small arena
//!   - wake_all_lets_every_matching_receiver_recheck(): two receivers, one message each
//!
//! DEPENDENCIES:
//!   - nexus_mq::MessageQueues with CondvarBlocker/HeapPages host backends
//!   - std::thread: one thread per simulated process

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nexus_mq::{MessageQueues, MqConfig, MqError, Pid, SlotMask};

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn host(slots: usize, page_size: usize) -> Arc<MessageQueues> {
    let config = MqConfig { slots, page_size, ..MqConfig::default() };
    Arc::new(MessageQueues::host(&config).expect("valid config"))
}

#[test]
fn end_to_end_hello_world() {
    let mq = host(4, 4096);
    let id = mq.get(Pid(1), 0x51).unwrap();
    assert_eq!(mq.stats(id).unwrap().capacity, 4096);

    mq.send(Pid(1), id, 1, b"hello").unwrap();
    mq.send(Pid(1), id, 1, b"world").unwrap();
    assert_eq!(mq.receive(Pid(2), id, 1, 5).unwrap(), b"hello");
    assert_eq!(mq.receive(Pid(2), id, 1, 5).unwrap(), b"world");

    let reader = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.receive(Pid(2), id, 1, 4))
    };
    wait_until("receiver to block", || mq.blocked_receivers() == 1);
    assert!(!reader.is_finished());

    mq.send(Pid(1), id, 1, b"late").unwrap();
    assert_eq!(reader.join().unwrap().unwrap(), b"late");
    assert_eq!(mq.blocked_receivers(), 0);
}

#[test]
fn receive_blocks_until_exact_type_arrives() {
    let mq = host(1, 4096);
    let id = mq.get(Pid(1), 7).unwrap();
    mq.send(Pid(1), id, 2, b"not-for-you").unwrap();

    let reader = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.receive(Pid(2), id, 1, 3))
    };
    wait_until("receiver to block", || mq.blocked_receivers() == 1);
    assert_eq!(mq.stats(id).unwrap().records, 1);

    // a send of another type wakes the receiver, which re-checks and sleeps again
    mq.send(Pid(1), id, 3, b"also-not").unwrap();
    wait_until("receiver to re-block", || mq.blocked_receivers() == 1);
    assert!(!reader.is_finished());

    mq.send(Pid(1), id, 1, b"yes").unwrap();
    assert_eq!(reader.join().unwrap().unwrap(), b"yes");
    assert_eq!(mq.stats(id).unwrap().records, 2);
}

#[test]
fn full_arena_blocks_sender_until_space_frees() {
    // 96-byte arena: sentinel (16) + 40 + 20 leaves 20 bytes, too few for 24
    let mq = host(1, 96);
    let id = mq.get(Pid(1), 1).unwrap();
    mq.send(Pid(1), id, 1, &[0xAA; 24]).unwrap();
    mq.send(Pid(1), id, 3, b"keep").unwrap();

    let writer = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.send(Pid(2), id, 2, b"queued!!"))
    };
    wait_until("sender to block", || mq.blocked_senders() == 1);
    assert_eq!(mq.stats(id).unwrap().used, 76);

    // removing the first record slides the survivor down before the append
    assert_eq!(mq.receive(Pid(3), id, 1, 24).unwrap(), vec![0xAA; 24]);
    writer.join().unwrap().unwrap();

    let stats = mq.stats(id).unwrap();
    assert_eq!(stats.records, 2);
    assert_eq!(stats.used, 16 + 20 + 24);
    assert_eq!(mq.receive(Pid(3), id, 3, 4).unwrap(), b"keep");
    assert_eq!(mq.receive(Pid(3), id, 2, 8).unwrap(), b"queued!!");
    assert_eq!(mq.stats(id).unwrap().records, 0);
}

#[test]
fn woken_sender_reblocks_while_space_is_short() {
    // 96-byte arena: 16 + 20 + 56 used, the 56-byte record cannot fit
    let mq = host(1, 96);
    let id = mq.get(Pid(1), 1).unwrap();
    mq.send(Pid(1), id, 1, b"tiny").unwrap();
    mq.send(Pid(1), id, 2, &[0x11; 40]).unwrap();

    let writer = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.send(Pid(2), id, 3, &[0x5A; 40]))
    };
    wait_until("sender to block", || mq.blocked_senders() == 1);

    // freeing 20 bytes wakes the sender, which finds 72 + 56 > 96 and sleeps again
    assert_eq!(mq.receive(Pid(3), id, 1, 4).unwrap(), b"tiny");
    wait_until("sender to re-block", || mq.blocked_senders() == 1);
    assert!(!writer.is_finished());
    assert_eq!(mq.stats(id).unwrap().records, 1);

    assert_eq!(mq.receive(Pid(3), id, 2, 40).unwrap(), vec![0x11; 40]);
    writer.join().unwrap().unwrap();
    assert_eq!(mq.receive(Pid(3), id, 3, 40).unwrap(), vec![0x5A; 40]);
}

#[test]
fn destroy_wakes_blocked_receiver() {
    let mq = host(2, 4096);
    let id = mq.get(Pid(1), 99).unwrap();

    let reader = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.receive(Pid(2), id, 1, 1))
    };
    wait_until("receiver to block", || mq.blocked_receivers() == 1);

    mq.detach(Pid(1), SlotMask::ALL);
    assert_eq!(reader.join().unwrap(), Err(MqError::QueueRemoved));
    assert_eq!(mq.resolve(99), None);

    // the slot is reusable and the stale waiter left no trace
    assert_eq!(mq.get(Pid(3), 100).unwrap(), id);
    assert_eq!(mq.blocked_receivers(), 0);
}

#[test]
fn destroy_wakes_blocked_sender() {
    let mq = host(2, 64);
    let id = mq.get(Pid(1), 98).unwrap();
    mq.send(Pid(1), id, 1, &[0xAA; 32]).unwrap();

    let writer = {
        let mq = Arc::clone(&mq);
        thread::spawn(move || mq.send(Pid(2), id, 1, b"never"))
    };
    wait_until("sender to block", || mq.blocked_senders() == 1);

    mq.exit(Pid(1));
    assert_eq!(writer.join().unwrap(), Err(MqError::QueueRemoved));
    assert_eq!(mq.resolve(98), None);
    assert_eq!(mq.blocked_senders(), 0);
    assert_eq!(mq.active_queues(), 0);
}

#[test]
fn concurrent_producers_keep_per_type_order() {
    const PRODUCERS: i32 = 4;
    const MESSAGES: u32 = 200;

    let mq = host(1, 256);
    let id = mq.get(Pid(100), 1).unwrap();

    let consumers: Vec<_> = (0..PRODUCERS)
        .map(|ty| {
            let mq = Arc::clone(&mq);
            thread::spawn(move || {
                let pid = Pid(200 + ty as u32);
                for expected in 0..MESSAGES {
                    let bytes = mq.receive(pid, id, ty, 4).unwrap();
                    let seq = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    assert_eq!(seq, expected, "type {ty} out of order");
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|ty| {
            let mq = Arc::clone(&mq);
            thread::spawn(move || {
                let pid = Pid(300 + ty as u32);
                for seq in 0..MESSAGES {
                    mq.send(pid, id, ty, &seq.to_le_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in producers.into_iter().chain(consumers) {
        handle.join().unwrap();
    }
    let stats = mq.stats(id).unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.used, 16);
}

#[test]
fn wake_all_lets_every_matching_receiver_recheck() {
    let mq = host(1, 4096);
    let id = mq.get(Pid(1), 5).unwrap();

    let readers: Vec<_> = [Pid(2), Pid(3)]
        .into_iter()
        .map(|pid| {
            let mq = Arc::clone(&mq);
            thread::spawn(move || mq.receive(pid, id, 8, 1))
        })
        .collect();
    wait_until("both receivers to block", || mq.blocked_receivers() == 2);

    mq.send(Pid(1), id, 8, b"a").unwrap();
    mq.send(Pid(1), id, 8, b"b").unwrap();

    let mut got: Vec<Vec<u8>> = readers.into_iter().map(|r| r.join().unwrap().unwrap()).collect();
    got.sort();
    assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec()]);
}
