//! End-to-end tests of the raw claim/publish and wait/consume protocols.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ringbus::{
    BlockingWaitStrategy, BusySpinWaitStrategy, MultiProducerSequencer, ProducerMode, RingBuffer,
    Sequence, Sequencer, SingleProducerSequencer, YieldingWaitStrategy,
};

/// Single producer, single consumer, busy spin, N=16, messages 0..=999.
#[test]
fn spsc_busy_spin_delivers_in_order() {
    let sequencer = Arc::new(
        SingleProducerSequencer::new(16, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
    );
    let ring = Arc::new(RingBuffer::<i64>::new(16).unwrap());

    let consumer_sequence = Arc::new(Sequence::new_with_initial_value());
    sequencer.set_gating_sequences(vec![Arc::clone(&consumer_sequence)]);
    let barrier = sequencer.new_barrier(Vec::new());

    let consumer = {
        let ring = Arc::clone(&ring);
        let own = Arc::clone(&consumer_sequence);
        thread::spawn(move || {
            let mut observed = Vec::with_capacity(1000);
            while observed.len() < 1000 {
                let next = own.get() + 1;
                let available = barrier.wait_for(next).unwrap();
                for sequence in next..=available {
                    observed.push(*ring.get(sequence));
                }
                own.set(available);
            }
            observed
        })
    };

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for value in 0i64..1000 {
                let sequence = sequencer.claim();
                unsafe {
                    *ring.get_mut_unchecked(sequence) = value;
                }
                sequencer.publish(sequence);
            }
        })
    };

    producer.join().unwrap();
    let observed = consumer.join().unwrap();

    let expected: Vec<i64> = (0..1000).collect();
    assert_eq!(observed, expected);
    assert_eq!(sequencer.cursor().get(), 999);
    assert_eq!(consumer_sequence.get(), 999);
}

/// Single producer, two independent consumers accumulating sum and sum of
/// squares over 2^20 messages. Any discrepancy means a lost or duplicated
/// message.
#[test]
fn two_consumers_accumulate_deterministically() {
    const ROUNDS: i64 = 1 << 20;

    let sequencer = Arc::new(
        SingleProducerSequencer::new(1024, Arc::new(YieldingWaitStrategy::new())).unwrap(),
    );
    let ring = Arc::new(RingBuffer::<i64>::new(1024).unwrap());

    let consumer_sequences: Vec<Arc<Sequence>> = (0..2)
        .map(|_| Arc::new(Sequence::new_with_initial_value()))
        .collect();
    sequencer.set_gating_sequences(consumer_sequences.clone());

    let mut consumers = Vec::new();
    for (power, own) in (1u32..=2).zip(consumer_sequences) {
        let barrier = sequencer.new_barrier(Vec::new());
        let ring = Arc::clone(&ring);
        consumers.push(thread::spawn(move || {
            let mut accumulated = 0i64;
            let mut count = 0i64;
            while count < ROUNDS {
                let next = own.get() + 1;
                let available = barrier.wait_for(next).unwrap();
                for sequence in next..=available {
                    let value = *ring.get(sequence);
                    accumulated += value.pow(power);
                    count += 1;
                }
                own.set(available);
            }
            accumulated
        }));
    }

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for value in 0..ROUNDS {
                let sequence = sequencer.claim();
                unsafe {
                    *ring.get_mut_unchecked(sequence) = value;
                }
                sequencer.publish(sequence);
            }
        })
    };

    producer.join().unwrap();
    let sum = consumers.remove(0).join().unwrap();
    let sum_of_squares = consumers.remove(0).join().unwrap();

    assert_eq!(sum, (ROUNDS - 1) * ROUNDS / 2);
    assert_eq!(sum, 549_755_289_600);
    assert_eq!(sum_of_squares, (ROUNDS - 1) * ROUNDS * (2 * ROUNDS - 1) / 6);
}

/// Four producers, one consumer, N=1024. Each producer publishes 100,000
/// messages carrying its id; the consumer must see exactly 100,000 of each.
#[test]
fn multi_producer_counts_per_producer() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: i64 = 100_000;

    let sequencer = Arc::new(
        MultiProducerSequencer::new(1024, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
    );
    let ring = Arc::new(RingBuffer::<i64>::new(1024).unwrap());

    let consumer_sequence = Arc::new(Sequence::new_with_initial_value());
    sequencer.set_gating_sequences(vec![Arc::clone(&consumer_sequence)]);
    let barrier = sequencer.new_barrier(Vec::new());

    let consumer = {
        let ring = Arc::clone(&ring);
        let own = Arc::clone(&consumer_sequence);
        thread::spawn(move || {
            let total = PER_PRODUCER * PRODUCERS as i64;
            let mut counts = [0i64; PRODUCERS];
            let mut seen = 0i64;
            while seen < total {
                let next = own.get() + 1;
                let available = barrier.wait_for(next).unwrap();
                if available < next {
                    continue;
                }
                for sequence in next..=available {
                    counts[*ring.get(sequence) as usize] += 1;
                    seen += 1;
                }
                own.set(available);
            }
            counts
        })
    };

    let mut producers = Vec::new();
    for id in 0..PRODUCERS {
        let sequencer = Arc::clone(&sequencer);
        let ring = Arc::clone(&ring);
        producers.push(thread::spawn(move || {
            for _ in 0..PER_PRODUCER {
                let sequence = sequencer.claim();
                unsafe {
                    *ring.get_mut_unchecked(sequence) = id as i64;
                }
                sequencer.publish(sequence);
            }
        }));
    }

    for producer in producers {
        producer.join().unwrap();
    }
    let counts = consumer.join().unwrap();
    assert_eq!(counts, [PER_PRODUCER; PRODUCERS]);
}

/// Blocking wait strategy with a stalling producer: the consumer should pick
/// each message up within the publish delay plus scheduling jitter, without
/// spinning.
#[test]
fn blocking_consumer_tracks_a_slow_producer() {
    const MESSAGES: i64 = 10;
    const STALL: Duration = Duration::from_millis(20);

    let sequencer = Arc::new(
        SingleProducerSequencer::new(16, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let ring = Arc::new(RingBuffer::<i64>::new(16).unwrap());

    let consumer_sequence = Arc::new(Sequence::new_with_initial_value());
    sequencer.set_gating_sequences(vec![Arc::clone(&consumer_sequence)]);
    let barrier = sequencer.new_barrier(Vec::new());

    let consumer = {
        let own = Arc::clone(&consumer_sequence);
        thread::spawn(move || {
            let mut latencies = Vec::new();
            while own.get() < MESSAGES - 1 {
                let next = own.get() + 1;
                let waited = Instant::now();
                let available = barrier.wait_for(next).unwrap();
                latencies.push(waited.elapsed());
                own.set(available);
            }
            latencies
        })
    };

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for value in 0..MESSAGES {
                thread::sleep(STALL);
                let sequence = sequencer.claim();
                unsafe {
                    *ring.get_mut_unchecked(sequence) = value;
                }
                sequencer.publish(sequence);
            }
        })
    };

    producer.join().unwrap();
    let latencies = consumer.join().unwrap();

    assert_eq!(consumer_sequence.get(), MESSAGES - 1);
    for latency in latencies {
        assert!(
            latency < STALL + Duration::from_millis(100),
            "latency {latency:?} exceeds stall plus jitter"
        );
    }
}

/// A producer lagging exactly N behind blocks until the consumer advances,
/// then resumes without loss.
#[test]
fn full_ring_applies_backpressure() {
    let sequencer = Arc::new(
        SingleProducerSequencer::new(8, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
    );
    let ring = Arc::new(RingBuffer::<i64>::new(8).unwrap());

    let consumer_sequence = Arc::new(Sequence::new_with_initial_value());
    sequencer.set_gating_sequences(vec![Arc::clone(&consumer_sequence)]);

    // Fill the ring; lag is exactly N.
    for value in 0..8 {
        let sequence = sequencer.claim();
        unsafe {
            *ring.get_mut_unchecked(sequence) = value;
        }
        sequencer.publish(sequence);
    }
    assert_eq!(sequencer.remaining_capacity(), 0);
    assert!(sequencer.try_claim().is_err());

    let producer = {
        let sequencer = Arc::clone(&sequencer);
        thread::spawn(move || {
            let sequence = sequencer.claim();
            sequencer.publish(sequence);
            sequence
        })
    };

    // The producer must stay blocked while the lag is N.
    thread::sleep(Duration::from_millis(20));
    assert!(!producer.is_finished());

    consumer_sequence.set(3);
    assert_eq!(producer.join().unwrap(), 8);
}

/// Mode selection through `ProducerMode` mirrors direct construction.
#[test]
fn producer_mode_selects_the_sequencer() {
    let single = ProducerMode::Single
        .create_sequencer(64, Arc::new(BusySpinWaitStrategy::new()))
        .unwrap();
    let multi = ProducerMode::Multi
        .create_sequencer(64, Arc::new(BusySpinWaitStrategy::new()))
        .unwrap();

    let sequence = single.claim();
    single.publish(sequence);
    assert!(single.is_available(sequence));

    let sequence = multi.claim();
    assert!(!multi.is_available(sequence));
    multi.publish(sequence);
    assert!(multi.is_available(sequence));

    assert!(ProducerMode::Single
        .create_sequencer(100, Arc::new(BusySpinWaitStrategy::new()))
        .is_err());
}
