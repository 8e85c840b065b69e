//! Select semantics over mixed channel sets, under contention.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;
use weft_dataflow::{DataflowQueue, DataflowVariable, Select};

// ============================================================================
// Pick correctness
// ============================================================================

#[test]
fn round_robin_pick_takes_the_only_ready_channel() {
    let q1: DataflowQueue<i32> = DataflowQueue::new();
    let q2 = DataflowQueue::new();
    let select = Select::new(vec![q1.as_channel(), q2.as_channel()]);

    q2.write(5);
    let result = select.select_from(0).unwrap();
    assert_eq!((result.index, *result.value), (1, 5));
}

#[test]
fn single_assignment_scenario_first_then_second_then_blocks() {
    let a = DataflowVariable::new();
    let b = DataflowVariable::new();
    let select = Select::new(vec![a.as_channel(), b.as_channel()]);

    a.bind(1).unwrap();
    b.bind(2).unwrap();

    let first = select.select_from(0).unwrap();
    assert_eq!((first.index, *first.value), (0, 1));
    let second = select.select_from(0).unwrap();
    assert_eq!((second.index, *second.value), (1, 2));

    // Both single-assignment channels are spent; the third pick finds
    // nothing and its bounded wait expires.
    assert!(select
        .try_select(Duration::from_millis(50))
        .unwrap()
        .is_none());
}

#[test]
fn guarded_pick_never_takes_an_excluded_channel() {
    let q1 = DataflowQueue::new();
    let q2 = DataflowQueue::new();
    let q3 = DataflowQueue::new();
    let select = Select::new(vec![q1.as_channel(), q2.as_channel(), q3.as_channel()]);

    q1.write(1);
    q3.write(3);

    // q1 is ready but excluded; the pick lands on q3.
    let result = select.select_masked_from(0, &[false, true, true]).unwrap();
    assert_eq!((result.index, *result.value), (2, 3));

    // The excluded channel still holds its value for ordinary readers.
    assert_eq!(*q1.read().unwrap(), 1);
}

// ============================================================================
// Exclusivity under contention
// ============================================================================

#[test]
fn concurrent_picks_split_the_stream_without_duplication() {
    let q = DataflowQueue::new();
    let select = Select::new(vec![q.as_channel()]);
    let picks_per_thread = 50;

    let mut pickers = Vec::new();
    for _ in 0..2 {
        let select = select.clone();
        pickers.push(thread::spawn(move || {
            (0..picks_per_thread)
                .map(|_| *select.select().unwrap().value)
                .collect::<Vec<i32>>()
        }));
    }

    for i in 0..(picks_per_thread * 2) {
        q.write(i);
    }

    let mut seen = BTreeSet::new();
    for t in pickers {
        for value in t.join().unwrap() {
            assert!(seen.insert(value), "value {value} picked twice");
        }
    }
    assert_eq!(seen.len(), (picks_per_thread * 2) as usize);
}

#[test]
fn picks_and_ordinary_readers_share_a_queue_safely() {
    let q = DataflowQueue::new();
    let spare: DataflowQueue<i32> = DataflowQueue::new();
    let select = Select::new(vec![q.as_channel(), spare.as_channel()]);

    let selector = {
        let select = select.clone();
        thread::spawn(move || {
            (0..25)
                .map(|_| *select.select().unwrap().value)
                .collect::<Vec<i32>>()
        })
    };
    let reader = {
        let q = q.clone();
        thread::spawn(move || (0..25).map(|_| *q.read().unwrap()).collect::<Vec<i32>>())
    };

    for i in 0..50 {
        q.write(i);
        if i % 10 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let mut seen = BTreeSet::new();
    for got in [selector.join().unwrap(), reader.join().unwrap()] {
        for value in got {
            assert!(seen.insert(value), "value {value} consumed twice");
        }
    }
    assert_eq!(seen.len(), 50);
}

// ============================================================================
// Asynchronous picks
// ============================================================================

#[test]
fn promise_pick_composes_with_then() {
    let q = DataflowQueue::new();
    let spare: DataflowQueue<i32> = DataflowQueue::new();
    let select = Select::new(vec![q.as_channel(), spare.as_channel()]);

    let doubled = select
        .select_to_promise(Some(0), None)
        .then(|result| *result.value * 2);

    q.write(21);
    assert_eq!(*doubled.read().unwrap(), 42);
}

#[test]
fn dropped_select_leaves_channels_usable() {
    let q = DataflowQueue::new();
    {
        let select = Select::new(vec![q.as_channel()]);
        q.write(1);
        assert_eq!(*select.select().unwrap().value, 1);
    }
    // The select is gone; its notification callbacks are inert and the
    // queue keeps working for ordinary readers.
    q.write(2);
    assert_eq!(*q.read().unwrap(), 2);
}
