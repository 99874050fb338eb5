use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use resona_rt::callback::TAG_INT;
use resona_rt::{SharedBuffers, StateField};

#[test]
fn fresh_region_matches_pre_start_invariants() {
    let shared = SharedBuffers::new(512, 128);
    for field in [
        StateField::AvailInBufs,
        StateField::AvailOutBufs,
        StateField::InputReadIndex,
        StateField::OutputWriteIndex,
        StateField::IsPerforming,
        StateField::Stop,
        StateField::AvailRtmidiEvents,
    ] {
        assert_eq!(shared.state.load(field), 0, "{field:?} not zero");
    }
    assert_eq!(shared.state.load(StateField::HwBufferSize), 512);
    assert_eq!(shared.state.load(StateField::SwBufferSize), 128);
    assert!(shared.callbacks.is_empty());
}

#[test]
fn callback_records_cross_threads_in_order() {
    let shared = SharedBuffers::with_defaults();
    let producer = Arc::clone(&shared);
    let writer = std::thread::spawn(move || {
        for uid in 0..200 {
            loop {
                let words = [uid, 7, 1, TAG_INT, uid * 2, 0];
                match producer.callbacks.enqueue_record(&words) {
                    Ok(()) => break,
                    Err(_) => std::thread::yield_now(),
                }
            }
        }
    });

    let mut seen = Vec::new();
    let mut scratch = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while seen.len() < 200 {
        assert!(std::time::Instant::now() < deadline, "consumer starved");
        match shared.callbacks.pop_record(&mut scratch) {
            Ok(true) => {
                assert_eq!(scratch[1], 7);
                assert_eq!(scratch[4], scratch[0] * 2);
                seen.push(scratch[0]);
            }
            Ok(false) => std::thread::yield_now(),
            Err(err) => panic!("corrupt record: {err}"),
        }
    }
    writer.join().unwrap();
    let expected: Vec<i32> = (0..200).collect();
    assert_eq!(seen, expected);
}

#[test]
fn doorbell_roundtrip_between_threads() {
    let shared = SharedBuffers::with_defaults();
    let worker = {
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            shared.state.wait_while(StateField::AtomicNotify, 0);
            shared.state.store(StateField::AvailOutBufs, 128);
            shared.state.store(StateField::AtomicNotify, 0);
        })
    };
    std::thread::sleep(Duration::from_millis(10));
    shared.state.store_and_notify(StateField::AtomicNotify, 1);
    worker.join().unwrap();
    assert_eq!(shared.state.load(StateField::AvailOutBufs), 128);
    assert_eq!(shared.state.load(StateField::AtomicNotify), 0);
}
