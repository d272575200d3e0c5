//! End-to-end transactions between a controller and responders on the
//! simulated bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use embedded_comm::protocol::crc::{crc8, crc8_append};
use embedded_comm::transport::bus::SimulatedBus;
use embedded_comm::{Controller, EmbeddedCommError, Responder, SharedResponder, Status};
use proptest::prelude::*;

const ADDRESS: u8 = 0x17;
const MEMORY_SIZE: usize = 64;
const BACKUP_SIZE: usize = 16;

fn setup(responder: Responder) -> (Controller<SimulatedBus>, SharedResponder) {
    let responder = SharedResponder::new(responder);
    let bus = SimulatedBus::new();
    bus.attach(ADDRESS, responder.clone()).unwrap();
    (Controller::new(bus), responder)
}

fn with_backups() -> (Controller<SimulatedBus>, SharedResponder) {
    setup(Responder::new(vec![0u8; MEMORY_SIZE]).with_backups(vec![0u8; BACKUP_SIZE]))
}

fn without_backups() -> (Controller<SimulatedBus>, SharedResponder) {
    setup(Responder::new(vec![0u8; MEMORY_SIZE]))
}

#[test]
fn test_write_then_read() {
    let (mut controller, responder) = with_backups();

    assert_eq!(controller.write(&ADDRESS, 5, &[9, 9, 9, 9]).unwrap(), Status::OK);
    assert_eq!(&responder.lock().memory()[5..9], &[9, 9, 9, 9]);

    let mut buffer = [0u8; 4];
    assert_eq!(controller.read(&ADDRESS, 5, &mut buffer).unwrap(), Status::OK);
    assert_eq!(buffer, [9, 9, 9, 9]);
}

#[test]
fn test_out_of_range_write_leaves_memory_untouched() {
    let (mut controller, responder) = with_backups();

    let status = controller.write(&ADDRESS, 62, &[1, 2, 3, 4]).unwrap();

    assert_eq!(status, Status::MEMORY_OUT_OF_RANGE);
    assert!(responder.lock().memory().iter().all(|&b| b == 0));
    assert_eq!(responder.status(), Status::OK);
}

#[test]
fn test_write_larger_than_backup_is_rejected() {
    let (mut controller, responder) = with_backups();

    let status = controller.write(&ADDRESS, 2, &[0xAA; BACKUP_SIZE + 1]).unwrap();

    assert!(status.contains(Status::BACKUP_BUFFER_OVERFLOW));
    assert!(responder.lock().memory().iter().all(|&b| b == 0));
}

#[test]
fn test_corrupted_write_is_rolled_back() {
    let (mut controller, responder) = with_backups();
    responder.with(|r| r.memory_mut()[5..9].copy_from_slice(&[1, 2, 3, 4]));

    assert_eq!(controller.write_corrupted(&ADDRESS, 5, &[9, 9, 9, 9]).unwrap(), Status::BUSY);
    assert_eq!(controller.read_status(&ADDRESS).unwrap(), Status::BUSY);

    // Writes while busy are not applied
    assert_eq!(controller.write(&ADDRESS, 20, &[7]).unwrap(), Status::BUSY);
    assert_eq!(responder.lock().memory()[20], 0);

    assert!(responder.poll());
    assert_eq!(controller.read_status(&ADDRESS).unwrap(), Status::OK);

    let mut buffer = [0u8; 4];
    assert_eq!(controller.read(&ADDRESS, 5, &mut buffer).unwrap(), Status::OK);
    assert_eq!(buffer, [1, 2, 3, 4]);
}

#[test]
fn test_corrupted_write_without_backups_keeps_data() {
    let (mut controller, responder) = without_backups();

    let status = controller.write_corrupted(&ADDRESS, 5, &[9, 9]).unwrap();

    assert_eq!(status, Status::DATA_CORRUPTED);
    assert_eq!(&responder.lock().memory()[5..7], &[9, 9]);
    assert_eq!(controller.read_status(&ADDRESS).unwrap(), Status::OK);
}

#[test]
fn test_read_past_end_of_memory() {
    let (mut controller, _responder) = with_backups();

    let mut buffer = [0xFFu8; 8];
    let status = controller.read(&ADDRESS, 60, &mut buffer).unwrap();

    assert!(status.contains(Status::MEMORY_OUT_OF_RANGE));
    assert_eq!(buffer, [0u8; 8]);
}

#[test]
fn test_wait_ready_after_restore() {
    let (mut controller, responder) = with_backups();
    controller.write_corrupted(&ADDRESS, 5, &[1]).unwrap();

    let poller = responder.clone();
    let handle = std::thread::spawn(move || {
        while !poller.poll() {
            std::thread::yield_now();
        }
    });

    handle.join().unwrap();
    assert_eq!(controller.wait_ready(&ADDRESS).unwrap(), Status::OK);
}

#[test]
fn test_memory_change_callback() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut responder = Responder::new(vec![0u8; MEMORY_SIZE]).with_backups(vec![0u8; BACKUP_SIZE]);
    responder
        .on_memory_change(40..41, move |memory: &mut [u8]| {
            memory[41] = memory[41].wrapping_add(1);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let (mut controller, responder) = setup(responder);

    // Neither an unrelated nor a corrupted write triggers the callback
    controller.write(&ADDRESS, 10, &[1]).unwrap();
    controller.write_corrupted(&ADDRESS, 40, &[1]).unwrap();
    responder.poll();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(controller.write(&ADDRESS, 39, &[5, 6]).unwrap(), Status::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(responder.poll());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let mut buffer = [0u8; 3];
    controller.read(&ADDRESS, 39, &mut buffer).unwrap();
    assert_eq!(buffer, [5, 6, 1]);
}

#[test]
fn test_register_mirroring() {
    let mut responder = Responder::new(vec![0u8; MEMORY_SIZE]);
    responder.set_register_mirroring(true);
    let (mut controller, responder) = setup(responder);

    controller.write(&ADDRESS, 62, &[1, 2]).unwrap();
    assert_eq!(responder.lock().memory()[0], Status::MEMORY_OUT_OF_RANGE.bits());

    controller.write(&ADDRESS, 10, &[1]).unwrap();
    assert_eq!(responder.lock().memory()[0], Status::OK.bits());
}

#[test]
fn test_unknown_peer_is_a_transport_error() {
    let (mut controller, _responder) = with_backups();

    let result = controller.write(&0x42, 0, &[1]);

    assert!(matches!(result, Err(EmbeddedCommError::Transport(_))));
    assert_eq!(Status::or_indeterminate(result), Status::INDETERMINATE);
}

#[test]
fn test_crc_reference_values() {
    assert_eq!(crc8(&[0x01]), 0x07);
    assert_eq!(crc8(&[0x80]), 0x89);
    assert_eq!(crc8(&[0xFF]), 0xF3);
    assert_eq!(crc8(b"123456789"), 0xF4);
}

proptest! {
    #[test]
    fn prop_crc_append_matches_whole_buffer(
        head in proptest::collection::vec(any::<u8>(), 0..64),
        tail in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let whole: Vec<u8> = head.iter().chain(tail.iter()).copied().collect();
        prop_assert_eq!(crc8_append(crc8(&head), &tail), crc8(&whole));
    }

    #[test]
    fn prop_write_read_round_trip(
        data in proptest::collection::vec(any::<u8>(), 1..=32),
        offset in 2u32..200,
    ) {
        let (mut controller, _responder) =
            setup(Responder::new(vec![0u8; 256]).with_backups(vec![0u8; 32]));
        let address = offset.min(255 - data.len() as u32);

        prop_assert_eq!(controller.write(&ADDRESS, address, &data).unwrap(), Status::OK);

        let mut buffer = vec![0u8; data.len()];
        prop_assert_eq!(controller.read(&ADDRESS, address, &mut buffer).unwrap(), Status::OK);
        prop_assert_eq!(buffer, data);
    }
}
