//! Sequence manager lifecycle against the mock SLM.

mod common;

use std::sync::Arc;
use std::thread;

use common::{mock_manager, phase_steps};
use rust_slm::error::{HardwareError, SlmError};
use rust_slm::hardware::SlmDevice;
use rust_slm::pattern::OpticalParameters;
use rust_slm::sequence::PlaybackState;

#[test]
fn build_preserves_input_order() {
    let (_mock, manager) = mock_manager();
    let params = phase_steps(5);
    let sequence = manager.build(&params).unwrap();

    assert_eq!(sequence.len(), 5);
    assert_eq!(manager.get_sequence(), params);
    assert_eq!(manager.state(), PlaybackState::Built);
}

#[test]
fn rebuild_replaces_sequence_and_stops_playback() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager.set_sequence(&phase_steps(3)).unwrap();
    manager.run().unwrap();
    assert!(mock.is_running());

    let second = phase_steps(5);
    manager.build(&second).unwrap();
    assert_eq!(manager.state(), PlaybackState::Built);
    assert!(!mock.is_running());
    assert_eq!(manager.sequence().len(), 5);
    assert_eq!(manager.get_sequence(), second);

    manager.load_to_device().unwrap();
    assert_eq!(mock.loaded_sequence_len(), 5);
}

#[test]
fn two_pixel_grating_reaches_device() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager
        .set_sequence(&[OpticalParameters::new(30.0, 0.0, 0.0, 1.0, 532.0)])
        .unwrap();

    let written = mock.written_images();
    let frame = written.last().unwrap();
    assert_eq!(frame.get(0, 0), Some(65535));
    assert_eq!(frame.get(1, 0), Some(0));
    assert_eq!(frame.get(2, 3), Some(65535));
}

#[test]
fn display_index_wraps_around() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager.set_sequence(&phase_steps(5)).unwrap();
    manager.run().unwrap();

    mock.set_next_index(0);
    assert_eq!(manager.current_display_index().unwrap(), 4);
    mock.set_next_index(3);
    assert_eq!(manager.current_display_index().unwrap(), 2);
    mock.set_next_index(5);
    assert_eq!(manager.get_sequence_index().unwrap(), 4);
    mock.set_next_index(6);
    assert_eq!(manager.get_sequence_index().unwrap(), 0);
}

#[test]
fn single_frame_out_of_range_touches_nothing() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager.set_sequence(&phase_steps(3)).unwrap();
    manager.run().unwrap();
    mock.clear_log();

    let err = manager.single_frame(3).unwrap_err();
    assert!(matches!(err, SlmError::IndexOutOfRange { index: 3, len: 3 }));
    assert!(mock.call_log().is_empty());
    assert_eq!(manager.state(), PlaybackState::Running);
}

#[test]
fn hardware_failure_during_load_keeps_built_state() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager.build(&phase_steps(3)).unwrap();

    mock.inject_next_failure();
    let err = manager.load_to_device().unwrap_err();
    assert!(matches!(
        err,
        SlmError::Hardware(HardwareError::LoadFailed(_))
    ));
    assert_eq!(manager.state(), PlaybackState::Built);

    manager.load_to_device().unwrap();
    assert_eq!(manager.state(), PlaybackState::Loaded);
}

#[test]
fn operations_after_shutdown_need_initialize() {
    let (mock, manager) = mock_manager();
    manager.initialize().unwrap();
    manager.set_sequence(&phase_steps(2)).unwrap();
    manager.run().unwrap();
    manager.shutdown().unwrap();

    assert!(!mock.is_initialized());
    assert_eq!(manager.state(), PlaybackState::Built);
    assert!(matches!(
        manager.load_to_device(),
        Err(SlmError::Hardware(HardwareError::NotInitialized))
    ));

    manager.initialize().unwrap();
    manager.load_to_device().unwrap();
    manager.run().unwrap();
    assert!(mock.is_running());
}

#[test]
fn concurrent_stop_is_safe() {
    let (mock, manager) = mock_manager();
    let manager = Arc::new(manager);
    manager.initialize().unwrap();
    manager.set_sequence(&phase_steps(4)).unwrap();
    manager.run().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.stop().unwrap();
                manager.get_temperature().unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 25.0);
    }

    assert_eq!(manager.state(), PlaybackState::Loaded);
    let stops = mock
        .call_log()
        .iter()
        .filter(|c| *c == "stop_sequence")
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn readers_see_whole_sequences_during_rebuilds() {
    let (_mock, manager) = mock_manager();
    let manager = Arc::new(manager);
    manager.build(&phase_steps(2)).unwrap();

    let reader = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for _ in 0..200 {
                let len = manager.sequence().len();
                assert!(len == 2 || len == 6, "saw length {len}");
            }
        })
    };
    for i in 0..20 {
        let n = if i % 2 == 0 { 6 } else { 2 };
        manager.build(&phase_steps(n)).unwrap();
    }
    reader.join().unwrap();
}
