//! On-hardware bring-up tests
//!
//! These exercise the real sysfs/UIO hardware paths and only make sense on a
//! board.

use std::collections::HashMap;

use kestrel_driver::{Board, ClockSource, InitState, TransportKind};

#[test]
#[ignore] // Requires hardware
fn test_bring_up_defaults() {
    let board = Board::discover(3, &HashMap::new()).expect("hardware access");
    assert_eq!(board.init_state(), InitState::Ready, "{:?}", board.init_error());

    let info = board.device_info().expect("device info");
    println!("Device: {} (FPGA {})", info.description, info.fpga_version);
    println!("  Variant: {}", info.fpga_variant);
    println!("  Links:   {:?}", info.link_types);
    println!("  Ref clk: {} MHz", board.ref_clock_freq().unwrap() / 1e6);
}

#[test]
#[ignore] // Requires hardware
fn test_clock_source_switching() {
    let mut board = Board::discover(3, &HashMap::new()).expect("hardware access");
    assert_eq!(board.init_state(), InitState::Ready);

    board.set_clock_source(ClockSource::Internal).expect("internal");
    assert!((board.ref_clock_freq().unwrap() - 25e6).abs() < f64::EPSILON);

    board.set_clock_source(ClockSource::Gpsdo).expect("gpsdo");
    assert!((board.ref_clock_freq().unwrap() - 20e6).abs() < f64::EPSILON);
}

#[test]
#[ignore] // Requires hardware
fn test_session_round_trip() {
    let mut board = Board::discover(3, &HashMap::new()).expect("hardware access");
    board.init(&HashMap::new()).expect("session init");

    let handle = board
        .request_xport(0x0200, 2, TransportKind::Ctrl)
        .expect("transport request");
    println!("Granted SID {}", handle.sid);

    board.deinit().expect("session deinit");
    board.tear_down();
}

#[test]
#[ignore] // Requires hardware and a running GPS daemon
fn test_gps_sensors() {
    let mut board = Board::discover(3, &HashMap::new()).expect("hardware access");
    match board.gps_tpv_sensor() {
        Ok(tpv) => println!("TPV: {}", tpv.value),
        Err(e) => println!("GPS unavailable: {e}"),
    }
    println!("GPS lock: {:?}", board.gps_lock_sensor().unwrap());
}
