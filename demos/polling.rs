//! Polling acquisition walkthrough.
//!
//! Runs the full pipeline (tare, scale, filtered unit reads) against mock
//! pins that replay a scripted set of conversions, so it works without
//! hardware: `cargo run --example polling`.
//!
//! On a real board, replace the mocks with the HAL's clock-out pin, data
//! pin and delay provider; the driver code is identical.

use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::digital::{Mock, State, Transaction};
use weighcell::{LoadCell, SensorChannel};

/// Clock expectations for one conversion at gain A128 (no trailing pulse).
fn sck_conversion(out: &mut Vec<Transaction>) {
    for _ in 0..24 {
        out.push(Transaction::set(State::High));
        out.push(Transaction::set(State::Low));
    }
}

/// Data-line expectations for one conversion that decodes to `code`:
/// the ready poll, then the 24 wire bits (offset code with bit 23 flipped
/// back), MSB first.
fn dout_conversion(out: &mut Vec<Transaction>, code: u32) {
    let wire = code ^ 0x80_0000;
    out.push(Transaction::get(State::Low));
    for i in (0..24).rev() {
        out.push(Transaction::get(if wire & (1 << i) != 0 {
            State::High
        } else {
            State::Low
        }));
    }
}

fn main() {
    // An empty platform, then an object of about ten units placed on it.
    let codes = [8_000, 8_000, 8_050, 17_800, 18_100, 18_100, 18_100];

    let mut sck_script = Vec::new();
    let mut dout_script = Vec::new();
    for code in codes {
        sck_conversion(&mut sck_script);
        dout_conversion(&mut dout_script, code);
    }

    let sck = Mock::new(&sck_script);
    let dout = Mock::new(&dout_script);

    let mut load_sensor = SensorChannel::new(sck, dout, NoopDelay::new());

    // Zero the readings at the current load.
    load_sensor.tare().unwrap();
    println!("tared at offset {}", load_sensor.offset());

    // Scale as persisted from an earlier two-point calibration.
    load_sensor.set_scale(10);

    for _ in 1..codes.len() {
        let weight = load_sensor.read_filtered_units().unwrap();
        println!("weight = {weight}");
    }

    let (mut sck, mut dout) = load_sensor.release();
    sck.done();
    dout.done();
}
