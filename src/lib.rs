//! A platform-agnostic driver for two-wire strain-gauge weighing sensors,
//! built on [`embedded-hal`] 1.0 traits.
//!
//! The sensor speaks a bit-banged serial protocol over a clock line and a
//! data line: the data line goes low when a conversion is ready, 24 data
//! bits are clocked out MSB-first, and trailing clock pulses select the
//! gain/channel of the *next* conversion. On top of the raw acquisition the
//! driver runs an adaptive exponential filter (fast tracking for large
//! steps, heavy damping for noise, dead-banded output) and a tare/scale
//! transform to calibrated units.
//!
//! Everything is synchronous and single-context: [`LoadCell::read_raw`]
//! busy-waits for readiness with no timeout, which matches the dedicated
//! control loops this class of hardware lives in. Callers that need a
//! bounded wait can poll [`SensorChannel::try_read_raw`] themselves and
//! treat [`nb::Error::WouldBlock`] however they like.
//!
//! ```
//! use weighcell::{LoadCell, SensorChannel};
//! # use embedded_hal_mock::eh1::delay::NoopDelay;
//! # use embedded_hal_mock::eh1::digital::{Mock, State, Transaction};
//! # let mut sck = Vec::new();
//! # for _ in 0..24 {
//! #     sck.push(Transaction::set(State::High));
//! #     sck.push(Transaction::set(State::Low));
//! # }
//! # let mut dout = vec![Transaction::get(State::Low)];
//! # for i in (0..24).rev() {
//! #     dout.push(Transaction::get(if 1 & (1u32 << i) != 0 { State::High } else { State::Low }));
//! # }
//! let mut channel = SensorChannel::new(Mock::new(&sck), Mock::new(&dout), NoopDelay::new());
//!
//! // Raw counts come back as a monotonic offset code centered at 0x80_0000.
//! let raw = channel.read_raw().unwrap();
//! assert_eq!(raw, 0x80_0001);
//! # let (mut sck, mut dout) = channel.release();
//! # sck.done();
//! # dout.done();
//! ```
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/1.0

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod filter;

pub use channel::{InputSelect, PowerMode, SensorChannel, RAW_MAX, RAW_MIN};
pub use filter::{AdaptiveFilter, FilterParams};

/// The measurement surface a weighing application programs against.
///
/// Display, serial and control-loop collaborators only need this trait;
/// protocol-level operations (input select, power mode, filter tuning) stay
/// on the concrete [`SensorChannel`].
pub trait LoadCell {
    type Error;

    /// Block until the sensor is ready, then return one sign-corrected
    /// 24-bit raw count.
    fn read_raw(&mut self) -> Result<i32, Self::Error>;

    /// Block for one raw count and run it through the adaptive filter,
    /// returning the stabilized value.
    fn read_filtered(&mut self) -> Result<i32, Self::Error>;

    /// Zero the displayed weight at the current load by capturing a fresh
    /// filtered reading as the offset.
    fn tare(&mut self) -> Result<(), Self::Error>;

    /// Raw-count baseline subtracted before scaling.
    fn offset(&self) -> i32;

    fn set_offset(&mut self, offset: i32);

    /// Raw counts per physical unit. Must be nonzero before any unit
    /// conversion; typically derived from a two-point calibration and
    /// persisted by the caller.
    fn scale(&self) -> i32;

    fn set_scale(&mut self, scale: i32);

    /// One raw reading converted to calibrated units.
    fn read_raw_units(&mut self) -> Result<i16, Self::Error>;

    /// One filtered reading converted to calibrated units.
    fn read_filtered_units(&mut self) -> Result<i16, Self::Error>;
}
