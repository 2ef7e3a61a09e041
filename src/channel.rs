//! The sensor channel: two-wire link, raw acquisition and calibration.
//!
//! One [`SensorChannel`] exclusively owns one clock-out line and one data
//! line. The data line doubles as the readiness signal: the sensor pulls it
//! low when a conversion is complete, and the 24 data bits are then clocked
//! out MSB-first. Trailing clock pulses after the data select the gain and
//! channel for the *next* conversion, so an input-select change always takes
//! effect one conversion late. That latency is a property of the wire
//! protocol and is preserved here.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::filter::{AdaptiveFilter, FilterParams};
use crate::LoadCell;

/// Minimum settle time after every line transition.
const SETTLE_US: u32 = 1;

/// Power-down needs the clock held high for at least 60 us.
const POWER_DOWN_HOLD_US: u32 = 65;

/// The sensor reports 24-bit two's complement biased at the midpoint;
/// flipping this bit turns it into a monotonic offset code.
const SIGN_BIT: u32 = 0x0080_0000;

/// Smallest raw offset code a conversion can produce.
pub const RAW_MIN: i32 = 0;
/// Largest raw offset code a conversion can produce.
pub const RAW_MAX: i32 = 0x00FF_FFFF;

/// Amplifier gain and input channel for the next conversion.
///
/// The selection is communicated as trailing clock pulses after the 24 data
/// bits: none for channel A at gain 128, one for the other two modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputSelect {
    /// Channel A, gain 128.
    #[default]
    GainA128,
    /// Channel B, gain 32.
    GainB32,
    /// Channel A, gain 64.
    GainA64,
}

impl InputSelect {
    fn extra_pulses(self) -> u8 {
        match self {
            InputSelect::GainA128 => 0,
            InputSelect::GainB32 | InputSelect::GainA64 => 1,
        }
    }
}

/// Sensor power state, controlled through the clock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    #[default]
    Normal,
    /// Entered by holding the clock high; any clock activity wakes the part.
    PowerDown,
}

/// Driver for one load cell interface.
///
/// `Sck` is the always-output clock line, `Dt` the data line (input during
/// readiness polling and bit shifting). Both lines must share an error type;
/// every fallible operation propagates it unchanged.
///
/// The channel is single-context by construction: nothing else may touch the
/// two lines, and all filter and calibration state is mutated from the same
/// call path that issues reads.
pub struct SensorChannel<Sck, Dt, Delay> {
    sck: Sck,
    dout: Dt,
    delay: Delay,
    input_select: InputSelect,
    power: PowerMode,
    offset: i32,
    scale: i32,
    filter: AdaptiveFilter,
}

impl<Sck, Dt, Delay, E> SensorChannel<Sck, Dt, Delay>
where
    Sck: OutputPin<Error = E>,
    Dt: InputPin<Error = E>,
    Delay: DelayNs,
{
    /// Create a channel bound to its two lines.
    ///
    /// Defaults: channel A gain 128, offset 0, scale 1, default filter
    /// tuning. No line is driven yet; call [`init`](Self::init) once the
    /// sensor is powered.
    pub fn new(sck: Sck, dout: Dt, delay: Delay) -> Self {
        Self {
            sck,
            dout,
            delay,
            input_select: InputSelect::default(),
            power: PowerMode::Normal,
            offset: 0,
            scale: 1,
            filter: AdaptiveFilter::new(FilterParams::default()),
        }
    }

    /// Drive the clock idle-low and flush the stored input select into the
    /// sensor with one discarded conversion. Blocks until the sensor is
    /// ready once.
    pub fn init(&mut self) -> Result<(), E> {
        self.sck_low()?;
        self.set_input_select(self.input_select)
    }

    /// Give the lines back, consuming the channel.
    pub fn release(self) -> (Sck, Dt) {
        (self.sck, self.dout)
    }

    fn sck_high(&mut self) -> Result<(), E> {
        self.sck.set_high()?;
        self.delay.delay_us(SETTLE_US);
        Ok(())
    }

    fn sck_low(&mut self) -> Result<(), E> {
        self.sck.set_low()?;
        self.delay.delay_us(SETTLE_US);
        Ok(())
    }

    fn pulse_sck(&mut self) -> Result<(), E> {
        self.sck_high()?;
        self.sck_low()
    }

    /// One clock pulse, then sample the data line after the falling edge.
    fn read_bit(&mut self) -> Result<bool, E> {
        self.pulse_sck()?;
        self.dout.is_high()
    }

    /// True when the sensor holds the data line low, signalling that a
    /// conversion is complete. No side effects on the wire.
    pub fn is_ready(&mut self) -> Result<bool, E> {
        self.dout.is_low()
    }

    /// One acquisition attempt.
    ///
    /// Returns [`nb::Error::WouldBlock`] while the sensor is still
    /// converting. Once ready, shifts in the 24 data bits, emits the
    /// trailing gain-select pulses for the current [`InputSelect`], and
    /// returns the sign-corrected offset code in `[RAW_MIN, RAW_MAX]`.
    ///
    /// This is the suspension point: wrap it in [`nb::block!`] for the
    /// stock unbounded busy-wait, or in a bounded retry loop for a variant
    /// that can give up.
    pub fn try_read_raw(&mut self) -> nb::Result<i32, E> {
        if !self.is_ready()? {
            return Err(nb::Error::WouldBlock);
        }

        let mut raw: u32 = 0;
        for _ in 0..24 {
            raw = (raw << 1) | u32::from(self.read_bit()?);
        }

        // Gain select for the next conversion, always issued.
        for _ in 0..self.input_select.extra_pulses() {
            self.pulse_sck()?;
        }

        // Clocking the part wakes it from power-down.
        self.power = PowerMode::Normal;

        Ok(((raw ^ SIGN_BIT) & 0x00FF_FFFF) as i32)
    }

    /// Truncating mean of `samples` consecutive raw conversions.
    ///
    /// `samples` must be nonzero; passing zero divides by zero.
    pub fn read_raw_averaged(&mut self, samples: u32) -> Result<i32, E> {
        debug_assert!(samples > 0);
        let mut total: i64 = 0;
        for _ in 0..samples {
            total += i64::from(LoadCell::read_raw(self)?);
        }
        Ok((total / i64::from(samples)) as i32)
    }

    /// Select the gain/channel for upcoming conversions.
    ///
    /// Performs one discarded conversion to clock the selection into the
    /// sensor. The conversion in flight at the time of the call still used
    /// the previous selection, so the new mode takes effect one conversion
    /// later.
    pub fn set_input_select(&mut self, select: InputSelect) -> Result<(), E> {
        self.input_select = select;
        self.sck_low()?;
        let _ = LoadCell::read_raw(self)?;
        Ok(())
    }

    pub fn input_select(&self) -> InputSelect {
        self.input_select
    }

    /// Power the sensor down or wake it.
    ///
    /// Power-down holds the clock high past the 60 us threshold; normal
    /// mode drives it back low. Any subsequent read also wakes the part.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), E> {
        match mode {
            PowerMode::PowerDown => {
                self.sck_high()?;
                self.delay.delay_us(POWER_DOWN_HOLD_US);
            }
            PowerMode::Normal => self.sck_low()?,
        }
        self.power = mode;
        Ok(())
    }

    pub fn power_mode(&self) -> PowerMode {
        self.power
    }

    /// Replace the smoothing tuning. See [`FilterParams`] for the caller
    /// contract on thresholds and coefficients.
    pub fn set_filter_params(&mut self, params: FilterParams) {
        self.filter.set_params(params);
    }

    pub fn filter_params(&self) -> FilterParams {
        self.filter.params()
    }

    /// Drop the filter state so the next sample re-seeds it.
    pub fn reset_filter(&mut self) {
        self.filter.reset();
    }

    /// Convert a raw count to calibrated units: `(count - offset) / scale`,
    /// truncating. The caller keeps `scale` nonzero and the result within
    /// `i16` range.
    pub fn to_units(&self, count: i32) -> i16 {
        ((count - self.offset) / self.scale) as i16
    }
}

impl<Sck, Dt, Delay, E> LoadCell for SensorChannel<Sck, Dt, Delay>
where
    Sck: OutputPin<Error = E>,
    Dt: InputPin<Error = E>,
    Delay: DelayNs,
{
    type Error = E;

    fn read_raw(&mut self) -> Result<i32, E> {
        nb::block!(self.try_read_raw())
    }

    fn read_filtered(&mut self) -> Result<i32, E> {
        let raw = LoadCell::read_raw(self)?;
        Ok(self.filter.update(raw))
    }

    fn tare(&mut self) -> Result<(), E> {
        self.offset = self.read_filtered()?;
        Ok(())
    }

    fn offset(&self) -> i32 {
        self.offset
    }

    fn set_offset(&mut self, offset: i32) {
        self.offset = offset;
    }

    fn scale(&self) -> i32 {
        self.scale
    }

    fn set_scale(&mut self, scale: i32) {
        debug_assert!(scale != 0);
        self.scale = scale;
    }

    fn read_raw_units(&mut self) -> Result<i16, E> {
        let raw = LoadCell::read_raw(self)?;
        Ok(self.to_units(raw))
    }

    fn read_filtered_units(&mut self) -> Result<i16, E> {
        let filtered = self.read_filtered()?;
        Ok(self.to_units(filtered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    /// Clock-line expectations for one conversion: a high/low pair per data
    /// bit plus one per trailing gain pulse.
    fn sck_conversion(extra_pulses: usize) -> Vec<PinTransaction> {
        let mut v = Vec::new();
        for _ in 0..24 + extra_pulses {
            v.push(PinTransaction::set(PinState::High));
            v.push(PinTransaction::set(PinState::Low));
        }
        v
    }

    /// Data-line expectations for one conversion: the ready poll (line low)
    /// followed by the 24 wire bits, MSB first.
    fn dout_conversion(wire: u32) -> Vec<PinTransaction> {
        let mut v = vec![PinTransaction::get(PinState::Low)];
        for i in (0..24).rev() {
            let state = if wire & (1 << i) != 0 {
                PinState::High
            } else {
                PinState::Low
            };
            v.push(PinTransaction::get(state));
        }
        v
    }

    fn channel(
        sck_expect: &[PinTransaction],
        dout_expect: &[PinTransaction],
    ) -> SensorChannel<PinMock, PinMock, NoopDelay> {
        SensorChannel::new(
            PinMock::new(sck_expect),
            PinMock::new(dout_expect),
            NoopDelay::new(),
        )
    }

    fn finish(ch: SensorChannel<PinMock, PinMock, NoopDelay>) {
        let (mut sck, mut dout) = ch.release();
        sck.done();
        dout.done();
    }

    #[test]
    fn decode_flips_the_sign_bit_msb_first() {
        for (wire, decoded) in [
            (0x00_0001, 0x80_0001),
            (0x80_0000, 0x00_0000),
            (0xFF_FFFF, 0x7F_FFFF),
            (0x00_0000, 0x80_0000),
        ] {
            let mut ch = channel(&sck_conversion(0), &dout_conversion(wire));
            assert_eq!(LoadCell::read_raw(&mut ch).unwrap(), decoded);
            finish(ch);
        }
    }

    #[test]
    fn decoded_range_stays_within_24_bits() {
        let mut ch = channel(&sck_conversion(0), &dout_conversion(0x7F_FFFF));
        let raw = LoadCell::read_raw(&mut ch).unwrap();
        assert!((RAW_MIN..=RAW_MAX).contains(&raw));
        finish(ch);
    }

    #[test]
    fn read_raw_busy_waits_until_the_line_drops() {
        let mut dout = vec![
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
        ];
        dout.extend(dout_conversion(0x12_3456));
        let mut ch = channel(&sck_conversion(0), &dout);
        assert_eq!(LoadCell::read_raw(&mut ch).unwrap(), 0x92_3456);
        finish(ch);
    }

    #[test]
    fn try_read_raw_would_block_while_busy() {
        let dout = [PinTransaction::get(PinState::High)];
        let mut ch = channel(&[], &dout);
        assert_eq!(ch.try_read_raw(), Err(nb::Error::WouldBlock));
        finish(ch);
    }

    #[test]
    fn gain_a128_issues_no_trailing_pulse() {
        let mut ch = channel(&sck_conversion(0), &dout_conversion(0));
        LoadCell::read_raw(&mut ch).unwrap();
        finish(ch);
    }

    #[test]
    fn gain_b32_and_a64_issue_one_trailing_pulse() {
        for select in [InputSelect::GainB32, InputSelect::GainA64] {
            // set_input_select drives the clock low and flushes the new
            // selection with one discarded conversion.
            let mut sck = vec![PinTransaction::set(PinState::Low)];
            sck.extend(sck_conversion(1));
            let mut ch = channel(&sck, &dout_conversion(0x42));
            ch.set_input_select(select).unwrap();
            assert_eq!(ch.input_select(), select);
            finish(ch);
        }
    }

    #[test]
    fn averaged_read_truncates_toward_zero() {
        let mut sck = sck_conversion(0);
        sck.extend(sck_conversion(0));
        sck.extend(sck_conversion(0));
        // Offset codes 100, 200, 250: mean 183.33, truncated to 183.
        let mut dout = dout_conversion(0x80_0000 | 100);
        dout.extend(dout_conversion(0x80_0000 | 200));
        dout.extend(dout_conversion(0x80_0000 | 250));
        let mut ch = channel(&sck, &dout);
        assert_eq!(ch.read_raw_averaged(3).unwrap(), 183);
        finish(ch);
    }

    #[test]
    fn tare_sets_offset_to_the_filtered_reading() {
        let mut ch = channel(&sck_conversion(0), &dout_conversion(0x80_0000 | 8000));
        ch.tare().unwrap();
        // First sample seeds the filter, so the offset is the raw reading.
        assert_eq!(ch.offset(), 8000);
        finish(ch);
    }

    #[test]
    fn to_units_applies_offset_then_scale() {
        let mut ch = channel(&[], &[]);
        ch.set_offset(8000);
        ch.set_scale(10);
        assert_eq!(ch.to_units(8100), 10);
        assert_eq!(ch.to_units(8000), 0);
        assert_eq!(ch.to_units(7900), -10);
        finish(ch);
    }

    #[test]
    fn read_filtered_units_converts_the_stabilized_value() {
        let mut ch = channel(&sck_conversion(0), &dout_conversion(0x80_0000 | 8100));
        ch.set_offset(8000);
        ch.set_scale(10);
        assert_eq!(ch.read_filtered_units().unwrap(), 10);
        finish(ch);
    }

    #[test]
    fn two_point_calibration_round_trips() {
        // Reference weight on the platform reads raw 18100 with the scale
        // tared at 8000; derive the divisor and convert back.
        let known_weight = 10;
        let (offset, raw) = (8000, 18100);
        let mut ch = channel(&[], &[]);
        ch.set_offset(offset);
        ch.set_scale((raw - offset) / known_weight);
        let units = i32::from(ch.to_units(raw));
        assert!((units - known_weight).abs() <= 1);
        finish(ch);
    }

    #[test]
    fn power_down_holds_the_clock_high() {
        let sck = [PinTransaction::set(PinState::High)];
        let mut ch = channel(&sck, &[]);
        ch.set_power_mode(PowerMode::PowerDown).unwrap();
        assert_eq!(ch.power_mode(), PowerMode::PowerDown);
        finish(ch);
    }

    #[test]
    fn waking_drives_the_clock_low() {
        let sck = [
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ];
        let mut ch = channel(&sck, &[]);
        ch.set_power_mode(PowerMode::PowerDown).unwrap();
        ch.set_power_mode(PowerMode::Normal).unwrap();
        assert_eq!(ch.power_mode(), PowerMode::Normal);
        finish(ch);
    }

    #[test]
    fn a_read_wakes_the_sensor() {
        let mut sck = vec![PinTransaction::set(PinState::High)];
        sck.extend(sck_conversion(0));
        let mut ch = channel(&sck, &dout_conversion(0));
        ch.set_power_mode(PowerMode::PowerDown).unwrap();
        LoadCell::read_raw(&mut ch).unwrap();
        assert_eq!(ch.power_mode(), PowerMode::Normal);
        finish(ch);
    }

    #[test]
    fn init_lowers_the_clock_and_flushes_the_input_select() {
        let mut sck = vec![
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::Low),
        ];
        sck.extend(sck_conversion(0));
        let mut ch = channel(&sck, &dout_conversion(0));
        ch.init().unwrap();
        finish(ch);
    }
}
