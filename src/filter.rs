//! Adaptive exponential smoothing for raw load cell counts.
//!
//! The filter is an EMA whose coefficient adapts to the magnitude of change:
//! large steps (an object placed on the scale) track with `alpha_max_q8`,
//! small fluctuations (vibration, electrical noise) are damped with
//! `alpha_min_q8`, with a linear ramp in between. A dead-band on the
//! published output additionally suppresses single-count jitter while the
//! internal estimate is still settling.

/// Tuning parameters for [`AdaptiveFilter`].
///
/// Coefficients are Q8 fixed point: an integer `a` stands for the fraction
/// `a / 256`, so the representable range is `[0, 1)`.
///
/// Caller contract: `delta_high > delta_low` and
/// `alpha_min_q8 <= alpha_max_q8`. The filter does not defend against
/// violations beyond a `debug_assert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterParams {
    /// Below this |raw - estimate| the change is treated as noise.
    pub delta_low: i32,
    /// At or above this |raw - estimate| the change is tracked at full speed.
    pub delta_high: i32,
    /// Smoothing coefficient applied in the noise zone, Q8.
    pub alpha_min_q8: u8,
    /// Smoothing coefficient applied in the large-change zone, Q8.
    pub alpha_max_q8: u8,
    /// The published output only moves when the estimate has drifted more
    /// than this many raw counts away from it.
    pub output_deadband: i32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            delta_low: 1500,
            delta_high: 15000,
            alpha_min_q8: 32,
            alpha_max_q8: 128,
            output_deadband: 1000,
        }
    }
}

/// Adaptively tuned EMA with a dead-banded output.
///
/// All arithmetic is integer; the EMA multiply goes through an `i64`
/// intermediate so it cannot overflow for 24-bit inputs.
#[derive(Debug, Clone)]
pub struct AdaptiveFilter {
    params: FilterParams,
    ema: i32,
    output: i32,
    initialized: bool,
}

impl AdaptiveFilter {
    pub fn new(params: FilterParams) -> Self {
        debug_assert!(params.delta_high > params.delta_low);
        debug_assert!(params.alpha_min_q8 <= params.alpha_max_q8);
        Self {
            params,
            ema: 0,
            output: 0,
            initialized: false,
        }
    }

    /// Replace the tuning parameters, keeping the current estimate.
    pub fn set_params(&mut self, params: FilterParams) {
        debug_assert!(params.delta_high > params.delta_low);
        debug_assert!(params.alpha_min_q8 <= params.alpha_max_q8);
        self.params = params;
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Discard the state so the next sample re-seeds the filter.
    ///
    /// Useful after an input-select change, where the raw counts jump to a
    /// different operating point.
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    /// Feed one raw sample and get the stabilized value back.
    ///
    /// The first sample seeds both the estimate and the output and is
    /// returned unsmoothed.
    pub fn update(&mut self, raw: i32) -> i32 {
        if !self.initialized {
            self.ema = raw;
            self.output = raw;
            self.initialized = true;
            return raw;
        }

        let diff = i64::from(raw) - i64::from(self.ema);
        let alpha = self.alpha_q8(diff.unsigned_abs());

        self.ema += ((diff * i64::from(alpha)) >> 8) as i32;

        // The output only follows the estimate on significant change.
        let drift = (i64::from(self.ema) - i64::from(self.output)).abs();
        if drift > i64::from(self.params.output_deadband) {
            self.output = self.ema;
        }

        self.output
    }

    /// Piecewise-linear coefficient selection: clamped to `alpha_min_q8`
    /// at `delta_low` and below, to `alpha_max_q8` at `delta_high` and
    /// above, floor-interpolated in between.
    fn alpha_q8(&self, delta: u64) -> u8 {
        let p = &self.params;
        if delta <= p.delta_low as u64 {
            p.alpha_min_q8
        } else if delta >= p.delta_high as u64 {
            p.alpha_max_q8
        } else {
            let span = u64::from(p.alpha_max_q8 - p.alpha_min_q8);
            let num = (delta - p.delta_low as u64) * span;
            let den = (p.delta_high - p.delta_low) as u64;
            p.alpha_min_q8 + (num / den) as u8
        }
    }
}
