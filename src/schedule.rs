//! One-cycle learning rate schedule.
//!
//! The learning rate starts at `peak_lr / div`, rises along a cosine curve
//! to `peak_lr` over the first `pct_start` fraction of the run, then
//! anneals along a cosine curve to `peak_lr / div_final`.

use crate::{BlockwiseError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Learning rate scheduler trait.
pub trait LrScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f64;

    /// Advance by one optimizer step
    fn step(&mut self);
}

/// Shape of a one-cycle run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneCycleOptions {
    /// Fraction of the run spent warming up
    pub pct_start: f64,
    /// Initial learning rate is `peak_lr / div`
    pub div: f64,
    /// Final learning rate is `peak_lr / div_final`
    pub div_final: f64,
}

impl Default for OneCycleOptions {
    fn default() -> Self {
        Self {
            pct_start: 0.25,
            div: 25.0,
            div_final: 1e5,
        }
    }
}

impl OneCycleOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.pct_start > 0.0 && self.pct_start <= 1.0) {
            return Err(BlockwiseError::InvalidParameter(format!(
                "pct_start must be in (0, 1], got {}",
                self.pct_start
            )));
        }
        if !(self.div > 0.0) || !(self.div_final > 0.0) {
            return Err(BlockwiseError::InvalidParameter(format!(
                "div and div_final must be positive, got {} and {}",
                self.div, self.div_final
            )));
        }
        Ok(())
    }
}

/// Cosine interpolation from `start` (t = 0) to `end` (t = 1).
fn cosine_anneal(start: f64, end: f64, t: f64) -> f64 {
    end + (start - end) / 2.0 * (1.0 + (PI * t).cos())
}

/// One-cycle learning rate schedule over a fixed number of steps.
///
/// # Examples
///
/// ```
/// use blockwise::{OneCycleOptions, OneCycleSchedule};
///
/// let sched = OneCycleSchedule::new(100, 0.01, OneCycleOptions::default()).unwrap();
/// assert!((sched.lr_at(0) - 0.01 / 25.0).abs() < 1e-12);
/// assert!((sched.lr_at(25) - 0.01).abs() < 1e-12);
/// assert!(sched.lr_at(100) < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OneCycleSchedule {
    total_steps: usize,
    peak_lr: f64,
    options: OneCycleOptions,
    current_step: usize,
}

impl OneCycleSchedule {
    pub fn new(total_steps: usize, peak_lr: f64, options: OneCycleOptions) -> Result<Self> {
        options.validate()?;
        if !(peak_lr >= 0.0) {
            return Err(BlockwiseError::InvalidParameter(format!(
                "peak learning rate must be non-negative, got {}",
                peak_lr
            )));
        }
        Ok(Self {
            total_steps,
            peak_lr,
            options,
            current_step: 0,
        })
    }

    #[inline]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    #[inline]
    pub fn peak_lr(&self) -> f64 {
        self.peak_lr
    }

    #[inline]
    pub fn options(&self) -> &OneCycleOptions {
        &self.options
    }

    /// Number of warmup steps.
    pub fn warmup_steps(&self) -> usize {
        ((self.total_steps as f64) * self.options.pct_start).round() as usize
    }

    pub fn initial_lr(&self) -> f64 {
        self.peak_lr / self.options.div
    }

    pub fn final_lr(&self) -> f64 {
        self.peak_lr / self.options.div_final
    }

    /// Learning rate at `step`; steps past the end keep the final rate.
    pub fn lr_at(&self, step: usize) -> f64 {
        let warmup = self.warmup_steps();
        if step < warmup {
            let t = step as f64 / warmup as f64;
            return cosine_anneal(self.initial_lr(), self.peak_lr, t);
        }
        let decay = self.total_steps.saturating_sub(warmup);
        if decay == 0 {
            return self.peak_lr;
        }
        let t = ((step - warmup) as f64 / decay as f64).min(1.0);
        cosine_anneal(self.peak_lr, self.final_lr(), t)
    }
}

impl LrScheduler for OneCycleSchedule {
    fn get_lr(&self) -> f64 {
        self.lr_at(self.current_step)
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}
