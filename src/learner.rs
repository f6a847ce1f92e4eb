//! Learner state and the training-loop seam.
//!
//! The numerical training loop belongs to the deep-learning runtime and is
//! reached through the `Trainer` trait. `StepTrainer` is a reference
//! implementation that walks a one-cycle schedule and feeds caller-provided
//! gradients through the learner's optimizer.

use crate::loss::LossFn;
use crate::model::{trainable_parameters, Module, Param, ParamId};
use crate::optim::Optimizer;
use crate::schedule::{LrScheduler, OneCycleOptions, OneCycleSchedule};
use crate::{BlockwiseError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Phases of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Training,
    Validation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A model together with its optimizer and training state.
#[derive(Debug)]
pub struct Learner {
    pub model: Box<dyn Module>,
    pub optimizer: Box<dyn Optimizer>,
    pub loss: Option<LossFn>,
    phases: Vec<Phase>,
    epoch: usize,
    step: usize,
}

impl Learner {
    pub fn new(model: Box<dyn Module>, optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            model,
            optimizer,
            loss: None,
            phases: vec![Phase::Training, Phase::Validation],
            epoch: 0,
            step: 0,
        }
    }

    pub fn with_loss(mut self, loss: LossFn) -> Self {
        self.loss = Some(loss);
        self
    }

    /// Reset training state and set the phases run in each epoch.
    pub fn init_learner(&mut self, phases: &[Phase]) {
        self.phases = phases.to_vec();
        self.epoch = 0;
        self.step = 0;
    }

    #[inline]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Completed epochs since the last reset.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Optimizer steps since the last reset.
    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn record_step(&mut self) {
        self.step += 1;
    }

    pub fn record_epoch(&mut self) {
        self.epoch += 1;
    }
}

/// External training loop.
pub trait Trainer {
    /// Train `learner` for `nepochs` epochs under a one-cycle schedule
    /// peaking at `peak_lr`. Blocks until training completes.
    fn fit_one_cycle(
        &mut self,
        learner: &mut Learner,
        nepochs: usize,
        peak_lr: f64,
        options: &OneCycleOptions,
    ) -> Result<()>;
}

/// Reference trainer driving the optimizer with supplied gradients.
///
/// Parameter values start at zero and live in the trainer. Each step asks
/// `gradient` for the gradient of every trainable parameter and hands it
/// to the learner's optimizer with the scheduled learning rate.
pub struct StepTrainer<G> {
    steps_per_epoch: usize,
    gradient: G,
    values: HashMap<ParamId, Vec<f32>>,
    lr_history: Vec<f64>,
}

impl<G> StepTrainer<G>
where
    G: FnMut(&Param) -> Vec<f32>,
{
    pub fn new(steps_per_epoch: usize, gradient: G) -> Self {
        Self {
            steps_per_epoch,
            gradient,
            values: HashMap::new(),
            lr_history: Vec::new(),
        }
    }

    /// Current values of `param`, if it has been updated.
    pub fn values(&self, param: ParamId) -> Option<&[f32]> {
        self.values.get(&param).map(Vec::as_slice)
    }

    /// Scheduled learning rate of every step run so far.
    pub fn lr_history(&self) -> &[f64] {
        &self.lr_history
    }
}

impl<G> fmt::Debug for StepTrainer<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTrainer")
            .field("steps_per_epoch", &self.steps_per_epoch)
            .field("params", &self.values.len())
            .field("steps", &self.lr_history.len())
            .finish()
    }
}

impl<G> Trainer for StepTrainer<G>
where
    G: FnMut(&Param) -> Vec<f32>,
{
    fn fit_one_cycle(
        &mut self,
        learner: &mut Learner,
        nepochs: usize,
        peak_lr: f64,
        options: &OneCycleOptions,
    ) -> Result<()> {
        if self.steps_per_epoch == 0 {
            return Err(BlockwiseError::InvalidParameter(
                "steps_per_epoch must be positive".to_string(),
            ));
        }
        let mut schedule = OneCycleSchedule::new(nepochs * self.steps_per_epoch, peak_lr, *options)?;
        let params = trainable_parameters(&*learner.model);

        for epoch in 0..nepochs {
            for _ in 0..self.steps_per_epoch {
                let lr = schedule.get_lr();
                for param in &params {
                    let grads = (self.gradient)(param);
                    let values = self
                        .values
                        .entry(param.id)
                        .or_insert_with(|| vec![0.0; param.numel()]);
                    learner.optimizer.apply(param.id, values, &grads, lr)?;
                }
                self.lr_history.push(lr);
                schedule.step();
                learner.record_step();
            }
            learner.record_epoch();
            debug!(
                "epoch {}/{} done with {}, lr {:.3e}",
                epoch + 1,
                nepochs,
                learner.optimizer.name(),
                self.lr_history.last().copied().unwrap_or(0.0)
            );
        }
        Ok(())
    }
}
