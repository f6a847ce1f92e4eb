//! Two-stage fine-tuning of a pretrained backbone.
//!
//! `finetune` first trains only the head with the backbone frozen, then
//! unfreezes everything and trains with discriminative learning rates: the
//! backbone learns `lr_mult` times slower than the head.
//!
//! ```text
//! Frozen ──(freeze_epochs done)──> Discriminative ──> done
//! ```
//!
//! # Example
//!
//! ```
//! use blockwise::model::{Dense, Param, Sequential};
//! use blockwise::{finetune, Descent, FineTuneConfig, Learner, StepTrainer};
//!
//! let model = Sequential::new(vec![
//!     Box::new(Dense::new(8, 8)),
//!     Box::new(Dense::new(8, 2)),
//! ]);
//! let mut learner = Learner::new(Box::new(model), Box::new(Descent));
//! let mut trainer = StepTrainer::new(4, |p: &Param| vec![0.1; p.numel()]);
//!
//! finetune(&mut learner, &mut trainer, 2, &FineTuneConfig::default(), None).unwrap();
//! // one frozen epoch plus two discriminative epochs
//! assert_eq!(learner.epoch(), 3);
//! ```

use crate::grouper::{resolve_groups, Grouper, ParamGroups};
use crate::learner::{Learner, Phase, Trainer};
use crate::optim::{base_optimizer, DiscriminativeLRs, Optimizer};
use crate::schedule::OneCycleOptions;
use crate::{BlockwiseError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Fine-tuning hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineTuneConfig {
    /// Peak learning rate of the frozen stage; halved for the second stage
    pub base_lr: f64,
    /// Epochs trained with the backbone frozen
    pub freeze_epochs: usize,
    /// Ratio between head and backbone learning rates
    pub lr_mult: f64,
    /// Initial-to-peak learning rate divisor of the second stage
    pub div: f64,
    /// Warmup fraction of the second stage
    pub pct_start: f64,
    /// Warmup fraction of the frozen stage
    pub freeze_pct_start: f64,
    /// Peak-to-final learning rate divisor of both stages
    pub div_final: f64,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            base_lr: 0.002,
            freeze_epochs: 1,
            lr_mult: 10.0,
            div: 5.0,
            pct_start: 0.3,
            freeze_pct_start: 0.99,
            div_final: 1e5,
        }
    }
}

impl FineTuneConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("base_lr", self.base_lr),
            ("lr_mult", self.lr_mult),
            ("div", self.div),
            ("div_final", self.div_final),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(BlockwiseError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [("pct_start", self.pct_start), ("freeze_pct_start", self.freeze_pct_start)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(BlockwiseError::InvalidParameter(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Stage of a fine-tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FineTuneStage {
    /// Backbone frozen, head trained
    Frozen,
    /// Everything trained, backbone at a reduced rate
    Discriminative,
}

impl FineTuneStage {
    /// Stage that follows this one.
    pub fn next(self) -> Option<FineTuneStage> {
        match self {
            FineTuneStage::Frozen => Some(FineTuneStage::Discriminative),
            FineTuneStage::Discriminative => None,
        }
    }

    /// Epochs trained in this stage.
    pub fn epochs(self, nepochs: usize, config: &FineTuneConfig) -> usize {
        match self {
            FineTuneStage::Frozen => config.freeze_epochs,
            FineTuneStage::Discriminative => nepochs,
        }
    }

    /// Peak learning rate of this stage.
    pub fn peak_lr(self, config: &FineTuneConfig) -> f64 {
        match self {
            FineTuneStage::Frozen => config.base_lr,
            FineTuneStage::Discriminative => config.base_lr / 2.0,
        }
    }

    /// One-cycle shape of this stage.
    pub fn schedule(self, config: &FineTuneConfig) -> OneCycleOptions {
        match self {
            FineTuneStage::Frozen => OneCycleOptions {
                pct_start: config.freeze_pct_start,
                div_final: config.div_final,
                ..Default::default()
            },
            FineTuneStage::Discriminative => OneCycleOptions {
                pct_start: config.pct_start,
                div: config.div,
                div_final: config.div_final,
            },
        }
    }

    /// Wrap `base` with this stage's per-group learning rate factors.
    pub fn optimizer(self, base: Box<dyn Optimizer>, groups: ParamGroups, config: &FineTuneConfig) -> DiscriminativeLRs {
        match self {
            FineTuneStage::Frozen => DiscriminativeLRs::frozen(base, groups),
            FineTuneStage::Discriminative => DiscriminativeLRs::discriminative(base, groups, config.lr_mult),
        }
    }
}

impl fmt::Display for FineTuneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FineTuneStage::Frozen => write!(f, "frozen"),
            FineTuneStage::Discriminative => write!(f, "discriminative"),
        }
    }
}

/// Fine-tune `learner` for `nepochs` epochs after `config.freeze_epochs`
/// epochs with a frozen backbone.
///
/// Parameters are grouped by `grouper`, or by the default grouper if none is
/// given; a model that cannot be grouped fails before any training. Each
/// stage replaces `learner.optimizer` with a `DiscriminativeLRs` around the
/// learner's base optimizer, and the wrapper of the last stage is left in
/// place.
pub fn finetune(
    learner: &mut Learner,
    trainer: &mut dyn Trainer,
    nepochs: usize,
    config: &FineTuneConfig,
    grouper: Option<&dyn Grouper>,
) -> Result<()> {
    config.validate()?;
    let groups = resolve_groups(grouper, &*learner.model)?;
    groups.ensure_covers(&*learner.model)?;
    debug!(
        "fine-tuning {} with {} parameter groups",
        learner.model.name(),
        groups.len()
    );

    let base = base_optimizer(&*learner.optimizer);
    learner.init_learner(&[Phase::Training, Phase::Validation]);

    let mut stage = Some(FineTuneStage::Frozen);
    while let Some(current) = stage {
        let epochs = current.epochs(nepochs, config);
        if epochs == 0 {
            debug!("skipping {} stage", current);
        } else {
            let peak_lr = current.peak_lr(config);
            let options = current.schedule(config);
            let optimizer = current.optimizer(base.box_clone(), groups.clone(), config);
            info!(
                "{} stage: {} epochs at peak lr {:.3e}, group factors {:?}",
                current,
                epochs,
                peak_lr,
                optimizer.factors()
            );
            learner.optimizer = Box::new(optimizer);
            trainer.fit_one_cycle(learner, epochs, peak_lr, &options)?;
        }
        stage = current.next();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FineTuneConfig::default();
        config.validate().unwrap();
        assert_eq!(config.freeze_epochs, 1);
        assert_eq!(config.lr_mult, 10.0);
    }

    #[test]
    fn test_config_json_defaults_missing_fields() {
        let config = FineTuneConfig::from_json(r#"{"base_lr": 0.01, "freeze_epochs": 3}"#).unwrap();
        assert_eq!(config.base_lr, 0.01);
        assert_eq!(config.freeze_epochs, 3);
        assert_eq!(config.pct_start, 0.3);

        let json = config.to_json().unwrap();
        assert_eq!(FineTuneConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_config_validation() {
        let bad = [
            FineTuneConfig {
                base_lr: 0.0,
                ..Default::default()
            },
            FineTuneConfig {
                lr_mult: -1.0,
                ..Default::default()
            },
            FineTuneConfig {
                pct_start: 1.5,
                ..Default::default()
            },
            FineTuneConfig {
                freeze_pct_start: 0.0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
        assert!(FineTuneConfig::from_json(r#"{"div": 0}"#).is_err());
    }

    #[test]
    fn test_stage_transitions() {
        let config = FineTuneConfig::default();
        assert_eq!(FineTuneStage::Frozen.next(), Some(FineTuneStage::Discriminative));
        assert_eq!(FineTuneStage::Discriminative.next(), None);
        assert_eq!(FineTuneStage::Frozen.peak_lr(&config), 0.002);
        assert_eq!(FineTuneStage::Discriminative.peak_lr(&config), 0.001);
        assert_eq!(FineTuneStage::Frozen.schedule(&config).pct_start, 0.99);
        assert_eq!(FineTuneStage::Discriminative.schedule(&config).div, 5.0);
        assert_eq!(FineTuneStage::Discriminative.epochs(7, &config), 7);
    }

    #[test]
    fn test_load_missing_file() {
        let err = FineTuneConfig::load("/nonexistent/finetune.json").unwrap_err();
        assert!(matches!(err, BlockwiseError::Io(_)));
    }
}
