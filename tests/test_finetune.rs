//! Integration tests for parameter grouping and two-stage fine-tuning.

use approx::assert_relative_eq;
use blockwise::blocks::{ImageTensor, OneHotTensor};
use blockwise::model::{
    trainable_parameters, Activation, Conv, Dense, Module, Param, ParamId, Sequential, UNet,
};
use blockwise::{
    blockmodel, default_grouper, finetune, resolve_groups, BlockModelOptions, BlockwiseError,
    Descent, DiscriminativeLRs, FineTuneConfig, Grouper, IndexGrouper, Learner, Momentum,
    OneCycleOptions, Optimizer, ParamGroups, Result, StepTrainer, Trainer,
};

/// One `fit_one_cycle` invocation as seen by the trainer.
#[derive(Debug)]
struct FitCall {
    nepochs: usize,
    peak_lr: f64,
    options: OneCycleOptions,
    optimizer: String,
    /// Learning rate factor of every parameter, grouped by layer
    factors: Vec<Vec<f64>>,
}

/// Trainer that records how it was called instead of training.
#[derive(Debug, Default)]
struct RecordingTrainer {
    layers: Vec<Vec<ParamId>>,
    calls: Vec<FitCall>,
    fail_on_call: Option<usize>,
}

impl RecordingTrainer {
    fn for_model(model: &Sequential) -> Self {
        let layers = model
            .layers()
            .iter()
            .map(|l| trainable_parameters(&**l).into_iter().map(|p| p.id).collect())
            .collect();
        Self {
            layers,
            ..Default::default()
        }
    }

    /// Factor shared by all parameters of `layer` in call `call`.
    fn layer_factor(&self, call: usize, layer: usize) -> f64 {
        let factors = &self.calls[call].factors[layer];
        assert!(!factors.is_empty(), "layer {} has no parameters", layer);
        assert!(factors.iter().all(|f| *f == factors[0]));
        factors[0]
    }
}

impl Trainer for RecordingTrainer {
    fn fit_one_cycle(
        &mut self,
        learner: &mut Learner,
        nepochs: usize,
        peak_lr: f64,
        options: &OneCycleOptions,
    ) -> Result<()> {
        if self.fail_on_call == Some(self.calls.len()) {
            return Err(anyhow::anyhow!("loss diverged").into());
        }
        let factors = self
            .layers
            .iter()
            .map(|ids| {
                ids.iter()
                    .map(|id| learner.optimizer.lr_factor(*id))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        self.calls.push(FitCall {
            nepochs,
            peak_lr,
            options: *options,
            optimizer: learner.optimizer.name(),
            factors,
        });
        for _ in 0..nepochs {
            learner.record_epoch();
        }
        Ok(())
    }
}

fn three_layer_model() -> Sequential {
    Sequential::new(vec![
        Box::new(Dense::new(4, 16)),
        Box::new(Dense::new(16, 16)),
        Box::new(Dense::new(16, 2)),
    ])
}

#[test]
fn test_end_to_end_stage_factors() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    // layers are 0-based: first and second layer in group 1, third in group 2
    let grouper = IndexGrouper::new(vec![vec![0, 1], vec![2]]);
    let config = FineTuneConfig::default();

    finetune(&mut learner, &mut trainer, 3, &config, Some(&grouper)).unwrap();

    assert_eq!(trainer.calls.len(), 2);

    // frozen stage: only the head learns
    assert_eq!(trainer.layer_factor(0, 0), 0.0);
    assert_eq!(trainer.layer_factor(0, 1), 0.0);
    assert_eq!(trainer.layer_factor(0, 2), 1.0);

    // discriminative stage: backbone lr_mult times slower than the head
    assert_relative_eq!(trainer.layer_factor(1, 0), 1.0 / config.lr_mult, epsilon = 1e-12);
    assert_relative_eq!(trainer.layer_factor(1, 1), 1.0 / config.lr_mult, epsilon = 1e-12);
    assert_eq!(trainer.layer_factor(1, 2), 1.0);
    assert_relative_eq!(
        trainer.layer_factor(1, 2) / trainer.layer_factor(1, 0),
        config.lr_mult,
        epsilon = 1e-9
    );
}

#[test]
fn test_stage_schedules() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    let config = FineTuneConfig {
        base_lr: 0.01,
        freeze_epochs: 2,
        ..Default::default()
    };

    finetune(&mut learner, &mut trainer, 5, &config, None).unwrap();

    let frozen = &trainer.calls[0];
    assert_eq!(frozen.nepochs, 2);
    assert_relative_eq!(frozen.peak_lr, 0.01);
    assert_relative_eq!(frozen.options.pct_start, 0.99);

    let discriminative = &trainer.calls[1];
    assert_eq!(discriminative.nepochs, 5);
    assert_relative_eq!(discriminative.peak_lr, 0.005);
    assert_relative_eq!(discriminative.options.pct_start, 0.3);
    assert_relative_eq!(discriminative.options.div, 5.0);
    assert_relative_eq!(discriminative.options.div_final, 1e5);

    assert_eq!(frozen.optimizer, "DiscriminativeLRs(Descent)");
    assert_eq!(learner.epoch(), 7);
}

#[test]
fn test_default_grouping_is_idempotent() {
    let model = three_layer_model();
    let first = resolve_groups(None, &model).unwrap();
    let second = resolve_groups(None, &model).unwrap();
    assert_eq!(first, second);
    let expected: Vec<Vec<usize>> = vec![vec![0, 1], vec![2]];
    assert_eq!(default_grouper(&model).unwrap().groups(), expected.as_slice());
}

#[test]
fn test_unresolvable_grouper_fails_before_training() {
    let mut trainer = RecordingTrainer::default();
    let mut learner = Learner::new(Box::new(Dense::new(4, 2)), Box::new(Descent));

    let err = finetune(&mut learner, &mut trainer, 1, &FineTuneConfig::default(), None).unwrap_err();

    assert!(matches!(err, BlockwiseError::GrouperResolution(_)));
    assert!(trainer.calls.is_empty());
    assert_eq!(learner.optimizer.name(), "Descent");
}

#[test]
fn test_ungrouped_parameters_fail_before_training() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    let grouper = IndexGrouper::new(vec![vec![0], vec![2]]);

    let err = finetune(&mut learner, &mut trainer, 1, &FineTuneConfig::default(), Some(&grouper))
        .unwrap_err();

    assert!(matches!(err, BlockwiseError::UngroupedParameter { .. }));
    assert!(trainer.calls.is_empty());
}

#[test]
fn test_trainer_errors_abort_the_run() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    trainer.fail_on_call = Some(0);
    let mut learner = Learner::new(Box::new(model), Box::new(Descent));

    let err = finetune(&mut learner, &mut trainer, 2, &FineTuneConfig::default(), None).unwrap_err();

    assert!(matches!(err, BlockwiseError::Trainer(_)));
    assert!(err.to_string().contains("loss diverged"));
    assert!(trainer.calls.is_empty());
}

#[test]
fn test_zero_freeze_epochs_skips_frozen_stage() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    let config = FineTuneConfig {
        freeze_epochs: 0,
        ..Default::default()
    };

    finetune(&mut learner, &mut trainer, 2, &config, None).unwrap();

    assert_eq!(trainer.calls.len(), 1);
    assert_relative_eq!(trainer.layer_factor(0, 0), 0.1, epsilon = 1e-12);
}

#[test]
fn test_repeated_finetune_does_not_nest_wrappers() {
    let model = three_layer_model();
    let mut trainer = RecordingTrainer::for_model(&model);
    let mut learner = Learner::new(Box::new(model), Box::new(Momentum::new(0.9)));

    finetune(&mut learner, &mut trainer, 1, &FineTuneConfig::default(), None).unwrap();
    finetune(&mut learner, &mut trainer, 1, &FineTuneConfig::default(), None).unwrap();

    let wrapper = learner
        .optimizer
        .as_any()
        .downcast_ref::<DiscriminativeLRs>()
        .unwrap();
    assert_eq!(wrapper.inner().name(), "Momentum(rho=0.9)");
    assert_eq!(trainer.calls[3].optimizer, "DiscriminativeLRs(Momentum(rho=0.9))");
}

#[test]
fn test_frozen_backbone_is_not_updated() {
    let model = three_layer_model();
    let backbone: Vec<ParamId> = model.layers()[..2]
        .iter()
        .flat_map(|l| l.parameters())
        .map(|p| p.id)
        .collect();
    let head: Vec<ParamId> = model.layers()[2].parameters().iter().map(|p| p.id).collect();

    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    let mut trainer = StepTrainer::new(3, |p: &Param| vec![1.0; p.numel()]);
    let config = FineTuneConfig::default();

    // frozen stage only
    finetune(&mut learner, &mut trainer, 0, &config, None).unwrap();
    for id in &backbone {
        assert!(trainer.values(*id).unwrap().iter().all(|v| *v == 0.0));
    }
    for id in &head {
        assert!(trainer.values(*id).unwrap().iter().all(|v| *v < 0.0));
    }

    // a discriminative epoch moves the backbone too
    finetune(&mut learner, &mut trainer, 1, &config, None).unwrap();
    for id in &backbone {
        assert!(trainer.values(*id).unwrap().iter().all(|v| *v < 0.0));
    }
}

#[test]
fn test_parameter_free_head_keeps_backbone_frozen() {
    let model = Sequential::new(vec![
        Box::new(Dense::new(4, 8)),
        Box::new(Dense::new(8, 2)),
        Box::new(Activation::relu()),
    ]);
    let backbone: Vec<ParamId> = model.layers()[..2]
        .iter()
        .flat_map(|l| l.parameters())
        .map(|p| p.id)
        .collect();

    let mut learner = Learner::new(Box::new(model), Box::new(Descent));
    let mut trainer = StepTrainer::new(3, |p: &Param| vec![1.0; p.numel()]);
    let config = FineTuneConfig::default();

    finetune(&mut learner, &mut trainer, 0, &config, None).unwrap();
    for id in &backbone {
        assert!(trainer.values(*id).unwrap().iter().all(|v| *v == 0.0));
    }

    // backbone runs lr_mult times slower, not at the head's rate
    finetune(&mut learner, &mut trainer, 1, &config, None).unwrap();
    let opt = learner
        .optimizer
        .as_any()
        .downcast_ref::<DiscriminativeLRs>()
        .unwrap();
    assert_relative_eq!(opt.lr_factor(backbone[0]).unwrap(), 0.1, epsilon = 1e-12);
    assert_eq!(opt.factors().get(&2), Some(&1.0));
}

/// Groups a U-Net into its backbone and its head.
#[derive(Debug)]
struct UNetGrouper;

impl Grouper for UNetGrouper {
    fn group(&self, model: &dyn Module) -> Result<ParamGroups> {
        let unet = model
            .as_any()
            .downcast_ref::<UNet>()
            .ok_or_else(|| BlockwiseError::GrouperResolution("expected a UNet".to_string()))?;
        let backbone: Vec<ParamId> = trainable_parameters(unet.backbone())
            .into_iter()
            .map(|p| p.id)
            .collect();
        let mut groups = ParamGroups::new();
        for param in trainable_parameters(model) {
            let group = if backbone.contains(&param.id) { 1 } else { 2 };
            groups.insert(group, param.id)?;
        }
        Ok(groups)
    }
}

#[test]
fn test_segmentation_model_with_explicit_grouper() {
    let backbone = Sequential::new(vec![
        Box::new(Conv::new(vec![3, 3], 3, 16)),
        Box::new(Activation::relu()),
    ]);
    let model = blockmodel(
        &ImageTensor::new(2, 3),
        &OneHotTensor::new(2, ["background", "foreground"]),
        Some(Box::new(backbone)),
        BlockModelOptions::default(),
    )
    .unwrap();
    let mut learner = Learner::new(model, Box::new(Descent));
    let mut trainer = StepTrainer::new(2, |p: &Param| vec![0.5; p.numel()]);

    assert!(matches!(
        finetune(&mut learner, &mut trainer, 1, &FineTuneConfig::default(), None),
        Err(BlockwiseError::GrouperResolution(_))
    ));
    finetune(
        &mut learner,
        &mut trainer,
        1,
        &FineTuneConfig::default(),
        Some(&UNetGrouper),
    )
    .unwrap();
    assert_eq!(learner.epoch(), 2);
}

#[test]
fn test_classification_model_end_to_end() {
    let backbone = Sequential::new(vec![
        Box::new(Conv::with_stride(vec![3, 3], 3, 32, 2)),
        Box::new(Activation::relu()),
        Box::new(Conv::new(vec![3, 3], 32, 64)),
    ]);
    let model = blockmodel(
        &ImageTensor::new(2, 3),
        &OneHotTensor::new(0, ["cat", "dog"]),
        Some(Box::new(backbone)),
        BlockModelOptions::default(),
    )
    .unwrap();
    let groups = resolve_groups(None, &*model).unwrap();
    groups.ensure_covers(&*model).unwrap();

    let mut learner = Learner::new(model, Box::new(Momentum::default()));
    let mut trainer = StepTrainer::new(4, |p: &Param| vec![0.01; p.numel()]);
    finetune(&mut learner, &mut trainer, 2, &FineTuneConfig::default(), None).unwrap();

    assert_eq!(learner.epoch(), 3);
    assert_eq!(trainer.lr_history().len(), 12);
}
