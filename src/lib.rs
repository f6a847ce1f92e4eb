//! Blockwise - Typed Data Blocks for Model Construction and Fine-Tuning
//!
//! Blockwise describes the data flowing through a deep-learning task as
//! **blocks**: typed descriptors of what an observation looks like. Blocks
//! validate observations, synthesize mock data, pick loss functions and,
//! given an input and an output block, select a model architecture. On top
//! of that sits a two-stage fine-tuning procedure for pretrained backbones.
//!
//! # Architecture
//!
//! The crate is built around several core components:
//!
//! - **Block System**: `Block` trait with concrete blocks in [`blocks`]
//! - **Model Construction**: [`blockmodel`] dispatch over block kind pairs
//! - **Model Description**: structural layers and shape inference in [`model`]
//! - **Fine-Tuning**: parameter grouping, discriminative learning rates and
//!   one-cycle schedules driving an external [`Trainer`]
//!
//! Numerical execution (tensors on devices, gradients, data loading) is the
//! job of a deep-learning runtime. Blockwise reaches it through the
//! [`Module`](model::Module), [`ArchitectureFactory`] and [`Trainer`]
//! traits and ships reference implementations of each.
//!
//! # Examples
//!
//! ## Checking and Mocking Observations
//!
//! ```
//! use blockwise::blocks::{Continuous, Label};
//! use blockwise::{checkblock, mockblock, Obs, Setup};
//! use rand::SeedableRng;
//!
//! let block = Continuous::new(5);
//! assert!(checkblock(&block, &Obs::from(vec![0.0; 5])));
//! assert!(!checkblock(&block, &Obs::from("hi")));
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let obs = mockblock(&block, &mut rng);
//! assert!(checkblock(&block, &obs));
//!
//! let label = Label::setup(["cat", "dog", "dog", "cat"]).unwrap();
//! assert_eq!(label.classes().len(), 2);
//! ```
//!
//! ## Building a Model
//!
//! ```
//! use blockwise::blocks::{ImageTensor, Label, OneHotTensor};
//! use blockwise::model::{Conv, Module};
//! use blockwise::{blocklossfn, blockmodel, BlockModelOptions, LossFn};
//!
//! let input = ImageTensor::new(2, 3);
//! let output = OneHotTensor::for_label(&Label::new(["cat", "dog"]));
//!
//! let backbone = Box::new(Conv::new(vec![3, 3], 3, 64));
//! let model = blockmodel(&input, &output, Some(backbone), BlockModelOptions::default()).unwrap();
//! assert_eq!(model.output_shape(&[128, 128, 3, 4]).unwrap(), vec![2, 4]);
//!
//! let target = Label::new(["cat", "dog"]);
//! assert_eq!(blocklossfn(&output, &target).unwrap(), LossFn::LogitCrossEntropy);
//! ```

// Module declarations
pub mod error;
pub mod obs;
pub mod check;

// Block system
pub mod block;
pub mod blocks;
pub mod block_config;
pub mod loss;

// Model construction
pub mod model;
pub mod architectures;
pub mod blockmodel;

// Fine-tuning
pub mod grouper;
pub mod optim;
pub mod schedule;
pub mod learner;
pub mod finetune;

// Re-exports for convenient access
pub use error::{BlockwiseError, Result};
pub use obs::{Obs, Tensor};
pub use check::{CheckFailure, CheckReport};

pub use block::{checkblock, downcast, mockblock, unwrap_block, Block, BlockKind, Setup};
pub use block_config::{BlockConfig, TaskConfig};
pub use loss::{blocklossfn, LossFn};

pub use architectures::{ArchitectureFactory, DefaultArchitectures};
pub use blockmodel::{
    blockmodel, default_registry, BlockModelOptions, DimRule, ModelRegistry, TabularPart,
};

pub use grouper::{default_grouper, resolve_groups, Grouper, IndexGrouper, ParamGroups};
pub use optim::{base_optimizer, Descent, DiscriminativeLRs, Momentum, Optimizer};
pub use schedule::{LrScheduler, OneCycleOptions, OneCycleSchedule};
pub use learner::{Learner, Phase, StepTrainer, Trainer};
pub use finetune::{finetune, FineTuneConfig, FineTuneStage};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework name
pub const NAME: &str = "Blockwise";

/// Get version string
pub fn version() -> String {
    format!("{} v{}", NAME, VERSION)
}
