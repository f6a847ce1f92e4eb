//! Concrete block types.
//!
//! # Data Blocks
//!
//! Blocks describing raw observations and targets:
//!
//! - `Continuous` - Fixed-length numeric vector
//! - `Label` - Single categorical value
//! - `LabelMulti` - Set of categorical values
//! - `TableRow` - Row with categorical and continuous columns
//!
//! # Tensor Blocks
//!
//! Blocks describing encoded tensors, the usual model inputs and outputs:
//!
//! - `ImageTensor` - N-dimensional image with channels
//! - `KeypointTensor` - N-dimensional keypoint coordinates
//! - `OneHotTensor` - One-hot class encoding
//! - `OneHotTensorMulti` - Multi-hot class encoding
//!
//! # Decorators
//!
//! - `WrapperBlock` - Named wrapper forwarding to an inner block
//!
//! # Examples
//!
//! ```
//! use blockwise::blocks::{ImageTensor, OneHotTensor};
//! use blockwise::Block;
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let image = ImageTensor::new(2, 3);
//! let sample = image.mock(&mut rng);
//! assert!(image.check(&sample));
//!
//! let classes = OneHotTensor::new(0, ["cat", "dog"]);
//! assert_eq!(classes.ndims(), Some(0));
//! ```

pub mod continuous;
pub mod label;
pub mod table_row;
pub mod tensor;
pub mod wrapper;

pub use continuous::Continuous;
pub use label::{Label, LabelMulti};
pub use table_row::TableRow;
pub use tensor::{ImageTensor, KeypointTensor, OneHotTensor, OneHotTensorMulti};
pub use wrapper::WrapperBlock;
