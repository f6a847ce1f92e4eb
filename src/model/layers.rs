//! Reference layer descriptors.
//!
//! Each layer records its parameter shapes and implements shape inference.

use super::{feature_width, Module, Param};
use crate::{BlockwiseError, Result};
use std::any::Any;

fn shape_err(layer: &str, msg: String) -> BlockwiseError {
    BlockwiseError::Shape(format!("{}: {}", layer, msg))
}

/// N-dimensional convolution with "same" padding.
#[derive(Debug, Clone)]
pub struct Conv {
    kernel: Vec<usize>,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    weight: Param,
    bias: Param,
}

impl Conv {
    pub fn new(kernel: Vec<usize>, in_channels: usize, out_channels: usize) -> Self {
        Self::with_stride(kernel, in_channels, out_channels, 1)
    }

    /// # Panics
    ///
    /// Panics if `stride` is zero.
    pub fn with_stride(kernel: Vec<usize>, in_channels: usize, out_channels: usize, stride: usize) -> Self {
        assert!(stride > 0, "stride must be positive");
        let mut wshape = kernel.clone();
        wshape.extend([in_channels, out_channels]);
        Self {
            kernel,
            in_channels,
            out_channels,
            stride,
            weight: Param::trainable(wshape),
            bias: Param::trainable(vec![out_channels]),
        }
    }

    #[inline]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for Conv {
    fn name(&self) -> String {
        format!(
            "Conv({:?}, {} => {})",
            self.kernel, self.in_channels, self.out_channels
        )
    }

    fn parameters(&self) -> Vec<Param> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let n = self.kernel.len();
        if input.len() != n + 2 {
            return Err(shape_err(
                &self.name(),
                format!("expected {} dims, got {:?}", n + 2, input),
            ));
        }
        if input[n] != self.in_channels {
            return Err(shape_err(
                &self.name(),
                format!("expected {} input channels, got {}", self.in_channels, input[n]),
            ));
        }
        let mut out = Vec::with_capacity(n + 2);
        for (d, k) in input[..n].iter().zip(&self.kernel) {
            let pad = k / 2;
            if d + 2 * pad < *k {
                return Err(shape_err(
                    &self.name(),
                    format!("spatial size {} smaller than kernel {}", d, k),
                ));
            }
            out.push((d + 2 * pad - k) / self.stride + 1);
        }
        out.push(self.out_channels);
        out.push(input[n + 1]);
        Ok(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fully connected layer mapping `[in, batch]` to `[out, batch]`.
#[derive(Debug, Clone)]
pub struct Dense {
    in_features: usize,
    out_features: usize,
    weight: Param,
    bias: Param,
}

impl Dense {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            weight: Param::trainable(vec![out_features, in_features]),
            bias: Param::trainable(vec![out_features]),
        }
    }

    #[inline]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    #[inline]
    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Module for Dense {
    fn name(&self) -> String {
        format!("Dense({} => {})", self.in_features, self.out_features)
    }

    fn parameters(&self) -> Vec<Param> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [features, batch] if *features == self.in_features => Ok(vec![self.out_features, *batch]),
            _ => Err(shape_err(
                &self.name(),
                format!("expected [{}, batch], got {:?}", self.in_features, input),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Batch normalization over the channel (second to last) dimension.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    channels: usize,
    gamma: Param,
    beta: Param,
    running_mean: Param,
    running_var: Param,
}

impl BatchNorm {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            gamma: Param::trainable(vec![channels]),
            beta: Param::trainable(vec![channels]),
            running_mean: Param::buffer(vec![channels]),
            running_var: Param::buffer(vec![channels]),
        }
    }
}

impl Module for BatchNorm {
    fn name(&self) -> String {
        format!("BatchNorm({})", self.channels)
    }

    fn parameters(&self) -> Vec<Param> {
        vec![
            self.gamma.clone(),
            self.beta.clone(),
            self.running_mean.clone(),
            self.running_var.clone(),
        ]
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.len() < 2 || input[input.len() - 2] != self.channels {
            return Err(shape_err(
                &self.name(),
                format!("expected {} channels, got {:?}", self.channels, input),
            ));
        }
        Ok(input.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Dropout; shape-preserving, no parameters.
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f64,
}

impl Dropout {
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl Module for Dropout {
    fn name(&self) -> String {
        format!("Dropout({})", self.p)
    }

    fn parameters(&self) -> Vec<Param> {
        Vec::new()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Sigmoid,
    Tanh,
}

/// Element-wise activation.
#[derive(Debug, Clone)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }
}

impl Module for Activation {
    fn name(&self) -> String {
        format!("{:?}", self.kind).to_lowercase()
    }

    fn parameters(&self) -> Vec<Param> {
        Vec::new()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Average over all spatial dimensions: `[d.., C, B]` to `[1.., C, B]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveMeanPool;

impl Module for AdaptiveMeanPool {
    fn name(&self) -> String {
        "AdaptiveMeanPool".to_string()
    }

    fn parameters(&self) -> Vec<Param> {
        Vec::new()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.len() < 3 {
            return Err(shape_err(
                &self.name(),
                format!("expected spatial input, got {:?}", input),
            ));
        }
        let n = input.len() - 2;
        let mut out = vec![1; n];
        out.extend_from_slice(&input[n..]);
        Ok(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Collapse all but the batch dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl Module for Flatten {
    fn name(&self) -> String {
        "Flatten".to_string()
    }

    fn parameters(&self) -> Vec<Param> {
        Vec::new()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let Some((batch, rest)) = input.split_last() else {
            return Err(shape_err(&self.name(), "empty input shape".to_string()));
        };
        Ok(vec![rest.iter().product(), *batch])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Lookup table mapping `vocab` indices to `dim`-wide vectors.
#[derive(Debug, Clone)]
pub struct Embedding {
    vocab: usize,
    dim: usize,
    weight: Param,
}

impl Embedding {
    pub fn new(vocab: usize, dim: usize) -> Self {
        Self {
            vocab,
            dim,
            weight: Param::trainable(vec![dim, vocab]),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn vocab(&self) -> usize {
        self.vocab
    }
}

impl Module for Embedding {
    fn name(&self) -> String {
        format!("Embedding({} => {})", self.vocab, self.dim)
    }

    fn parameters(&self) -> Vec<Param> {
        vec![self.weight.clone()]
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [batch] | [1, batch] => Ok(vec![self.dim, *batch]),
            _ => Err(shape_err(
                &self.name(),
                format!("expected [batch] indices, got {:?}", input),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One embedding per categorical column, outputs concatenated.
///
/// Maps `[ncolumns, batch]` to `[sum(dims), batch]`.
#[derive(Debug, Clone)]
pub struct TabularEmbeddings {
    embeddings: Vec<Embedding>,
    dropout: f64,
}

impl TabularEmbeddings {
    pub fn new(embeddings: Vec<Embedding>, dropout: f64) -> Self {
        Self { embeddings, dropout }
    }

    #[inline]
    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    /// Total width of the concatenated output.
    pub fn out_width(&self) -> usize {
        self.embeddings.iter().map(Embedding::dim).sum()
    }
}

impl Module for TabularEmbeddings {
    fn name(&self) -> String {
        format!(
            "TabularEmbeddings({} columns => {}, dropout {})",
            self.embeddings.len(),
            self.out_width(),
            self.dropout
        )
    }

    fn parameters(&self) -> Vec<Param> {
        self.embeddings.iter().flat_map(Module::parameters).collect()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [ncols, batch] if *ncols == self.embeddings.len() => Ok(vec![self.out_width(), *batch]),
            _ => Err(shape_err(
                &self.name(),
                format!("expected [{}, batch], got {:?}", self.embeddings.len(), input),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tabular model: categorical and continuous backbones feeding a classifier.
///
/// Input is `[ncat + ncont, batch]`; the first `ncat` rows go to the
/// categorical backbone and the rest to the continuous backbone. Their
/// outputs are concatenated before the classifier.
#[derive(Debug)]
pub struct TabularModel {
    ncat: usize,
    ncont: usize,
    categorical: Box<dyn Module>,
    continuous: Box<dyn Module>,
    classifier: Box<dyn Module>,
}

impl TabularModel {
    pub fn new(
        ncat: usize,
        ncont: usize,
        categorical: Box<dyn Module>,
        continuous: Box<dyn Module>,
        classifier: Box<dyn Module>,
    ) -> Self {
        Self {
            ncat,
            ncont,
            categorical,
            continuous,
            classifier,
        }
    }

    pub fn categorical(&self) -> &dyn Module {
        &*self.categorical
    }

    pub fn continuous(&self) -> &dyn Module {
        &*self.continuous
    }

    pub fn classifier(&self) -> &dyn Module {
        &*self.classifier
    }
}

impl Module for TabularModel {
    fn name(&self) -> String {
        format!("TabularModel({} categorical, {} continuous)", self.ncat, self.ncont)
    }

    fn parameters(&self) -> Vec<Param> {
        let mut params = self.categorical.parameters();
        params.extend(self.continuous.parameters());
        params.extend(self.classifier.parameters());
        params
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let [ncols, batch] = input else {
            return Err(shape_err(
                &self.name(),
                format!("expected [columns, batch], got {:?}", input),
            ));
        };
        if *ncols != self.ncat + self.ncont {
            return Err(shape_err(
                &self.name(),
                format!("expected {} columns, got {}", self.ncat + self.ncont, ncols),
            ));
        }
        let cat = feature_width(&*self.categorical, &[self.ncat, *batch])?;
        let cont = feature_width(&*self.continuous, &[self.ncont, *batch])?;
        self.classifier.output_shape(&[cat + cont, *batch])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// U-Net style segmentation model around an encoder backbone.
///
/// Only the outer contract is described here: the decoder restores the
/// spatial size of the input and predicts `out_channels` channels.
#[derive(Debug)]
pub struct UNet {
    backbone: Box<dyn Module>,
    input_size: Vec<usize>,
    out_channels: usize,
    head: Conv,
}

impl UNet {
    /// Wrap `backbone` for inputs of `input_size` (`[d.., C, B]`).
    ///
    /// Fails if the backbone cannot process `input_size`.
    pub fn new(backbone: Box<dyn Module>, input_size: Vec<usize>, out_channels: usize) -> Result<Self> {
        if input_size.len() < 3 {
            return Err(BlockwiseError::Shape(format!(
                "U-Net input must have spatial, channel and batch dims, got {:?}",
                input_size
            )));
        }
        let features = backbone.output_shape(&input_size)?;
        if features.len() != input_size.len() {
            return Err(BlockwiseError::Shape(format!(
                "U-Net backbone must keep spatial layout, got {:?} from {:?}",
                features, input_size
            )));
        }
        let n = input_size.len() - 2;
        let head = Conv::new(vec![1; n], features[n], out_channels);
        Ok(Self {
            backbone,
            input_size,
            out_channels,
            head,
        })
    }

    pub fn backbone(&self) -> &dyn Module {
        &*self.backbone
    }

    pub fn input_size(&self) -> &[usize] {
        &self.input_size
    }
}

impl Module for UNet {
    fn name(&self) -> String {
        format!("UNet({} => {} channels)", self.backbone.name(), self.out_channels)
    }

    fn parameters(&self) -> Vec<Param> {
        let mut params = self.backbone.parameters();
        params.extend(self.head.parameters());
        params
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.len() != self.input_size.len() {
            return Err(shape_err(
                &self.name(),
                format!("expected {} dims, got {:?}", self.input_size.len(), input),
            ));
        }
        self.backbone.output_shape(input)?;
        let n = input.len() - 2;
        let mut out = input.to_vec();
        out[n] = self.out_channels;
        Ok(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_shapes() {
        let conv = Conv::new(vec![3, 3], 3, 8);
        assert_eq!(conv.output_shape(&[256, 256, 3, 1]).unwrap(), vec![256, 256, 8, 1]);
        assert!(conv.output_shape(&[256, 256, 1, 1]).is_err());

        let strided = Conv::with_stride(vec![3, 3], 3, 8, 2);
        assert_eq!(strided.output_shape(&[256, 256, 3, 1]).unwrap(), vec![128, 128, 8, 1]);
    }

    #[test]
    fn test_pool_flatten() {
        assert_eq!(AdaptiveMeanPool.output_shape(&[7, 7, 64, 2]).unwrap(), vec![1, 1, 64, 2]);
        assert_eq!(Flatten.output_shape(&[1, 1, 64, 2]).unwrap(), vec![64, 2]);
    }

    #[test]
    fn test_tabular_embeddings() {
        let emb = TabularEmbeddings::new(vec![Embedding::new(3, 2), Embedding::new(10, 6)], 0.0);
        assert_eq!(emb.output_shape(&[2, 4]).unwrap(), vec![8, 4]);
        assert!(emb.output_shape(&[3, 4]).is_err());
        assert_eq!(emb.parameters().len(), 2);
    }

    #[test]
    fn test_unet_keeps_spatial_size() {
        let backbone = Box::new(Conv::with_stride(vec![3, 3], 3, 16, 2));
        let unet = UNet::new(backbone, vec![256, 256, 3, 1], 5).unwrap();
        assert_eq!(unet.output_shape(&[256, 256, 3, 1]).unwrap(), vec![256, 256, 5, 1]);
        assert_eq!(unet.parameters().len(), 4);
    }
}
