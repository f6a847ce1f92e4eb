//! Optimizers and the discriminative learning-rate wrapper.
//!
//! Optimizers update raw parameter values in place. They receive the step
//! size from the caller on every update, which lets a schedule drive the
//! learning rate and lets `DiscriminativeLRs` rescale it per parameter
//! group before the base optimizer sees it.

use crate::grouper::ParamGroups;
use crate::model::ParamId;
use crate::{BlockwiseError, Result};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Trait for optimization algorithms.
pub trait Optimizer: fmt::Debug + Send + Sync {
    fn name(&self) -> String;

    /// Update `values` of `param` from `grads` with step size `lr`.
    fn apply(&mut self, param: ParamId, values: &mut [f32], grads: &[f32], lr: f64) -> Result<()>;

    /// Multiplier applied to the learning rate of `param`.
    fn lr_factor(&self, _param: ParamId) -> Result<f64> {
        Ok(1.0)
    }

    /// Clone into a new box.
    fn box_clone(&self) -> Box<dyn Optimizer>;

    /// Get reference as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Optimizer> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

fn check_lengths(param: ParamId, values: &[f32], grads: &[f32]) -> Result<()> {
    if values.len() != grads.len() {
        return Err(BlockwiseError::Shape(format!(
            "{}: {} values but {} gradients",
            param,
            values.len(),
            grads.len()
        )));
    }
    Ok(())
}

/// Plain gradient descent.
#[derive(Debug, Clone, Default)]
pub struct Descent;

impl Optimizer for Descent {
    fn name(&self) -> String {
        "Descent".to_string()
    }

    fn apply(&mut self, param: ParamId, values: &mut [f32], grads: &[f32], lr: f64) -> Result<()> {
        check_lengths(param, values, grads)?;
        let lr = lr as f32;
        for (v, g) in values.iter_mut().zip(grads) {
            *v -= lr * g;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Gradient descent with momentum.
///
/// `v = rho * v - lr * g; x = x + v`
#[derive(Debug, Clone)]
pub struct Momentum {
    rho: f64,
    velocities: HashMap<ParamId, Vec<f32>>,
}

impl Momentum {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            velocities: HashMap::new(),
        }
    }

    #[inline]
    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn velocity(&self, param: ParamId) -> Option<&[f32]> {
        self.velocities.get(&param).map(Vec::as_slice)
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl Optimizer for Momentum {
    fn name(&self) -> String {
        format!("Momentum(rho={})", self.rho)
    }

    fn apply(&mut self, param: ParamId, values: &mut [f32], grads: &[f32], lr: f64) -> Result<()> {
        check_lengths(param, values, grads)?;
        let velocity = self
            .velocities
            .entry(param)
            .or_insert_with(|| vec![0.0; grads.len()]);
        if velocity.len() != grads.len() {
            return Err(BlockwiseError::Shape(format!(
                "{}: velocity has {} entries but {} gradients were given",
                param,
                velocity.len(),
                grads.len()
            )));
        }
        let (rho, lr) = (self.rho as f32, lr as f32);
        for ((x, v), g) in values.iter_mut().zip(velocity.iter_mut()).zip(grads) {
            *v = rho * *v - lr * g;
            *x += *v;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scales the learning rate of a base optimizer per parameter group.
///
/// Every update to `param` uses `lr * factors[group_of(param)]`. A factor
/// of zero freezes the group: its values are left untouched and the base
/// optimizer never sees the update. Updating a parameter outside every
/// group is an error.
#[derive(Debug, Clone)]
pub struct DiscriminativeLRs {
    inner: Box<dyn Optimizer>,
    groups: ParamGroups,
    factors: BTreeMap<usize, f64>,
}

impl DiscriminativeLRs {
    pub fn new(inner: Box<dyn Optimizer>, groups: ParamGroups, factors: BTreeMap<usize, f64>) -> Self {
        Self {
            inner,
            groups,
            factors,
        }
    }

    /// Freeze every group except the highest declared one.
    pub fn frozen(inner: Box<dyn Optimizer>, groups: ParamGroups) -> Self {
        let last = groups.last_group();
        let factors = groups
            .group_ids()
            .map(|g| (g, if Some(g) == last { 1.0 } else { 0.0 }))
            .collect();
        Self::new(inner, groups, factors)
    }

    /// Spread learning rates geometrically from `1 / lr_mult` for the first
    /// group to 1 for the last one.
    pub fn discriminative(inner: Box<dyn Optimizer>, groups: ParamGroups, lr_mult: f64) -> Self {
        let ids: Vec<usize> = groups.group_ids().collect();
        let n = ids.len();
        let factors = ids
            .iter()
            .enumerate()
            .map(|(i, &g)| {
                let factor = if n < 2 {
                    1.0
                } else {
                    let distance = (n - 1 - i) as f64 / (n - 1) as f64;
                    lr_mult.powf(-distance)
                };
                (g, factor)
            })
            .collect();
        Self::new(inner, groups, factors)
    }

    #[inline]
    pub fn inner(&self) -> &dyn Optimizer {
        &*self.inner
    }

    /// Unwrap into the base optimizer.
    pub fn into_inner(self) -> Box<dyn Optimizer> {
        self.inner
    }

    #[inline]
    pub fn groups(&self) -> &ParamGroups {
        &self.groups
    }

    #[inline]
    pub fn factors(&self) -> &BTreeMap<usize, f64> {
        &self.factors
    }
}

impl Optimizer for DiscriminativeLRs {
    fn name(&self) -> String {
        format!("DiscriminativeLRs({})", self.inner.name())
    }

    fn apply(&mut self, param: ParamId, values: &mut [f32], grads: &[f32], lr: f64) -> Result<()> {
        let factor = self.lr_factor(param)?;
        if factor == 0.0 {
            return check_lengths(param, values, grads);
        }
        self.inner.apply(param, values, grads, lr * factor)
    }

    fn lr_factor(&self, param: ParamId) -> Result<f64> {
        let group = self
            .groups
            .group_of(param)
            .ok_or(BlockwiseError::UngroupedParameter { param })?;
        self.factors.get(&group).copied().ok_or_else(|| {
            BlockwiseError::InvalidParameter(format!("no learning rate factor for group {}", group))
        })
    }

    fn box_clone(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Base optimizer of `optimizer`, stripping `DiscriminativeLRs` wrappers.
pub fn base_optimizer(optimizer: &dyn Optimizer) -> Box<dyn Optimizer> {
    match optimizer.as_any().downcast_ref::<DiscriminativeLRs>() {
        Some(wrapper) => base_optimizer(wrapper.inner()),
        None => optimizer.box_clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_groups() -> (ParamGroups, ParamId, ParamId) {
        let backbone = ParamId::new();
        let head = ParamId::new();
        let mut groups = ParamGroups::new();
        groups.insert(1, backbone).unwrap();
        groups.insert(2, head).unwrap();
        (groups, backbone, head)
    }

    #[test]
    fn test_descent() {
        let mut opt = Descent;
        let mut values = vec![1.0, 2.0];
        opt.apply(ParamId::new(), &mut values, &[1.0, -1.0], 0.5).unwrap();
        assert_eq!(values, vec![0.5, 2.5]);
        assert!(opt.apply(ParamId::new(), &mut values, &[1.0], 0.5).is_err());
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut opt = Momentum::new(0.5);
        let id = ParamId::new();
        let mut values = vec![0.0];
        opt.apply(id, &mut values, &[1.0], 1.0).unwrap();
        assert_relative_eq!(values[0], -1.0);
        opt.apply(id, &mut values, &[1.0], 1.0).unwrap();
        // v = 0.5 * -1 - 1
        assert_relative_eq!(values[0], -2.5);
        assert_relative_eq!(opt.velocity(id).unwrap()[0], -1.5);
    }

    #[test]
    fn test_frozen_factors() {
        let (groups, backbone, head) = two_groups();
        let mut opt = DiscriminativeLRs::frozen(Box::new(Descent), groups);
        assert_eq!(opt.lr_factor(backbone).unwrap(), 0.0);
        assert_eq!(opt.lr_factor(head).unwrap(), 1.0);

        let mut values = vec![1.0];
        opt.apply(backbone, &mut values, &[1.0], 0.1).unwrap();
        assert_eq!(values, vec![1.0]);
        opt.apply(head, &mut values, &[1.0], 0.1).unwrap();
        assert_relative_eq!(values[0], 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_discriminative_factors() {
        let (groups, backbone, head) = two_groups();
        let opt = DiscriminativeLRs::discriminative(Box::new(Descent), groups, 10.0);
        assert_relative_eq!(opt.lr_factor(backbone).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(opt.lr_factor(head).unwrap(), 1.0);
    }

    #[test]
    fn test_three_groups_are_spread_geometrically() {
        let mut groups = ParamGroups::new();
        let ids: Vec<ParamId> = (0..3).map(|_| ParamId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            groups.insert(i + 1, *id).unwrap();
        }
        let opt = DiscriminativeLRs::discriminative(Box::new(Descent), groups, 100.0);
        assert_relative_eq!(opt.lr_factor(ids[0]).unwrap(), 0.01, epsilon = 1e-12);
        assert_relative_eq!(opt.lr_factor(ids[1]).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(opt.lr_factor(ids[2]).unwrap(), 1.0);
    }

    #[test]
    fn test_ungrouped_parameter() {
        let (groups, _, _) = two_groups();
        let mut opt = DiscriminativeLRs::frozen(Box::new(Descent), groups);
        let stray = ParamId::new();
        let err = opt.apply(stray, &mut [0.0], &[1.0], 0.1).unwrap_err();
        match err {
            BlockwiseError::UngroupedParameter { param } => assert_eq!(param, stray),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_base_optimizer_unwraps() {
        let (groups, _, _) = two_groups();
        let wrapped = DiscriminativeLRs::frozen(Box::new(Momentum::new(0.8)), groups.clone());
        let twice = DiscriminativeLRs::discriminative(Box::new(wrapped), groups, 10.0);
        assert_eq!(base_optimizer(&twice).name(), "Momentum(rho=0.8)");
    }

    #[test]
    fn test_empty_head_group_keeps_backbone_frozen() {
        let backbone = ParamId::new();
        let mut groups = ParamGroups::new();
        groups.insert(1, backbone).unwrap();
        groups.declare(2);

        let mut opt = DiscriminativeLRs::frozen(Box::new(Descent), groups.clone());
        assert_eq!(opt.factors().get(&1), Some(&0.0));
        assert_eq!(opt.factors().get(&2), Some(&1.0));
        let mut values = vec![0.0, 0.0];
        opt.apply(backbone, &mut values, &[1.0, 1.0], 0.1).unwrap();
        assert_eq!(values, vec![0.0, 0.0]);

        let opt = DiscriminativeLRs::discriminative(Box::new(Descent), groups, 10.0);
        assert_relative_eq!(opt.lr_factor(backbone).unwrap(), 0.1, epsilon = 1e-12);
    }
}
