//! Parameter grouping for discriminative learning rates and freezing.
//!
//! A `Grouper` partitions the trainable parameters of a model into numbered
//! groups. Groups are numbered from 1; by convention group 1 is the backbone
//! and the highest group is the head.

use crate::model::{trainable_parameters, Module, ParamId};
use crate::{BlockwiseError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Range;

/// Assignment of parameters to numbered groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamGroups {
    groups: BTreeMap<usize, BTreeSet<ParamId>>,
    index: HashMap<ParamId, usize>,
}

impl ParamGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `group` without assigning parameters to it.
    ///
    /// Declared groups take part in factor assignment even when empty, so a
    /// head without trainable parameters still keeps its own group id.
    pub fn declare(&mut self, group: usize) {
        self.groups.entry(group).or_default();
    }

    /// Highest declared group id.
    #[inline]
    pub fn last_group(&self) -> Option<usize> {
        self.groups.keys().next_back().copied()
    }

    /// Assign `param` to `group`.
    ///
    /// Fails if the parameter already belongs to a different group.
    pub fn insert(&mut self, group: usize, param: ParamId) -> Result<()> {
        match self.index.get(&param) {
            Some(&existing) if existing != group => Err(BlockwiseError::InvalidParameter(format!(
                "{} is assigned to both group {} and group {}",
                param, existing, group
            ))),
            Some(_) => Ok(()),
            None => {
                self.index.insert(param, group);
                self.groups.entry(group).or_default().insert(param);
                Ok(())
            }
        }
    }

    /// Group containing `param`, if any.
    #[inline]
    pub fn group_of(&self, param: ParamId) -> Option<usize> {
        self.index.get(&param).copied()
    }

    /// Parameters of `group`.
    pub fn group(&self, group: usize) -> Option<&BTreeSet<ParamId>> {
        self.groups.get(&group)
    }

    /// Declared group ids in ascending order, including empty groups.
    pub fn group_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeSet<ParamId>)> {
        self.groups.iter().map(|(&g, params)| (g, params))
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of grouped parameters.
    pub fn num_params(&self) -> usize {
        self.index.len()
    }

    /// Fail with `UngroupedParameter` unless every trainable parameter of
    /// `model` belongs to a group.
    pub fn ensure_covers(&self, model: &dyn Module) -> Result<()> {
        match trainable_parameters(model)
            .into_iter()
            .find(|p| !self.index.contains_key(&p.id))
        {
            Some(param) => Err(BlockwiseError::UngroupedParameter { param: param.id }),
            None => Ok(()),
        }
    }
}

/// Partitions a model's parameters into groups.
pub trait Grouper: fmt::Debug {
    fn group(&self, model: &dyn Module) -> Result<ParamGroups>;
}

/// Groups the layers of a sequential model by index.
///
/// `groups[i]` lists the 0-based layer indices of group `i + 1`. Layer
/// indices start at 0 while group ids start at 1, so splitting three layers
/// into "layers 1 and 2" and "layer 3" is written `[[0, 1], [2]]` and yields
/// groups 1 and 2. Every entry declares its group, even one whose layers
/// have no trainable parameters.
///
/// # Examples
///
/// ```
/// use blockwise::model::{Dense, Sequential};
/// use blockwise::{Grouper, IndexGrouper};
///
/// let model = Sequential::new(vec![
///     Box::new(Dense::new(8, 8)),
///     Box::new(Dense::new(8, 8)),
///     Box::new(Dense::new(8, 2)),
/// ]);
/// let groups = IndexGrouper::new(vec![vec![0, 1], vec![2]]).group(&model).unwrap();
/// assert_eq!(groups.len(), 2);
/// assert_eq!(groups.group(1).unwrap().len(), 4);
/// assert_eq!(groups.last_group(), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGrouper {
    groups: Vec<Vec<usize>>,
}

impl IndexGrouper {
    pub fn new(groups: Vec<Vec<usize>>) -> Self {
        Self { groups }
    }

    /// Build from contiguous layer ranges.
    pub fn from_ranges(ranges: Vec<Range<usize>>) -> Self {
        Self::new(ranges.into_iter().map(|r| r.collect()).collect())
    }

    #[inline]
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }
}

impl Grouper for IndexGrouper {
    fn group(&self, model: &dyn Module) -> Result<ParamGroups> {
        let seq = model.as_sequential().ok_or_else(|| {
            BlockwiseError::GrouperResolution(format!(
                "IndexGrouper needs a sequential model, got {}",
                model.name()
            ))
        })?;
        let layers = seq.layers();

        let mut groups = ParamGroups::new();
        for (i, indices) in self.groups.iter().enumerate() {
            groups.declare(i + 1);
            for &index in indices {
                let layer = layers.get(index).ok_or_else(|| {
                    BlockwiseError::InvalidParameter(format!(
                        "layer index {} out of range for a model with {} layers",
                        index,
                        layers.len()
                    ))
                })?;
                for param in trainable_parameters(&**layer) {
                    groups.insert(i + 1, param.id)?;
                }
            }
        }
        Ok(groups)
    }
}

/// Grouper used when the caller supplies none.
///
/// All layers but the last form group 1 and the last layer forms group 2.
/// Only plain sequential models with at least two layers can be grouped
/// this way.
pub fn default_grouper(model: &dyn Module) -> Result<IndexGrouper> {
    let seq = model.as_sequential().ok_or_else(|| {
        BlockwiseError::GrouperResolution(format!(
            "cannot derive parameter groups for {}: it is not a sequential model, pass an explicit grouper",
            model.name()
        ))
    })?;
    let n = seq.len();
    if n < 2 {
        return Err(BlockwiseError::GrouperResolution(format!(
            "cannot split a sequential model with {} layer(s) into backbone and head, pass an explicit grouper",
            n
        )));
    }
    Ok(IndexGrouper::from_ranges(vec![0..n - 1, n - 1..n]))
}

/// Group `model` with `grouper`, or with the default grouper if none is given.
pub fn resolve_groups(grouper: Option<&dyn Grouper>, model: &dyn Module) -> Result<ParamGroups> {
    match grouper {
        Some(g) => g.group(model),
        None => default_grouper(model)?.group(model),
    }
}
