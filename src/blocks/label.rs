//! Label and LabelMulti - Categorical targets.
//!
//! `Label` describes a single categorical value drawn from an ordered set of
//! classes; `LabelMulti` describes a (possibly empty) set of such values.
//!
//! # Examples
//!
//! ```
//! use blockwise::blocks::{Label, LabelMulti};
//! use blockwise::{Block, Obs, Setup};
//!
//! let block = Label::setup(["cat", "dog", "dog", "dog", "cat", "dog"]).unwrap();
//! assert_eq!(block.classes(), &[Obs::from("cat"), Obs::from("dog")]);
//! assert!(block.check(&Obs::from("cat")));
//! assert!(!block.check(&Obs::from("horsey")));
//!
//! let multi = LabelMulti::new(["cat", "dog", "person"]);
//! assert!(multi.check(&Obs::from(vec!["cat", "person"])));
//! assert!(!multi.check(&Obs::from("cat")));
//! ```

use crate::block::{Block, BlockKind, Setup};
use crate::block_config::BlockConfig;
use crate::check::{CheckFailure, CheckReport};
use crate::obs::Obs;
use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;

/// Append `value` to `classes` unless already present (first occurrence wins).
fn push_unique(classes: &mut Vec<Obs>, value: Obs) {
    if !classes.contains(&value) {
        classes.push(value);
    }
}

fn unique_classes<I>(classes: I) -> Vec<Obs>
where
    I: IntoIterator,
    I::Item: Into<Obs>,
{
    let mut out = Vec::new();
    for class in classes {
        push_unique(&mut out, class.into());
    }
    out
}

/// A single categorical value that must be one of `classes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    classes: Vec<Obs>,
}

impl Label {
    /// Create a label block. Duplicate classes are dropped, keeping the
    /// first occurrence.
    ///
    /// # Panics
    ///
    /// Panics if `classes` is empty.
    pub fn new<I>(classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        let classes = unique_classes(classes);
        assert!(!classes.is_empty(), "Label needs at least one class");
        Self { classes }
    }

    #[inline]
    pub fn classes(&self) -> &[Obs] {
        &self.classes
    }

    /// Position of `value` in the class list.
    pub fn class_index(&self, value: &Obs) -> Option<usize> {
        self.classes.iter().position(|c| c == value)
    }
}

impl Block for Label {
    fn kind(&self) -> BlockKind {
        BlockKind::Label
    }

    fn type_name(&self) -> String {
        format!("Label({} classes)", self.classes.len())
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        if !obs.is_scalar() {
            return CheckReport::fail(
                name,
                CheckFailure::WrongType {
                    expected: "categorical value".to_string(),
                    found: obs.type_name().to_string(),
                },
            );
        }
        if !self.classes.contains(obs) {
            return CheckReport::fail(
                name,
                CheckFailure::NotInClasses {
                    value: obs.to_string(),
                },
            );
        }
        CheckReport::pass(name)
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        let i = rng.gen_range(0..self.classes.len());
        self.classes[i].clone()
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::Label {
            classes: self.classes.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Setup for Label {
    /// Classes are the unique values seen, in first-occurrence order.
    fn setup<I>(data: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        let mut classes = Vec::new();
        for (i, obs) in data.into_iter().enumerate() {
            let obs = obs.into();
            if !obs.is_scalar() {
                return Err(BlockwiseError::InvalidParameter(format!(
                    "observation {} is a {}, expected a categorical value",
                    i,
                    obs.type_name()
                )));
            }
            push_unique(&mut classes, obs);
        }
        if classes.is_empty() {
            return Err(BlockwiseError::InvalidParameter(
                "cannot set up Label from empty data".to_string(),
            ));
        }
        Ok(Self { classes })
    }
}

/// A set of categorical values, each of which must be one of `classes`.
///
/// Observations are sequences; a bare value is not treated as a sequence of
/// length one. The empty sequence is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMulti {
    classes: Vec<Obs>,
}

impl LabelMulti {
    pub fn new<I>(classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        Self {
            classes: unique_classes(classes),
        }
    }

    #[inline]
    pub fn classes(&self) -> &[Obs] {
        &self.classes
    }
}

impl Block for LabelMulti {
    fn kind(&self) -> BlockKind {
        BlockKind::LabelMulti
    }

    fn type_name(&self) -> String {
        format!("LabelMulti({} classes)", self.classes.len())
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(items) = obs.as_seq() else {
            return CheckReport::fail(
                name,
                CheckFailure::WrongType {
                    expected: "sequence of categorical values".to_string(),
                    found: obs.type_name().to_string(),
                },
            );
        };

        let mut unknown: Vec<Obs> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if !item.is_scalar() {
                return CheckReport::fail(
                    name,
                    CheckFailure::WrongElementType {
                        index,
                        expected: "categorical value".to_string(),
                        found: item.type_name().to_string(),
                    },
                );
            }
            if !self.classes.contains(item) {
                push_unique(&mut unknown, item.clone());
            }
        }

        if unknown.is_empty() {
            CheckReport::pass(name)
        } else {
            CheckReport::fail(
                name,
                CheckFailure::UnknownMembers {
                    members: unknown.iter().map(ToString::to_string).collect(),
                },
            )
        }
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        let members = self
            .classes
            .iter()
            .filter(|_| rng.gen_bool(0.5))
            .cloned()
            .collect();
        Obs::Seq(members)
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::LabelMulti {
            classes: self.classes.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Setup for LabelMulti {
    /// Classes are the unique members across all sequences, in
    /// first-occurrence order.
    fn setup<I>(data: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        let mut classes = Vec::new();
        for (i, obs) in data.into_iter().enumerate() {
            let obs = obs.into();
            let Obs::Seq(items) = obs else {
                return Err(BlockwiseError::InvalidParameter(format!(
                    "observation {} is a {}, expected a sequence of labels",
                    i,
                    obs.type_name()
                )));
            };
            for item in items {
                push_unique(&mut classes, item);
            }
        }
        Ok(Self { classes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_label_setup_first_occurrence_order() {
        let block = Label::setup(["cat", "dog", "dog", "dog", "cat", "dog"]).unwrap();
        assert_eq!(block.classes(), &[Obs::from("cat"), Obs::from("dog")]);

        let again = Label::setup(["cat", "dog", "dog", "dog", "cat", "dog"]).unwrap();
        assert_eq!(block, again);
    }

    #[test]
    fn test_label_setup_rejects_sequences() {
        let data = vec![Obs::from("cat"), Obs::from(vec!["dog"])];
        assert!(Label::setup(data).is_err());
        assert!(Label::setup(Vec::<Obs>::new()).is_err());
    }

    #[test]
    fn test_label_check() {
        let block = Label::new(["cat", "dog"]);
        assert!(block.check(&Obs::from("cat")));
        assert!(!block.check(&Obs::from("horsey")));

        let report = block.diagnose(&Obs::from("horsey"));
        assert!(matches!(report.failure, Some(CheckFailure::NotInClasses { .. })));

        let report = block.diagnose(&Obs::from(vec!["cat"]));
        assert!(matches!(report.failure, Some(CheckFailure::WrongType { .. })));
    }

    #[test]
    fn test_label_numeric_classes() {
        let block = Label::new([1, 2, 3]);
        assert!(block.check(&Obs::from(2)));
        assert!(!block.check(&Obs::from(4)));
        assert_eq!(block.class_index(&Obs::from(3)), Some(2));
    }

    #[test]
    #[should_panic(expected = "at least one class")]
    fn test_label_requires_classes() {
        let _ = Label::new(Vec::<Obs>::new());
    }

    #[test]
    fn test_label_multi_check() {
        let block = LabelMulti::new(["cat", "dog", "person"]);
        assert!(block.check(&Obs::from(vec!["cat", "person"])));
        assert!(block.check(&Obs::Seq(vec![])));
        assert!(!block.check(&Obs::from(vec!["horsey"])));
        assert!(!block.check(&Obs::from("cat")));
    }

    #[test]
    fn test_label_multi_reports_unknown_members() {
        let block = LabelMulti::new(["cat", "dog", "person"]);
        let report = block.diagnose(&Obs::from(vec!["cat", "horsey", "cow", "horsey"]));
        assert_eq!(
            report.failure,
            Some(CheckFailure::UnknownMembers {
                members: vec!["\"horsey\"".to_string(), "\"cow\"".to_string()],
            })
        );

        let report = block.diagnose(&Obs::from("cat"));
        assert!(matches!(report.failure, Some(CheckFailure::WrongType { .. })));
    }

    #[test]
    fn test_label_multi_setup() {
        let data = vec![vec!["cat"], vec!["dog", "cat"], vec![], vec!["person"]];
        let block = LabelMulti::setup(data).unwrap();
        assert_eq!(
            block.classes(),
            &[Obs::from("cat"), Obs::from("dog"), Obs::from("person")]
        );
        assert!(LabelMulti::setup(["cat"]).is_err());
    }

    #[test]
    fn test_mock_is_valid() {
        let mut rng = StdRng::seed_from_u64(3);
        let label = Label::new(["a", "b", "c"]);
        let multi = LabelMulti::new(["a", "b", "c"]);
        for _ in 0..20 {
            assert!(label.check(&label.mock(&mut rng)));
            assert!(multi.check(&multi.mock(&mut rng)));
        }
    }
}
