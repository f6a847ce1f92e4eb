//! TableRow - A row of a table with categorical and continuous columns.

use crate::block::{Block, BlockKind};
use crate::block_config::BlockConfig;
use crate::check::{CheckFailure, CheckReport};
use crate::obs::Obs;
use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;
use std::collections::BTreeMap;

/// A table row with `M` categorical and `N` continuous columns.
///
/// `categorydict` maps each categorical column to its known categories.
/// Any cell may be `Obs::Missing`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    catcols: Vec<String>,
    contcols: Vec<String>,
    categorydict: BTreeMap<String, Vec<Obs>>,
}

impl TableRow {
    /// Create a table row block.
    ///
    /// Fails if a categorical column has no entry in `categorydict`.
    pub fn new(
        catcols: Vec<String>,
        contcols: Vec<String>,
        categorydict: BTreeMap<String, Vec<Obs>>,
    ) -> Result<Self> {
        if let Some(col) = catcols.iter().find(|c| !categorydict.contains_key(*c)) {
            return Err(BlockwiseError::InvalidParameter(format!(
                "categorical column {:?} has no categorydict entry",
                col
            )));
        }
        Ok(Self {
            catcols,
            contcols,
            categorydict,
        })
    }

    /// Infer `categorydict` by scanning rows once.
    ///
    /// Categories are recorded in first-occurrence order; missing cells are
    /// skipped.
    pub fn setup_table<I>(rows: I, catcols: Vec<String>, contcols: Vec<String>) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        let mut categorydict: BTreeMap<String, Vec<Obs>> =
            catcols.iter().map(|c| (c.clone(), Vec::new())).collect();

        for (i, row) in rows.into_iter().enumerate() {
            let row = row.into();
            let Obs::Row(cells) = row else {
                return Err(BlockwiseError::InvalidParameter(format!(
                    "observation {} is a {}, expected a row",
                    i,
                    row.type_name()
                )));
            };
            for col in &catcols {
                match cells.get(col) {
                    None | Some(Obs::Missing) => {}
                    Some(value) => {
                        let categories = categorydict.entry(col.clone()).or_default();
                        if !categories.contains(value) {
                            categories.push(value.clone());
                        }
                    }
                }
            }
        }

        Self::new(catcols, contcols, categorydict)
    }

    #[inline]
    pub fn catcols(&self) -> &[String] {
        &self.catcols
    }

    #[inline]
    pub fn contcols(&self) -> &[String] {
        &self.contcols
    }

    #[inline]
    pub fn categorydict(&self) -> &BTreeMap<String, Vec<Obs>> {
        &self.categorydict
    }

    /// Number of known categories per categorical column, in column order.
    pub fn cardinalities(&self) -> Vec<usize> {
        self.catcols
            .iter()
            .map(|c| self.categorydict.get(c).map_or(0, Vec::len))
            .collect()
    }
}

impl Block for TableRow {
    fn kind(&self) -> BlockKind {
        BlockKind::TableRow
    }

    fn type_name(&self) -> String {
        format!(
            "TableRow{{{},{}}}",
            self.catcols.len(),
            self.contcols.len()
        )
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(cells) = obs.as_row() else {
            return CheckReport::fail(
                name,
                CheckFailure::WrongType {
                    expected: "row".to_string(),
                    found: obs.type_name().to_string(),
                },
            );
        };

        for col in &self.catcols {
            let Some(value) = cells.get(col) else {
                return CheckReport::fail(name, CheckFailure::MissingColumn { column: col.clone() });
            };
            if matches!(value, Obs::Missing) {
                continue;
            }
            let known = self.categorydict.get(col).is_some_and(|c| c.contains(value));
            if !known {
                return CheckReport::fail(
                    name,
                    CheckFailure::InvalidColumn {
                        column: col.clone(),
                        reason: format!("unknown category {}", value),
                    },
                );
            }
        }

        for col in &self.contcols {
            match cells.get(col) {
                None => {
                    return CheckReport::fail(name, CheckFailure::MissingColumn { column: col.clone() })
                }
                Some(Obs::Missing) => {}
                Some(value) if value.is_numeric() => {}
                Some(value) => {
                    return CheckReport::fail(
                        name,
                        CheckFailure::InvalidColumn {
                            column: col.clone(),
                            reason: format!("expected a number, found {}", value.type_name()),
                        },
                    )
                }
            }
        }

        CheckReport::pass(name)
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        let mut cells = BTreeMap::new();
        for col in &self.catcols {
            let value = match self.categorydict.get(col) {
                Some(categories) if !categories.is_empty() => {
                    categories[rng.gen_range(0..categories.len())].clone()
                }
                _ => Obs::Missing,
            };
            cells.insert(col.clone(), value);
        }
        for col in &self.contcols {
            cells.insert(col.clone(), Obs::Float(rng.gen::<f64>()));
        }
        Obs::Row(cells)
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::TableRow {
            catcols: self.catcols.clone(),
            contcols: self.contcols.clone(),
            categorydict: self.categorydict.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
