//! Per-level IV specification and condition generation.

use std::collections::BTreeSet;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Condition, Data, RngHandle, Value, DESIGN_IV};
use serde::{Deserialize, Serialize};

use crate::order::{Ordering, SyntheticIv};

/// A named independent variable with its possible levels.
///
/// An empty level list marks a continuous IV whose values come straight from
/// a design matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iv {
    /// IV name, unique within a design.
    pub name: String,
    /// Declared levels; empty for a continuous IV.
    pub values: Vec<Value>,
}

impl Iv {
    /// Creates an IV with enumerable levels.
    pub fn new<V: Into<Value>>(name: impl Into<String>, values: Vec<V>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a continuous IV.
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Whether the IV has no enumerable levels.
    pub fn is_continuous(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<SyntheticIv> for Iv {
    fn from(iv: SyntheticIv) -> Self {
        Self {
            name: iv.name,
            values: iv.values,
        }
    }
}

/// IV specification of one level together with its ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    iv_names: Vec<String>,
    iv_values: Vec<Vec<Value>>,
    #[serde(default)]
    design_matrix: Option<Vec<Vec<Value>>>,
    ordering: Ordering,
    #[serde(default)]
    extra_data: Data,
    declared_ivs: usize,
    #[serde(default)]
    initialized: bool,
}

impl Design {
    /// Creates a design from IVs, an optional design matrix and an ordering.
    ///
    /// Without an explicit ordering, designs with a matrix keep the matrix row
    /// order and all others are shuffled.
    pub fn new(
        ivs: Vec<Iv>,
        design_matrix: Option<Vec<Vec<Value>>>,
        ordering: Option<Ordering>,
        extra_data: Data,
    ) -> Result<Self, ExptError> {
        let mut seen = BTreeSet::new();
        for iv in &ivs {
            if !seen.insert(iv.name.as_str()) {
                return Err(ExptError::Spec(
                    ErrorInfo::new("iv-duplicate", "IV names must be unique within a design")
                        .with_context("iv", iv.name.clone()),
                ));
            }
        }
        match &design_matrix {
            Some(matrix) => check_matrix_width(matrix, ivs.len())?,
            None => {
                if let Some(iv) = ivs.iter().find(|iv| iv.is_continuous()) {
                    return Err(ExptError::Spec(
                        ErrorInfo::new(
                            "continuous-iv-without-matrix",
                            "a continuous IV requires a design matrix",
                        )
                        .with_context("iv", iv.name.clone())
                        .with_hint("declare levels for the IV or supply design_matrix"),
                    ));
                }
            }
        }
        let ordering = match ordering {
            Some(ordering) => ordering,
            None if design_matrix.is_some() => Ordering::identity(1)?,
            None => Ordering::shuffle(1, false)?,
        };
        let declared_ivs = ivs.len();
        let (iv_names, iv_values) = ivs.into_iter().map(|iv| (iv.name, iv.values)).unzip();
        Ok(Self {
            iv_names,
            iv_values,
            design_matrix,
            ordering,
            extra_data,
            declared_ivs,
            initialized: false,
        })
    }

    /// Creates a fully crossed design without extra data.
    pub fn crossed(ivs: Vec<Iv>, ordering: Ordering) -> Result<Self, ExptError> {
        Self::new(ivs, None, Some(ordering), Data::new())
    }

    /// Creates a design without IVs producing `ordering.number()` identical sections.
    pub fn empty(ordering: Ordering) -> Result<Self, ExptError> {
        Self::crossed(Vec::new(), ordering)
    }

    /// IV names in declaration order, synthetic IVs last.
    pub fn iv_names(&self) -> &[String] {
        &self.iv_names
    }

    /// IV levels aligned with [`Design::iv_names`].
    pub fn iv_values(&self) -> &[Vec<Value>] {
        &self.iv_values
    }

    /// Optional design matrix.
    pub fn design_matrix(&self) -> Option<&[Vec<Value>]> {
        self.design_matrix.as_deref()
    }

    /// Ordering strategy of this design.
    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    /// Data merged into every condition.
    pub fn extra_data(&self) -> &Data {
        &self.extra_data
    }

    /// Whether the design selects heterogeneous sub-trees.
    pub fn is_heterogeneous(&self) -> bool {
        self.iv_names.iter().any(|name| name == DESIGN_IV)
    }

    /// Branch names selected by the `design` IV.
    pub fn branches(&self) -> Vec<Value> {
        self.iv_names
            .iter()
            .position(|name| name == DESIGN_IV)
            .map(|idx| self.iv_values[idx].clone())
            .unwrap_or_default()
    }

    /// Adds IVs produced by non-atomic orderings one level below.
    pub fn update(&mut self, ivs: Vec<Iv>) -> Result<(), ExptError> {
        if self.initialized {
            return Err(ExptError::State(
                ErrorInfo::new("design-update-after-first-pass", "design already initialized")
                    .with_context("ivs", self.iv_names.join(",")),
            ));
        }
        for iv in ivs {
            if self.iv_names.contains(&iv.name) {
                return Err(ExptError::Spec(
                    ErrorInfo::new("iv-duplicate", "IV names must be unique within a design")
                        .with_context("iv", iv.name),
                ));
            }
            self.iv_names.push(iv.name);
            self.iv_values.push(iv.values);
        }
        Ok(())
    }

    /// Generates the unique conditions and initializes the ordering.
    pub fn first_pass(&mut self, rng: &mut RngHandle) -> Result<Option<SyntheticIv>, ExptError> {
        if self.initialized {
            return Err(ExptError::State(ErrorInfo::new(
                "design-first-pass-repeated",
                "first pass already ran for this design",
            )));
        }
        let conditions = match &self.design_matrix {
            Some(matrix) => {
                let rows = self.parse_design_matrix(matrix)?;
                let synthetic = full_cross(
                    &self.iv_names[self.declared_ivs..],
                    &self.iv_values[self.declared_ivs..],
                );
                rows.iter()
                    .flat_map(|row| {
                        synthetic.iter().map(move |extra| {
                            let mut condition = row.clone();
                            condition.extend(extra.clone());
                            condition
                        })
                    })
                    .collect()
            }
            None => full_cross(&self.iv_names, &self.iv_values),
        };
        let synthetic = self.ordering.first_pass(conditions, rng)?;
        self.initialized = true;
        Ok(synthetic)
    }

    /// Returns the ordered conditions for one section with extra data merged in.
    pub fn get_order(&self, context: &Data, rng: &mut RngHandle) -> Result<Vec<Condition>, ExptError> {
        if !self.initialized {
            return Err(ExptError::State(ErrorInfo::new(
                "design-not-initialized",
                "design queried before its first pass",
            )));
        }
        let mut order = self.ordering.get_order(context, rng)?;
        for condition in &mut order {
            for (key, value) in &self.extra_data {
                condition.insert(key.clone(), value.clone());
            }
        }
        Ok(order)
    }

    /// Maps design-matrix rows onto the declared IVs.
    ///
    /// Each column's distinct values map by rank onto the IV's declared
    /// levels; continuous IVs take the raw value.
    pub fn parse_design_matrix(&self, matrix: &[Vec<Value>]) -> Result<Vec<Condition>, ExptError> {
        check_matrix_width(matrix, self.declared_ivs)?;
        let mut columns = Vec::with_capacity(self.declared_ivs);
        for (col, (name, levels)) in self
            .iv_names
            .iter()
            .zip(&self.iv_values)
            .take(self.declared_ivs)
            .enumerate()
        {
            let distinct: Vec<&Value> = matrix
                .iter()
                .map(|row| &row[col])
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !levels.is_empty() && levels.len() != distinct.len() {
                return Err(ExptError::Spec(
                    ErrorInfo::new(
                        "design-matrix-levels",
                        "distinct values in a design matrix column must match the IV levels",
                    )
                    .with_context("iv", name.clone())
                    .with_context("levels", levels.len().to_string())
                    .with_context("distinct", distinct.len().to_string()),
                ));
            }
            columns.push(distinct);
        }
        Ok(matrix
            .iter()
            .map(|row| {
                self.iv_names
                    .iter()
                    .zip(&self.iv_values)
                    .zip(&columns)
                    .zip(row)
                    .map(|(((name, levels), distinct), raw)| {
                        let value = if levels.is_empty() {
                            raw.clone()
                        } else {
                            let rank = distinct.iter().position(|known| *known == raw).unwrap_or(0);
                            levels[rank].clone()
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .collect())
    }
}

fn check_matrix_width(matrix: &[Vec<Value>], ivs: usize) -> Result<(), ExptError> {
    match matrix.iter().find(|row| row.len() != ivs) {
        Some(row) => Err(ExptError::Spec(
            ErrorInfo::new(
                "design-matrix-columns",
                "design matrix column count must equal the number of IVs",
            )
            .with_context("ivs", ivs.to_string())
            .with_context("columns", row.len().to_string()),
        )),
        None => Ok(()),
    }
}

/// Cartesian product of IV levels with the right-most IV varying fastest.
///
/// No IVs yield a single empty condition.
pub fn full_cross(names: &[String], values: &[Vec<Value>]) -> Vec<Condition> {
    let mut conditions = vec![Condition::new()];
    for (name, levels) in names.iter().zip(values) {
        conditions = conditions
            .into_iter()
            .flat_map(|partial| {
                levels.iter().map(move |level| {
                    let mut condition = partial.clone();
                    condition.insert(name.clone(), level.clone());
                    condition
                })
            })
            .collect();
    }
    conditions
}
