//! Ordering strategies turning unique conditions into concrete sequences.
//!
//! Atomic orderings (identity, shuffle, one-directional sort) are
//! self-contained. Non-atomic orderings (complete counterbalancing, sorting in
//! both directions, Latin squares) precompute a table of sequences during
//! [`Ordering::first_pass`] and publish a [`SyntheticIv`] whose values index
//! that table; a section one level up carries the chosen value in its data.

use std::collections::BTreeMap;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Condition, Data, RngHandle, Value};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::latin::{balanced_latin_square, latin_square};

/// Synthetic IV name used by complete counterbalancing.
pub const COUNTERBALANCE_IV: &str = "counterbalance_order";
/// Synthetic IV name used by sorting in both directions.
pub const SORTED_IV: &str = "sorted_order";
/// Synthetic IV name used by Latin-square orderings.
pub const LATIN_SQUARE_IV: &str = "latin_square_row";

/// Number of distinct counterbalanced orders above which an extra warning is logged.
pub const LARGE_COUNTERBALANCE: u128 = 720;

/// Synthetic IV produced by a non-atomic ordering for the level above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticIv {
    /// Name of the IV, owned by the ordering.
    pub name: String,
    /// Possible values, one per precomputed sequence.
    pub values: Vec<Value>,
}

/// Direction of a [`OrderMethod::Sorted`] ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
    /// Both directions, selected per parent section.
    #[default]
    Both,
}

impl SortOrder {
    /// Parses `ascending`, `descending` or `both` (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, ExptError> {
        match raw.to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(SortOrder::Ascending),
            "descending" | "desc" => Ok(SortOrder::Descending),
            "both" => Ok(SortOrder::Both),
            other => Err(ExptError::Spec(
                ErrorInfo::new(
                    "sort-order-unknown",
                    "sort order must be ascending, descending or both",
                )
                .with_context("order", other),
            )),
        }
    }

    fn label(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
            SortOrder::Both => "both",
        }
    }
}

/// Strategy variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OrderMethod {
    /// Fixed input order.
    Identity,
    /// Fresh random permutation on every query.
    Shuffle {
        /// Resample until no two adjacent conditions are equal.
        #[serde(default)]
        avoid_repeats: bool,
    },
    /// Every distinct permutation, chosen by the parent level.
    CompleteCounterbalance,
    /// Sorted by the single IV value.
    Sorted {
        /// Direction; `both` makes the ordering non-atomic.
        #[serde(default)]
        order: SortOrder,
    },
    /// Rows of a Latin square, chosen by the parent level.
    LatinSquare {
        /// Balance immediate-sequence transitions across rows.
        #[serde(default = "default_balanced")]
        balanced: bool,
        /// Sample uniformly among all Latin squares of the order.
        #[serde(default)]
        uniform: bool,
    },
}

fn default_balanced() -> bool {
    true
}

/// A sequencing strategy plus the state derived during the first pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    method: OrderMethod,
    number: usize,
    #[serde(default)]
    all_conditions: Vec<Condition>,
    #[serde(default)]
    orders: Vec<(Value, Vec<Condition>)>,
}

impl Ordering {
    /// Creates an ordering, validating the method's parameters.
    pub fn new(method: OrderMethod, number: usize) -> Result<Self, ExptError> {
        if number == 0 {
            return Err(ExptError::Spec(
                ErrorInfo::new("ordering-number", "ordering repeat count must be at least 1")
                    .with_context("method", method_name(&method)),
            ));
        }
        if let OrderMethod::LatinSquare {
            balanced: true,
            uniform: true,
        } = method
        {
            return Err(ExptError::Spec(
                ErrorInfo::new(
                    "latin-square-balanced-uniform",
                    "cannot create a balanced Latin square with uniform sampling",
                )
                .with_hint("set uniform: false for balanced squares"),
            ));
        }
        Ok(Self {
            method,
            number,
            all_conditions: Vec::new(),
            orders: Vec::new(),
        })
    }

    /// Fixed ordering repeating the input `number` times.
    pub fn identity(number: usize) -> Result<Self, ExptError> {
        Self::new(OrderMethod::Identity, number)
    }

    /// Random ordering.
    pub fn shuffle(number: usize, avoid_repeats: bool) -> Result<Self, ExptError> {
        Self::new(OrderMethod::Shuffle { avoid_repeats }, number)
    }

    /// Complete counterbalancing across the parent level.
    pub fn complete_counterbalance(number: usize) -> Result<Self, ExptError> {
        Self::new(OrderMethod::CompleteCounterbalance, number)
    }

    /// Sorting by the level's single IV.
    pub fn sorted(number: usize, order: SortOrder) -> Result<Self, ExptError> {
        Self::new(OrderMethod::Sorted { order }, number)
    }

    /// Latin-square counterbalancing across the parent level.
    pub fn latin_square(number: usize, balanced: bool, uniform: bool) -> Result<Self, ExptError> {
        Self::new(OrderMethod::LatinSquare { balanced, uniform }, number)
    }

    /// Strategy of this ordering.
    pub fn method(&self) -> &OrderMethod {
        &self.method
    }

    /// Repeat count.
    pub fn number(&self) -> usize {
        self.number
    }

    /// Replaces the repeat count before the first pass.
    pub fn set_number(&mut self, number: usize) -> Result<(), ExptError> {
        let rebuilt = Self::new(self.method.clone(), number)?;
        self.number = rebuilt.number;
        Ok(())
    }

    /// Whether the sequence is independent of ancestor data.
    pub fn is_atomic(&self) -> bool {
        match &self.method {
            OrderMethod::Identity | OrderMethod::Shuffle { .. } => true,
            OrderMethod::Sorted { order } => *order != SortOrder::Both,
            OrderMethod::CompleteCounterbalance | OrderMethod::LatinSquare { .. } => false,
        }
    }

    /// Name of the synthetic IV owned by this ordering, if non-atomic.
    pub fn iv_name(&self) -> Option<&'static str> {
        match &self.method {
            OrderMethod::CompleteCounterbalance => Some(COUNTERBALANCE_IV),
            OrderMethod::Sorted {
                order: SortOrder::Both,
            } => Some(SORTED_IV),
            OrderMethod::LatinSquare { .. } => Some(LATIN_SQUARE_IV),
            _ => None,
        }
    }

    /// The duplicated condition list derived during the first pass.
    pub fn all_conditions(&self) -> &[Condition] {
        &self.all_conditions
    }

    /// The precomputed sequences of a non-atomic ordering, keyed by IV value.
    pub fn orders(&self) -> &[(Value, Vec<Condition>)] {
        &self.orders
    }

    /// Derives the ordering state from the unique conditions of a level.
    ///
    /// Returns the synthetic IV for the level above when the ordering is
    /// non-atomic.
    pub fn first_pass(
        &mut self,
        conditions: Vec<Condition>,
        rng: &mut RngHandle,
    ) -> Result<Option<SyntheticIv>, ExptError> {
        match self.method.clone() {
            OrderMethod::Identity | OrderMethod::Shuffle { .. } => {
                self.all_conditions = repeat_conditions(&conditions, self.number);
                Ok(None)
            }
            OrderMethod::CompleteCounterbalance => {
                self.all_conditions = repeat_conditions(&conditions, self.number);
                let orders = Self::possible_orders(&self.all_conditions);
                let count = distinct_order_count(&self.all_conditions);
                if count.map_or(true, |count| count > LARGE_COUNTERBALANCE) {
                    warn!(
                        orders = ?count,
                        conditions = self.all_conditions.len(),
                        "complete counterbalance yields a very large number of orders"
                    );
                }
                self.orders = orders
                    .into_iter()
                    .enumerate()
                    .map(|(idx, order)| (Value::from(idx), order))
                    .collect();
                Ok(Some(self.publish(COUNTERBALANCE_IV)))
            }
            OrderMethod::Sorted { order } => {
                if let Some(wide) = conditions.iter().find(|condition| condition.len() > 1) {
                    return Err(ExptError::Spec(
                        ErrorInfo::new(
                            "sorted-multiple-ivs",
                            "sorted ordering requires exactly one IV per condition",
                        )
                        .with_context("ivs", wide.keys().cloned().collect::<Vec<_>>().join(",")),
                    ));
                }
                self.all_conditions = repeat_conditions(&conditions, self.number);
                let ascending = sort_conditions(&self.all_conditions);
                let mut descending = ascending.clone();
                descending.reverse();
                match order {
                    SortOrder::Ascending => {
                        self.orders = vec![(Value::from(order.label()), ascending)];
                        Ok(None)
                    }
                    SortOrder::Descending => {
                        self.orders = vec![(Value::from(order.label()), descending)];
                        Ok(None)
                    }
                    SortOrder::Both => {
                        self.orders = vec![
                            (Value::from(SortOrder::Ascending.label()), ascending),
                            (Value::from(SortOrder::Descending.label()), descending),
                        ];
                        Ok(Some(self.publish(SORTED_IV)))
                    }
                }
            }
            OrderMethod::LatinSquare { balanced, uniform } => {
                let order = conditions.len();
                let square = if balanced {
                    balanced_latin_square(order, rng)?
                } else {
                    latin_square(order, !uniform, uniform, !uniform, rng)
                };
                self.orders = square
                    .iter()
                    .enumerate()
                    .map(|(row_idx, row)| {
                        let sequence = row
                            .iter()
                            .flat_map(|&item| {
                                std::iter::repeat(conditions[item].clone()).take(self.number)
                            })
                            .collect();
                        (Value::from(row_idx), sequence)
                    })
                    .collect();
                self.all_conditions = conditions;
                Ok(Some(self.publish(LATIN_SQUARE_IV)))
            }
        }
    }

    fn publish(&self, name: &str) -> SyntheticIv {
        let values: Vec<Value> = self.orders.iter().map(|(value, _)| value.clone()).collect();
        warn!(iv = name, levels = values.len(), "creating synthetic IV");
        SyntheticIv {
            name: name.to_string(),
            values,
        }
    }

    /// Returns the sequence of conditions for one section.
    ///
    /// `context` is the resolved data of the parent section; non-atomic
    /// orderings read their synthetic IV from it.
    pub fn get_order(&self, context: &Data, rng: &mut RngHandle) -> Result<Vec<Condition>, ExptError> {
        match &self.method {
            OrderMethod::Identity => Ok(self.all_conditions.clone()),
            OrderMethod::Shuffle { avoid_repeats } => {
                let mut order = self.all_conditions.clone();
                order.shuffle(rng);
                while *avoid_repeats && has_adjacent_repeats(&order) {
                    order.shuffle(rng);
                }
                Ok(order)
            }
            OrderMethod::Sorted { order } if *order != SortOrder::Both => self
                .orders
                .first()
                .map(|(_, sequence)| sequence.clone())
                .ok_or_else(not_initialized),
            _ => {
                if self.orders.is_empty() {
                    return Err(not_initialized());
                }
                let name = self.iv_name().unwrap_or_default();
                let selected = context.get(name).ok_or_else(|| {
                    ExptError::State(
                        ErrorInfo::new(
                            "ordering-iv-missing",
                            "parent data does not bind the synthetic IV of this ordering",
                        )
                        .with_context("iv", name),
                    )
                })?;
                self.orders
                    .iter()
                    .find(|(value, _)| value == selected)
                    .map(|(_, sequence)| sequence.clone())
                    .ok_or_else(|| {
                        ExptError::State(
                            ErrorInfo::new("ordering-iv-unknown", "no order for the bound value")
                                .with_context("iv", name)
                                .with_context("value", selected.to_string()),
                        )
                    })
            }
        }
    }

    /// Enumerates every distinct permutation of `conditions`.
    ///
    /// Equal conditions are interchangeable, so a multiset yields each
    /// distinct sequence once. Sequences are produced in lexicographic order
    /// of first-appearance indices.
    pub fn possible_orders(conditions: &[Condition]) -> Vec<Vec<Condition>> {
        let mut classes: Vec<&Condition> = Vec::new();
        let mut indices: Vec<usize> = conditions
            .iter()
            .map(|condition| match classes.iter().position(|known| *known == condition) {
                Some(idx) => idx,
                None => {
                    classes.push(condition);
                    classes.len() - 1
                }
            })
            .collect();
        indices.sort_unstable();
        let mut orders = Vec::new();
        loop {
            orders.push(indices.iter().map(|&idx| classes[idx].clone()).collect());
            if !next_permutation(&mut indices) {
                break;
            }
        }
        orders
    }
}

fn method_name(method: &OrderMethod) -> &'static str {
    match method {
        OrderMethod::Identity => "identity",
        OrderMethod::Shuffle { .. } => "shuffle",
        OrderMethod::CompleteCounterbalance => "complete_counterbalance",
        OrderMethod::Sorted { .. } => "sorted",
        OrderMethod::LatinSquare { .. } => "latin_square",
    }
}

fn not_initialized() -> ExptError {
    ExptError::State(ErrorInfo::new(
        "ordering-not-initialized",
        "ordering queried before its first pass",
    ))
}

fn repeat_conditions(conditions: &[Condition], number: usize) -> Vec<Condition> {
    conditions
        .iter()
        .cycle()
        .take(conditions.len() * number)
        .cloned()
        .collect()
}

fn sort_key(condition: &Condition) -> Value {
    condition.values().next().cloned().unwrap_or_default()
}

fn sort_conditions(conditions: &[Condition]) -> Vec<Condition> {
    let mut sorted = conditions.to_vec();
    sorted.sort_by_key(sort_key);
    sorted
}

fn has_adjacent_repeats(order: &[Condition]) -> bool {
    order.windows(2).any(|pair| pair[0] == pair[1])
}

/// Advances `items` to the next lexicographic permutation in place.
fn next_permutation(items: &mut [usize]) -> bool {
    if items.len() < 2 {
        return false;
    }
    let mut pivot = items.len() - 1;
    while pivot > 0 && items[pivot - 1] >= items[pivot] {
        pivot -= 1;
    }
    if pivot == 0 {
        return false;
    }
    let mut successor = items.len() - 1;
    while items[successor] <= items[pivot - 1] {
        successor -= 1;
    }
    items.swap(pivot - 1, successor);
    items[pivot..].reverse();
    true
}

/// Counts the distinct permutations of a condition multiset.
///
/// Returns `None` when the count does not fit in a `u128`.
pub fn distinct_order_count(conditions: &[Condition]) -> Option<u128> {
    let mut multiplicities: BTreeMap<&Condition, u128> = BTreeMap::new();
    for condition in conditions {
        *multiplicities.entry(condition).or_default() += 1;
    }
    let mut total: u128 = 0;
    let mut count: u128 = 1;
    for multiplicity in multiplicities.values() {
        for step in 1..=*multiplicity {
            total += 1;
            count = count.checked_mul(total)? / step;
        }
    }
    Some(count)
}
