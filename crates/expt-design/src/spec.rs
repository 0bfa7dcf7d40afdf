//! Declarative design specifications as read from experiment files.

use std::collections::BTreeMap;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::{Data, RngHandle, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::design::{Design, Iv};
use crate::order::{Ordering, SortOrder};
use crate::tree::{DesignTree, Level};

/// IV declarations: a mapping or a list of `[name, levels]` pairs.
///
/// `null` levels declare a continuous IV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IvSpec {
    /// `{name: [levels...]}` in declaration order.
    Map(IndexMap<String, Option<Vec<Value>>>),
    /// `[[name, [levels...]], ...]`.
    Pairs(Vec<(String, Option<Vec<Value>>)>),
}

impl IvSpec {
    /// Converts the declarations into IVs, preserving order.
    pub fn to_ivs(&self) -> Vec<Iv> {
        let convert = |(name, values): (&String, &Option<Vec<Value>>)| Iv {
            name: name.clone(),
            values: values.clone().unwrap_or_default(),
        };
        match self {
            IvSpec::Map(entries) => entries.iter().map(convert).collect(),
            IvSpec::Pairs(pairs) => pairs.iter().map(|(name, values)| convert((name, values))).collect(),
        }
    }
}

/// Ordering given by name, positional list or mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderSpec {
    /// `shuffle`
    Name(String),
    /// `[latin_square, 1, true, false]`
    Positional(Vec<Value>),
    /// `{name: sorted, number: 2, order: both}`
    Named(OrderArgs),
}

/// Keyword form of an ordering specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderArgs {
    /// Ordering name.
    #[serde(alias = "class")]
    pub name: String,
    /// Repeat count.
    #[serde(default, alias = "n", skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,
    /// Shuffle without adjacent repeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoid_repeats: Option<bool>,
    /// Sort direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    /// Balanced Latin square.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balanced: Option<bool>,
    /// Uniformly sampled Latin square.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderKind {
    Identity,
    Shuffle,
    CompleteCounterbalance,
    Sorted,
    LatinSquare,
}

fn order_kind(name: &str) -> Result<OrderKind, ExptError> {
    match name.to_ascii_lowercase().as_str() {
        "ordering" | "identity" => Ok(OrderKind::Identity),
        "shuffle" => Ok(OrderKind::Shuffle),
        "completecounterbalance" | "complete_counterbalance" | "counterbalance"
        | "counterbalanced" => Ok(OrderKind::CompleteCounterbalance),
        "sorted" | "sort" => Ok(OrderKind::Sorted),
        "latinsquare" | "latin_square" => Ok(OrderKind::LatinSquare),
        _ => Err(ExptError::Spec(
            ErrorInfo::new("ordering-unknown", "unknown ordering name")
                .with_context("name", name)
                .with_hint("use shuffle, ordering, counterbalance, sorted or latin_square"),
        )),
    }
}

fn positional_error(name: &str, position: usize, expected: &str) -> ExptError {
    ExptError::Spec(
        ErrorInfo::new("ordering-argument", "invalid positional ordering argument")
            .with_context("ordering", name)
            .with_context("position", position.to_string())
            .with_context("expected", expected),
    )
}

impl OrderSpec {
    /// Builds the ordering described by this specification.
    pub fn build(&self) -> Result<Ordering, ExptError> {
        let args = match self {
            OrderSpec::Name(name) => OrderArgs {
                name: name.clone(),
                number: None,
                avoid_repeats: None,
                order: None,
                balanced: None,
                uniform: None,
            },
            OrderSpec::Named(args) => args.clone(),
            OrderSpec::Positional(items) => positional_args(items)?,
        };
        args.build()
    }
}

fn positional_args(items: &[Value]) -> Result<OrderArgs, ExptError> {
    let name = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| positional_error("?", 0, "ordering name"))?
        .to_string();
    let kind = order_kind(&name)?;
    let number = match items.get(1) {
        Some(value) => Some(
            value
                .as_i64()
                .and_then(|raw| usize::try_from(raw).ok())
                .ok_or_else(|| positional_error(&name, 1, "repeat count"))?,
        ),
        None => None,
    };
    let flag = |position: usize| -> Result<Option<bool>, ExptError> {
        match items.get(position) {
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| positional_error(&name, position, "boolean")),
            None => Ok(None),
        }
    };
    let mut args = OrderArgs {
        name: name.clone(),
        number,
        avoid_repeats: None,
        order: None,
        balanced: None,
        uniform: None,
    };
    match kind {
        OrderKind::Shuffle => args.avoid_repeats = flag(2)?,
        OrderKind::Sorted => {
            args.order = match items.get(2) {
                Some(value) => Some(
                    value
                        .as_str()
                        .ok_or_else(|| positional_error(&name, 2, "sort order"))?
                        .to_string(),
                ),
                None => None,
            }
        }
        OrderKind::LatinSquare => {
            args.balanced = flag(2)?;
            args.uniform = flag(3)?;
        }
        OrderKind::Identity | OrderKind::CompleteCounterbalance => {}
    }
    Ok(args)
}

impl OrderArgs {
    /// Builds the ordering described by these arguments.
    pub fn build(&self) -> Result<Ordering, ExptError> {
        let number = self.number.unwrap_or(1);
        match order_kind(&self.name)? {
            OrderKind::Identity => Ordering::identity(number),
            OrderKind::Shuffle => Ordering::shuffle(number, self.avoid_repeats.unwrap_or(false)),
            OrderKind::CompleteCounterbalance => Ordering::complete_counterbalance(number),
            OrderKind::Sorted => {
                let order = match &self.order {
                    Some(raw) => SortOrder::parse(raw)?,
                    None => SortOrder::Both,
                };
                Ordering::sorted(number, order)
            }
            OrderKind::LatinSquare => Ordering::latin_square(
                number,
                self.balanced.unwrap_or(true),
                self.uniform.unwrap_or(false),
            ),
        }
    }
}

/// One design at one level.
///
/// Keys other than the recognised ones become the design's extra data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Level name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// IV declarations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivs: Option<IvSpec>,
    /// Explicit design matrix, one row per condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_matrix: Option<Vec<Vec<Value>>>,
    /// Ordering specification.
    #[serde(default, alias = "order", skip_serializing_if = "Option::is_none")]
    pub ordering: Option<OrderSpec>,
    /// Repeat count overriding the ordering's own.
    #[serde(default, alias = "n", skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,
    /// Remaining keys.
    #[serde(flatten)]
    pub extra_data: Data,
}

impl DesignSpec {
    /// Builds the design described by this specification.
    pub fn to_design(&self) -> Result<Design, ExptError> {
        let ivs = self.ivs.as_ref().map(IvSpec::to_ivs).unwrap_or_default();
        let mut ordering = match &self.ordering {
            Some(spec) => spec.build()?,
            None if self.design_matrix.is_some() => Ordering::identity(1)?,
            None => Ordering::shuffle(1, false)?,
        };
        if let Some(number) = self.number {
            ordering.set_number(number)?;
        }
        Design::new(
            ivs,
            self.design_matrix.clone(),
            Some(ordering),
            self.extra_data.clone(),
        )
    }
}

/// A level given as one design or a sequence of designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelSpec {
    /// Several designs run back-to-back at one level.
    Sequence(Vec<DesignSpec>),
    /// A single design.
    Single(DesignSpec),
}

impl LevelSpec {
    /// Builds the level, checking that its designs agree on the name.
    pub fn to_level(&self) -> Result<Level, ExptError> {
        let specs: Vec<&DesignSpec> = match self {
            LevelSpec::Sequence(specs) => specs.iter().collect(),
            LevelSpec::Single(spec) => vec![spec],
        };
        let mut name: Option<&str> = None;
        for spec in &specs {
            match (name, spec.name.as_deref()) {
                (None, Some(found)) => name = Some(found),
                (Some(known), Some(found)) if known != found => {
                    return Err(ExptError::Spec(
                        ErrorInfo::new(
                            "level-name-mismatch",
                            "designs at one level must share the same name",
                        )
                        .with_context("expected", known)
                        .with_context("found", found),
                    ))
                }
                _ => {}
            }
        }
        let name = name.ok_or_else(|| {
            ExptError::Spec(ErrorInfo::new("level-name-missing", "every level needs a name"))
        })?;
        let designs = specs
            .iter()
            .map(|spec| spec.to_design())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Level::sequence(name, designs))
    }
}

/// Name of the tree used as the trunk of a branching specification.
pub const MAIN_TREE: &str = "main";

/// Tree specification: a list of levels, or named trees with a `main` trunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeSpec {
    /// Levels of a single homogeneous tree.
    Levels(Vec<LevelSpec>),
    /// `main` plus alternative trees selected through the `design` IV.
    Named(IndexMap<String, Vec<LevelSpec>>),
}

fn to_levels(specs: &[LevelSpec]) -> Result<Vec<Level>, ExptError> {
    specs.iter().map(LevelSpec::to_level).collect()
}

impl DesignTree {
    /// Builds and initializes a tree from its declarative specification.
    pub fn from_spec(spec: &TreeSpec, rng: &mut RngHandle) -> Result<Self, ExptError> {
        match spec {
            TreeSpec::Levels(levels) => DesignTree::new(to_levels(levels)?, rng),
            TreeSpec::Named(trees) => {
                let main = trees.get(MAIN_TREE).ok_or_else(|| {
                    ExptError::Spec(
                        ErrorInfo::new("tree-main-missing", "named trees need a main tree")
                            .with_hint("rename the trunk tree to main"),
                    )
                })?;
                let mut others = BTreeMap::new();
                for (name, levels) in trees.iter().filter(|(name, _)| *name != MAIN_TREE) {
                    others.insert(name.clone(), to_levels(levels)?);
                }
                DesignTree::build(to_levels(main)?, others, rng)
            }
        }
    }
}
