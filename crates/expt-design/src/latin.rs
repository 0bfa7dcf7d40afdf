//! Latin-square construction and validation.

use std::collections::{BTreeMap, BTreeSet};

use expt_core::errors::{ErrorInfo, ExptError};
use expt_core::RngHandle;
use rand::seq::SliceRandom;
use tracing::warn;

/// Square (or rectangle) of item indices, stored row-major.
pub type Square = Vec<Vec<usize>>;

/// Constructs a Latin square of the given order by rejection sampling.
///
/// With `uniform` the whole square restarts on any collision so every Latin
/// square of the order is equally likely; this is only practical up to order
/// four or five. Without it only the failing row is redrawn, which is biased
/// but usable up to order ten. `reduced` fixes the first row and column to
/// the identity, and `shuffle` permutes rows, columns and items afterwards.
pub fn latin_square(
    order: usize,
    reduced: bool,
    uniform: bool,
    shuffle: bool,
    rng: &mut RngHandle,
) -> Square {
    if order == 0 {
        return Square::new();
    }
    if uniform {
        warn!(order, "sampling a uniform Latin square; this is slow for large orders");
    } else {
        warn!(order, "sampling a non-uniform Latin square; the distribution is biased");
    }
    let numbers: Vec<usize> = (0..order).collect();
    let mut square = Square::new();
    while !is_latin_rect(&square) {
        square = if reduced {
            vec![numbers.clone()]
        } else {
            Square::new()
        };
        let first_row = square.len();
        for row in first_row..order {
            let reduced_row = reduced.then_some(row);
            square.push(new_row(order, reduced_row, rng));
            if uniform {
                if !is_latin_rect(&square) {
                    break;
                }
            } else {
                while !is_latin_rect(&square) {
                    if let Some(last) = square.last_mut() {
                        *last = new_row(order, reduced_row, rng);
                    }
                }
            }
        }
    }
    if shuffle {
        square = shuffle_square(square, true, rng);
    }
    square
}

/// Constructs a row-balanced Latin square of an even order.
///
/// Every ordered pair of distinct items appears back-to-back exactly once
/// across the rows. The canonical square is built from rotated columns and
/// then rows and items are shuffled; columns stay in place because the
/// balance is tied to column positions.
pub fn balanced_latin_square(order: usize, rng: &mut RngHandle) -> Result<Square, ExptError> {
    if order % 2 == 1 {
        return Err(ExptError::Spec(
            ErrorInfo::new(
                "latin-square-odd-order",
                "cannot build a balanced Latin square with an odd order",
            )
            .with_context("order", order.to_string()),
        ));
    }
    if order == 0 {
        return Ok(Square::new());
    }
    let mut column_starts = vec![0, 1];
    let (mut low, mut high) = (2, order - 1);
    while column_starts.len() < order {
        column_starts.push(high);
        if column_starts.len() < order {
            column_starts.push(low);
        }
        low += 1;
        high -= 1;
    }
    column_starts.truncate(order);
    let square: Square = (0..order)
        .map(|row| {
            column_starts
                .iter()
                .map(|start| (row + start) % order)
                .collect()
        })
        .collect();
    Ok(shuffle_square(square, false, rng))
}

/// Returns true when every row and every column is free of repeats.
///
/// An empty matrix is not a Latin rectangle.
pub fn is_latin_rect(matrix: &[Vec<usize>]) -> bool {
    if matrix.is_empty() {
        return false;
    }
    let rows_ok = matrix
        .iter()
        .all(|row| row.iter().collect::<BTreeSet<_>>().len() == row.len());
    let width = matrix.iter().map(Vec::len).min().unwrap_or(0);
    let columns_ok = (0..width).all(|col| {
        matrix
            .iter()
            .map(|row| row[col])
            .collect::<BTreeSet<_>>()
            .len()
            == matrix.len()
    });
    rows_ok && columns_ok
}

/// Counts immediate transitions `(a, b)` across all rows of a square.
pub fn transition_counts(square: &[Vec<usize>]) -> BTreeMap<(usize, usize), usize> {
    let mut counts = BTreeMap::new();
    for row in square {
        for pair in row.windows(2) {
            *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
    }
    counts
}

/// Returns true when every ordered pair of distinct items follows each
/// other equally often.
pub fn is_row_balanced(square: &[Vec<usize>]) -> bool {
    let order = square.len();
    let counts = transition_counts(square);
    let expected = counts.values().next().copied().unwrap_or(0);
    counts.len() == order * order.saturating_sub(1)
        && counts.values().all(|&count| count == expected)
}

fn new_row(order: usize, reduced_row: Option<usize>, rng: &mut RngHandle) -> Vec<usize> {
    match reduced_row {
        Some(first) => {
            let mut rest: Vec<usize> = (0..order).filter(|&item| item != first).collect();
            rest.shuffle(rng);
            let mut row = Vec::with_capacity(order);
            row.push(first);
            row.extend(rest);
            row
        }
        None => {
            let mut row: Vec<usize> = (0..order).collect();
            row.shuffle(rng);
            row
        }
    }
}

fn shuffle_square(mut square: Square, shuffle_columns: bool, rng: &mut RngHandle) -> Square {
    let order = square.len();
    square.shuffle(rng);
    if shuffle_columns {
        let mut columns: Vec<usize> = (0..order).collect();
        columns.shuffle(rng);
        square = square
            .iter()
            .map(|row| columns.iter().map(|&col| row[col]).collect())
            .collect();
    }
    let mut labels: Vec<usize> = (0..order).collect();
    labels.shuffle(rng);
    square
        .into_iter()
        .map(|row| row.into_iter().map(|item| labels[item]).collect())
        .collect()
}
