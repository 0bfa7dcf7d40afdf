use std::error::Error;

use expt_core::errors::{ErrorInfo, ExptError};
use expt_run::Experiment;

/// `expt create`.
pub mod create;
/// `expt export`.
pub mod export;
/// `expt inspect`.
pub mod inspect;
/// `expt resume`.
pub mod resume;
/// `expt run`.
pub mod run;

/// Parses `LEVEL N` pairs such as `participant 2 block 1`.
pub(crate) fn parse_numbers(section: &[String]) -> Result<Vec<(String, i64)>, Box<dyn Error>> {
    if section.len() % 2 != 0 {
        return Err(format!(
            "sections are selected with LEVEL N pairs, got {:?}",
            section
        )
        .into());
    }
    section
        .chunks(2)
        .map(|pair| -> Result<(String, i64), Box<dyn Error>> {
            let number = pair[1]
                .parse::<i64>()
                .map_err(|err| format!("invalid number {:?} for level {}: {err}", pair[1], pair[0]))?;
            Ok((pair[0].clone(), number))
        })
        .collect()
}

/// Index path of the section identified by `numbers`; the root when empty.
pub(crate) fn locate(experiment: &Experiment, numbers: &[(String, i64)]) -> Result<Vec<usize>, ExptError> {
    let pairs: Vec<(&str, i64)> = numbers
        .iter()
        .map(|(level, number)| (level.as_str(), *number))
        .collect();
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    experiment.root().locate(&pairs)
}

pub(crate) fn nothing_to_run(level: &str, what: &str) -> ExptError {
    ExptError::State(
        ErrorInfo::new("nothing-to-run", format!("no {what} section at this level"))
            .with_context("level", level),
    )
}
