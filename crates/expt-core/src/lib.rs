#![deny(missing_docs)]
#![doc = "Core value model, error families and deterministic randomness shared by the expt crates."]

pub mod errors;
pub mod rng;
pub mod schema;
pub mod value;

pub use errors::{ErrorInfo, ExptError, QuitSignal};
pub use rng::{entropy_seed, stream_seed, RngHandle};
pub use schema::SchemaVersion;
pub use value::{data, Condition, Data, Value};

/// Reserved IV name selecting a heterogeneous branch of a design tree.
pub const DESIGN_IV: &str = "design";

/// Level name of the implicit root section of every experiment.
pub const BASE_LEVEL: &str = "_base";
