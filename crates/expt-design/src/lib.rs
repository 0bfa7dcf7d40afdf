#![deny(missing_docs)]
#![doc = "Design trees, condition generation and ordering strategies for multi-level experiments."]

pub mod design;
pub mod latin;
pub mod order;
pub mod spec;
pub mod tree;

pub use design::{full_cross, Design, Iv};
pub use latin::{balanced_latin_square, is_latin_rect, is_row_balanced, latin_square, Square};
pub use order::{
    distinct_order_count, OrderMethod, Ordering, SortOrder, SyntheticIv, COUNTERBALANCE_IV,
    LATIN_SQUARE_IV, SORTED_IV,
};
pub use spec::{DesignSpec, IvSpec, LevelSpec, OrderArgs, OrderSpec, TreeSpec, MAIN_TREE};
pub use tree::{DesignTree, Level, TreeCursor};
