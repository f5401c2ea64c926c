pub mod codec;
pub mod error;
pub mod ids;
pub mod node;
pub mod tree;

pub use codec::Compression;
pub use error::{IndexError, Result};
pub use ids::IdTable;
pub use node::{AlignmentRecord, Hit, Trie};
pub use tree::{Alignment, BuildOpt, FixedTree, QueryOpt, TreeStats};
