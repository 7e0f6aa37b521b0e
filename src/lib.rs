#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

pub mod bits;
pub mod color;
pub mod dbg;
pub mod emsort;
pub mod index;
pub mod kmer;
pub mod pseudoalign;
pub mod seqio;
pub mod ser;
pub mod temp;

/// Prelude module to import everything from this crate
pub mod prelude {
    pub use crate::bits::*;
    pub use crate::color::*;
    pub use crate::dbg::*;
    pub use crate::index::*;
    pub use crate::kmer::*;
    pub use crate::pseudoalign::*;
}
