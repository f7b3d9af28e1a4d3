//! Build-file model and resolver.
//!
//! Parses a Dockerfile-style build file into an ordered list of
//! [`Directive`]s and answers the two questions the build pipeline
//! asks: what does the final stage derive from, and what value does a
//! given metadata label carry.

mod parser;
mod query;

pub use parser::{parse, parse_file, Directive};
pub use query::{
    lookup_base_image, lookup_label_value, resolve_base_image, resolve_label_value,
    split_label_list,
};
