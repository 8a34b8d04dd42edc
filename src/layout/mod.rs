//! Lane layout for overlapping annotation intervals

mod lanes;

pub use lanes::{layout, max_depth, Interval, Lane, Span};
