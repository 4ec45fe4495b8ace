//! Static-single-assignment construction and the dominance machinery it
//! rests on.

mod construct;
pub mod dominance;

pub use construct::construct;
pub use dominance::Forests;
