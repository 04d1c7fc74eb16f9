//! The two `loop` mode drivers (`spec.md` §4.5): `iterate` fans a child
//! workflow out over a list of items with bounded concurrency, `refine`
//! re-runs a child workflow sequentially until a condition holds.

pub mod iterate;
pub mod refine;
