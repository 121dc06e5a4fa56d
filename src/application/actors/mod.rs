pub mod recompute_actor;

pub use recompute_actor::*;
