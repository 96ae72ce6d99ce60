mod builder;
mod error;
mod throttle;

pub use builder::{branch_names_equal, Builder, FinishedShard};
pub use error::BuildError;
