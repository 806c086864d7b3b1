pub mod executor;
pub mod model;
pub mod plugin;

pub use executor::{ActivityExecutor, ActivityExecutorError};
pub use model::{Activity, ActivityState};
pub use plugin::{ActivityFailure, ActivityPlugin};
