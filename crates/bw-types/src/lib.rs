pub mod dataset;
pub mod errors;
pub mod features;
pub mod telemetry;

pub use dataset::*;
pub use errors::*;
pub use features::*;
pub use telemetry::init_tracing;
