pub mod audit;
pub mod loaders;
pub mod preprocess;
pub mod split;

pub use audit::*;
pub use loaders::*;
pub use preprocess::*;
pub use split::*;
