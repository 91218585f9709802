pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod statement;
pub mod trigger;

pub use manifest::*;
pub use metadata::*;
pub use pipeline::*;
pub use statement::*;
pub use trigger::*;
