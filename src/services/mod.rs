pub mod auxiliary; // Lookup files loaded at startup
pub mod config_resolver;
pub mod data_lake;
pub mod ddl; // Synapse and Spark statement generation
pub mod dispatcher;
pub mod executor;
pub mod landing_zone;
pub mod manifest_reader;

pub use auxiliary::*;
pub use config_resolver::*;
pub use data_lake::*;
pub use ddl::{generate, select_generator, DdlGenerator, Generation};
pub use dispatcher::*;
pub use executor::*;
pub use landing_zone::*;
pub use manifest_reader::*;
