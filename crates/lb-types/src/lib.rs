pub mod config;
pub mod errors;
pub mod parameter;
pub mod trial;

pub use config::*;
pub use errors::*;
pub use parameter::*;
pub use trial::*;
