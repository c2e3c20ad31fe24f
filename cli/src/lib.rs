//! Deployment descriptors for simulated device fleets and analysis of the
//! inference metrics those devices write.

pub mod analyze;
pub mod compose;
pub mod error;

pub use error::{CliError, Result};
