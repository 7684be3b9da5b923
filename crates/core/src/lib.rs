pub mod config;
pub mod error;
pub mod run;
pub mod schedule;
pub mod stage;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use run::*;
pub use schedule::Schedule;
pub use stage::Stage;
