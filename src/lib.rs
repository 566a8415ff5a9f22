pub mod availability;
pub mod classifier;
pub mod config;
pub mod convolver;
pub mod db;
pub mod error;
pub mod extrapolator;
pub mod least_squares;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod projector;
pub mod report;
pub mod views;

pub use config::ForecastConfig;
pub use error::ForecastError;
pub use models::{Category, ForecastInputs};
pub use pipeline::{run, ForecastOutputs};
