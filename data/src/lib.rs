pub mod config;
pub mod period;
pub mod series;
pub mod sma;

pub use config::SyncConfig;
pub use period::Period;
pub use series::{BarSeries, BarStore};
pub use sma::SmaPoint;

#[derive(thiserror::Error, Debug, Clone)]
pub enum InternalError {
    #[error("Config error: {0}")]
    Config(String),
}
