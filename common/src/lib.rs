//! Shared types for the feature layer

pub mod error;
pub mod market;
pub mod table;
pub mod window;

pub use error::{FeatureError, FeatureResult};
pub use market::{epoch_seconds, MarketEvent, Quote, Trade};
pub use table::Table;
pub use window::{group_by_window, qc_pass, Keyed, WindowKey};
