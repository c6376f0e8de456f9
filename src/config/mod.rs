//! Application settings and configuration.

mod settings;

pub use settings::{
    BackfillSettings, DatabaseSettings, ReconnectSettings, Settings, StreamSettings,
};
