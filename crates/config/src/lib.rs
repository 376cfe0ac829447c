// Configuration loading

pub mod settings;

pub use settings::{
    AuthMode, ColorMode, ConfigError, DeviceSettings, LabelSettings, MatchingSettings,
    NetboxSettings, NmsSettings, RetrySettings, Settings, TargetSettings,
};
