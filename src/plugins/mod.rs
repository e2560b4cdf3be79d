pub mod builtin;
pub mod manager;
pub mod settings;
pub mod traits;

pub use manager::{Phase, PhaseReport, PluginManager};
pub use settings::{SettingCallback, SettingDescriptor, SettingValue, SettingView, Settings};
pub use traits::{Plugin, PluginContext, PluginInfo, PluginState};
