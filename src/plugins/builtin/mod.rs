mod account_settings;

pub use account_settings::AccountSettings;
