/// Setup-time errors. These are the only failures surfaced to the caller;
/// everything that happens inside an intercepted call is isolated and logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("alias '{alias}' is already bound to '{existing}', cannot rebind to '{requested}'")]
    AliasCollision {
        alias: String,
        existing: String,
        requested: String,
    },

    #[error("{alias}.{method} already has an override handler")]
    DuplicateOverride { alias: String, method: String },
}

/// Errors from driving plugins or editing their settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("no plugin named '{0}' is registered")]
    UnknownPlugin(String),

    #[error("a plugin named '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("no setting named '{0}'")]
    UnknownSetting(String),

    #[error("setting '{key}' holds a {expected} value, got {actual}")]
    SettingKindMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot run {phase}: plugin '{plugin}' has not completed init")]
    PhaseOrder { phase: &'static str, plugin: String },
}
