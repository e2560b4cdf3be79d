mod manager;
mod patch;
mod poller;
mod traits;

pub use manager::{HookManager, HookRegistration};
pub use patch::ActivePatch;
pub use poller::spawn_poller;
pub use traits::{
    event_name, HookCall, HookEvent, HookKind, HookTarget, Named, NoDispatch, ObserveFn,
    OverrideFn, PluginDispatch, TransformFn,
};
