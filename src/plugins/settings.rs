//! Plugin settings surface read and written by the UI.
//!
//! A [`Settings`] value is a shared handle: the plugin, its own async tasks
//! and the UI all see the same entries. Presentation flags (`hidden`,
//! `disabled`) are plain state; nothing here persists.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::PluginError;
use crate::util::{isolate, Fault};

/// Typed setting value. Each variant carries only what its kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Text(String),
    Checkbox(bool),
    Button,
}

impl SettingValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Checkbox(_) => "checkbox",
            Self::Button => "button",
        }
    }

    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Bare JSON form used for storage.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Checkbox(checked) => Value::Bool(*checked),
            Self::Button => Value::Null,
        }
    }

    /// Decode a stored value into the same kind as `self`.
    pub fn from_json_like(&self, value: &Value) -> Option<Self> {
        match (self, value) {
            (Self::Text(_), Value::String(text)) => Some(Self::Text(text.clone())),
            (Self::Checkbox(_), Value::Bool(checked)) => Some(Self::Checkbox(*checked)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Checkbox(checked) => Some(*checked),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Checkbox(checked) => write!(f, "{checked}"),
            Self::Button => write!(f, "<button>"),
        }
    }
}

/// Invoked with the key and new value after every write (or button press).
pub type SettingCallback = Arc<dyn Fn(&str, &SettingValue) + Send + Sync>;

/// The parts of a setting a plugin may change freely. Writes here never
/// reach the change callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Presentation {
    pub text: String,
    pub disabled: bool,
    pub hidden: bool,
}

#[derive(Clone)]
pub struct SettingDescriptor {
    pub presentation: Presentation,
    value: SettingValue,
    callback: Option<SettingCallback>,
}

impl fmt::Debug for SettingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingDescriptor")
            .field("presentation", &self.presentation)
            .field("value", &self.value)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl SettingDescriptor {
    fn new(text: impl Into<String>, value: SettingValue) -> Self {
        Self {
            presentation: Presentation {
                text: text.into(),
                ..Presentation::default()
            },
            value,
            callback: None,
        }
    }

    pub fn text(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(text, SettingValue::Text(value.into()))
    }

    pub fn checkbox(text: impl Into<String>, checked: bool) -> Self {
        Self::new(text, SettingValue::Checkbox(checked))
    }

    pub fn button(text: impl Into<String>) -> Self {
        Self::new(text, SettingValue::Button)
    }

    pub fn disabled(mut self) -> Self {
        self.presentation.disabled = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.presentation.hidden = true;
        self
    }

    pub fn on_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &SettingValue) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    pub fn set_callback(&mut self, callback: SettingCallback) {
        self.callback = Some(callback);
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }
}

/// What the UI renders for one visible setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingView {
    pub key: String,
    pub text: String,
    pub value: SettingValue,
    pub disabled: bool,
}

/// Ordered key → descriptor map behind a shared handle.
#[derive(Clone, Default)]
pub struct Settings {
    entries: Arc<RwLock<Vec<(String, SettingDescriptor)>>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.read().iter().map(|(k, d)| (k.clone(), d.value.clone())))
            .finish()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced entry keeps its position.
    pub fn insert(&self, key: &str, descriptor: SettingDescriptor) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = descriptor,
            None => entries.push((key.to_string(), descriptor)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<SettingDescriptor> {
        self.entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, d)| d.clone())
    }

    pub fn value(&self, key: &str) -> Option<SettingValue> {
        self.get(key).map(|d| d.value)
    }

    /// Edit presentation fields in place. Values only change through
    /// [`Settings::set`] or [`Settings::restore`].
    pub fn edit<R>(&self, key: &str, f: impl FnOnce(&mut Presentation) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, d)| f(&mut d.presentation))
    }

    pub fn set_hidden(&self, key: &str, hidden: bool) {
        self.edit(key, |p| p.hidden = hidden);
    }

    pub fn set_disabled(&self, key: &str, disabled: bool) {
        self.edit(key, |p| p.disabled = disabled);
    }

    /// Write a value and fire the change callback synchronously. A failing
    /// callback is logged; the value stays written.
    pub fn set(&self, key: &str, value: SettingValue) -> Result<(), PluginError> {
        if let Some(fault) = self.write(key, value)? {
            report_callback_fault(key, &fault);
        }
        Ok(())
    }

    /// Put back a value read from storage or a default, without firing the
    /// change callback. Same kind rules as [`Settings::set`].
    pub fn restore(&self, key: &str, value: SettingValue) -> Result<(), PluginError> {
        let mut entries = self.entries.write();
        let descriptor = Self::writable(&mut entries, key, &value)?;
        descriptor.value = value;
        Ok(())
    }

    /// Fire a button's callback.
    pub fn press(&self, key: &str) -> Result<(), PluginError> {
        if let Some(fault) = self.trigger(key)? {
            report_callback_fault(key, &fault);
        }
        Ok(())
    }

    fn writable<'a>(
        entries: &'a mut [(String, SettingDescriptor)],
        key: &str,
        value: &SettingValue,
    ) -> Result<&'a mut SettingDescriptor, PluginError> {
        let (_, descriptor) = entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or_else(|| PluginError::UnknownSetting(key.to_string()))?;
        if !descriptor.value.same_kind(value) || matches!(value, SettingValue::Button) {
            return Err(PluginError::SettingKindMismatch {
                key: key.to_string(),
                expected: descriptor.value.kind(),
                actual: value.kind(),
            });
        }
        Ok(descriptor)
    }

    /// [`Settings::set`] that hands a callback fault back to the caller.
    pub(crate) fn write(&self, key: &str, value: SettingValue) -> Result<Option<Fault>, PluginError> {
        let callback = {
            let mut entries = self.entries.write();
            let descriptor = Self::writable(&mut entries, key, &value)?;
            descriptor.value = value.clone();
            descriptor.callback.clone()
        };
        // Lock released: the callback may read or write other settings.
        Ok(callback.and_then(|callback| run_callback(&callback, key, &value)))
    }

    /// [`Settings::press`] that hands a callback fault back to the caller.
    pub(crate) fn trigger(&self, key: &str) -> Result<Option<Fault>, PluginError> {
        let descriptor = self
            .get(key)
            .ok_or_else(|| PluginError::UnknownSetting(key.to_string()))?;
        if descriptor.value != SettingValue::Button {
            return Err(PluginError::SettingKindMismatch {
                key: key.to_string(),
                expected: "button",
                actual: descriptor.value.kind(),
            });
        }
        Ok(descriptor
            .callback
            .and_then(|callback| run_callback(&callback, key, &SettingValue::Button)))
    }

    /// Visible entries in declaration order.
    pub fn view(&self) -> Vec<SettingView> {
        self.entries
            .read()
            .iter()
            .filter(|(_, d)| !d.presentation.hidden)
            .map(|(key, d)| SettingView {
                key: key.clone(),
                text: d.presentation.text.clone(),
                value: d.value.clone(),
                disabled: d.presentation.disabled,
            })
            .collect()
    }
}

fn run_callback(callback: &SettingCallback, key: &str, value: &SettingValue) -> Option<Fault> {
    isolate(|| {
        callback(key, value);
        Ok(())
    })
    .err()
}

fn report_callback_fault(key: &str, fault: &Fault) {
    match fault {
        Fault::Error(_) => warn!(setting = key, error = %fault, "setting callback failed"),
        Fault::Panic(_) => error!(setting = key, error = %fault, "setting callback panicked"),
    }
}
