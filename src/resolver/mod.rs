//! Alias indirection between framework code and the client's obfuscated
//! symbols.
//!
//! Every class the framework touches is named by a stable alias
//! (`LoginScreen`) bound to whatever symbol the current client build uses
//! (`FW`). The client defines its classes while it boots, so a lookup that
//! misses is normal: the alias stays pending and is retried by [`ClassResolver::poll`]
//! until it either appears or runs out of attempts.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HookError;
use crate::target::{ClassRef, Namespace};

/// A stable alias bound to an external symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasEntry {
    pub alias: String,
    pub symbol: String,
}

/// Outcome of a single resolution attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ClassRef),
    Pending { attempts: u32 },
    /// Attempts exhausted; stays this way for the rest of the session.
    Unresolved,
    /// The alias was never registered.
    Unknown,
}

impl Resolution {
    pub fn class(&self) -> Option<&ClassRef> {
        match self {
            Self::Resolved(class) => Some(class),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Result of one polling round over every pending alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub newly_resolved: Vec<String>,
    pub newly_unresolved: Vec<String>,
    pub still_pending: usize,
}

/// Recorded once per alias that gave up resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverDiagnostic {
    pub alias: String,
    pub symbol: String,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
enum AliasStatus {
    Pending { attempts: u32 },
    Resolved(ClassRef),
    Unresolved,
}

#[derive(Debug)]
struct AliasRecord {
    entry: AliasEntry,
    status: AliasStatus,
}

#[derive(Debug, Default)]
struct ResolverState {
    order: Vec<String>,
    aliases: HashMap<String, AliasRecord>,
    lookups: Vec<AliasEntry>,
    diagnostics: Vec<ResolverDiagnostic>,
}

#[derive(Debug)]
pub struct ClassResolver {
    namespace: Arc<Namespace>,
    max_attempts: u32,
    state: Mutex<ResolverState>,
}

impl ClassResolver {
    pub fn new(namespace: Arc<Namespace>, max_attempts: u32) -> Self {
        Self {
            namespace,
            max_attempts: max_attempts.max(1),
            state: Mutex::new(ResolverState::default()),
        }
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Bind `alias` to `symbol`. Re-registering the identical pair is a no-op.
    pub fn register_alias(&self, alias: &str, symbol: &str) -> Result<(), HookError> {
        let mut state = self.state.lock();
        if let Some(record) = state.aliases.get(alias) {
            if record.entry.symbol == symbol {
                return Ok(());
            }
            return Err(HookError::AliasCollision {
                alias: alias.to_string(),
                existing: record.entry.symbol.clone(),
                requested: symbol.to_string(),
            });
        }
        state.order.push(alias.to_string());
        state.aliases.insert(
            alias.to_string(),
            AliasRecord {
                entry: AliasEntry {
                    alias: alias.to_string(),
                    symbol: symbol.to_string(),
                },
                status: AliasStatus::Pending { attempts: 0 },
            },
        );
        debug!(alias, symbol, "alias registered");
        Ok(())
    }

    /// Look the alias up without consuming a poll attempt.
    pub fn resolve(&self, alias: &str) -> Resolution {
        let mut state = self.state.lock();
        let Some(record) = state.aliases.get_mut(alias) else {
            return Resolution::Unknown;
        };
        match record.status.clone() {
            AliasStatus::Resolved(class) => Resolution::Resolved(class),
            AliasStatus::Unresolved => Resolution::Unresolved,
            AliasStatus::Pending { attempts } => {
                match self.namespace.class(&record.entry.symbol) {
                    Some(class) => {
                        info!(alias, symbol = %record.entry.symbol, "alias resolved");
                        record.status = AliasStatus::Resolved(Arc::clone(&class));
                        Resolution::Resolved(class)
                    }
                    None => Resolution::Pending { attempts },
                }
            }
        }
    }

    /// One polling round: every pending alias gets exactly one attempt.
    pub fn poll(&self) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for alias in &state.order {
            let Some(record) = state.aliases.get_mut(alias) else {
                continue;
            };
            let AliasStatus::Pending { attempts } = record.status else {
                continue;
            };
            let attempts = attempts + 1;

            if let Some(class) = self.namespace.class(&record.entry.symbol) {
                info!(alias = %alias, symbol = %record.entry.symbol, attempts, "alias resolved");
                record.status = AliasStatus::Resolved(class);
                outcome.newly_resolved.push(alias.clone());
            } else if attempts >= self.max_attempts {
                warn!(
                    alias = %alias,
                    symbol = %record.entry.symbol,
                    attempts,
                    "alias permanently unresolved; hooks on it stay inactive"
                );
                record.status = AliasStatus::Unresolved;
                state.diagnostics.push(ResolverDiagnostic {
                    alias: alias.clone(),
                    symbol: record.entry.symbol.clone(),
                    attempts,
                });
                outcome.newly_unresolved.push(alias.clone());
            } else {
                record.status = AliasStatus::Pending { attempts };
                outcome.still_pending += 1;
            }
        }

        outcome
    }

    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .aliases
            .values()
            .any(|r| matches!(r.status, AliasStatus::Pending { .. }))
    }

    /// Registered aliases in registration order.
    pub fn aliases(&self) -> Vec<AliasEntry> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|alias| state.aliases.get(alias))
            .map(|record| record.entry.clone())
            .collect()
    }

    pub fn symbol_of(&self, alias: &str) -> Option<String> {
        self.state
            .lock()
            .aliases
            .get(alias)
            .map(|record| record.entry.symbol.clone())
    }

    pub fn diagnostics(&self) -> Vec<ResolverDiagnostic> {
        self.state.lock().diagnostics.clone()
    }

    /// Bind a named constant table (for example the client's action enum)
    /// to its external symbol. Same collision rule as aliases.
    pub fn register_lookup(&self, name: &str, symbol: &str) -> Result<(), HookError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.lookups.iter().find(|entry| entry.alias == name) {
            if existing.symbol == symbol {
                return Ok(());
            }
            return Err(HookError::AliasCollision {
                alias: name.to_string(),
                existing: existing.symbol.clone(),
                requested: symbol.to_string(),
            });
        }
        state.lookups.push(AliasEntry {
            alias: name.to_string(),
            symbol: symbol.to_string(),
        });
        Ok(())
    }

    /// Read a lookup table from the namespace. Absent until the client defines it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let symbol = self
            .state
            .lock()
            .lookups
            .iter()
            .find(|entry| entry.alias == name)
            .map(|entry| entry.symbol.clone())?;
        self.namespace.value(&symbol)
    }

    pub fn lookups(&self) -> Vec<AliasEntry> {
        self.state.lock().lookups.clone()
    }
}
