//! Registry for looking up dialect definitions.

use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use super::builtin;
use super::definition::{InteractionKind, ShellDialectSpec};
use crate::error::{DialectError, Result};

/// Registry of shell dialects keyed by name.
///
/// Owned by the application and handed to the
/// [`SessionRegistry`](crate::session::SessionRegistry); there is no global
/// instance. Dialects are shared as `Arc` since many sessions use one spec.
#[derive(Debug, Default, Clone)]
pub struct DialectRegistry {
    dialects: IndexMap<String, Arc<ShellDialectSpec>>,
}

impl DialectRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            dialects: IndexMap::new(),
        }
    }

    /// Create a registry holding the built-in bash, cmd and PowerShell dialects.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for spec in builtin::all() {
            registry.dialects.insert(spec.name.clone(), Arc::new(spec));
        }
        registry
    }

    /// Register a dialect definition.
    pub fn register(&mut self, spec: ShellDialectSpec) -> Result<()> {
        validate(&spec)?;
        if self.dialects.contains_key(&spec.name) {
            return Err(DialectError::AlreadyRegistered {
                name: spec.name.clone(),
            }
            .into());
        }
        debug!("registering dialect {:?}", spec.name);
        self.dialects.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Get a dialect by name.
    pub fn get(&self, name: &str) -> Option<Arc<ShellDialectSpec>> {
        self.dialects.get(name).cloned()
    }

    /// Resolve a dialect for a session, checking it supports `kind`.
    pub fn resolve(&self, name: &str, kind: InteractionKind) -> Result<Arc<ShellDialectSpec>> {
        let spec = self.get(name).ok_or_else(|| DialectError::Unsupported {
            name: name.to_string(),
        })?;
        if !spec.supports(kind) {
            return Err(DialectError::InteractionUnsupported {
                name: name.to_string(),
                interaction: kind.to_string(),
            }
            .into());
        }
        Ok(spec)
    }

    /// Check if a dialect is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.dialects.contains_key(name)
    }

    /// List all registered dialect names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.dialects.keys()
    }
}

fn validate(spec: &ShellDialectSpec) -> Result<()> {
    let invalid = |message: &str| -> Result<()> {
        Err(DialectError::InvalidDefinition {
            message: format!("{}: {}", spec.name, message),
        }
        .into())
    };
    if spec.name.is_empty() {
        return invalid("name is empty");
    }
    if spec.marker_alphabet.is_empty() {
        return invalid("marker alphabet is empty");
    }
    if spec.interactions.is_empty() {
        return invalid("no interaction kinds");
    }
    if spec
        .scopes
        .iter()
        .any(|s| s.open.is_empty() || s.close.is_empty())
    {
        return invalid("empty scope delimiter");
    }
    Ok(())
}
