//! In-memory declaration graph.
//!
//! [`DeclarationGraph`] is the [`ProvisioningEngine`] used by the CLI and the
//! tests. It records declarations in order, enforces name uniqueness per
//! kind, and refuses any declaration whose spec mentions a token for a
//! resource that has not been declared yet. The recorded graph serializes
//! deterministically, so two syntheses of the same input compare equal.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::engine::{ProvisioningEngine, ResourceHandle, ResourceKind, TOKEN_PATTERN, Token};
use crate::error::EngineError;

/// One recorded declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Name, unique per kind.
    pub name: String,
    /// Resource specification as handed to the engine.
    pub spec: Value,
}

impl Declaration {
    /// Handle for this declaration.
    #[must_use]
    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle::new(self.kind, self.name.clone())
    }

    /// Looks up a field of the spec by JSON pointer.
    #[must_use]
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.spec.pointer(pointer)
    }

    /// Logical ids of every resource this declaration references.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_tokens(&self.spec, &mut out);
        out.into_iter()
            .map(|(kind, name, _)| format!("{kind}:{name}"))
            .collect()
    }
}

/// Ordered record of every declaration and export of one synthesis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeclarationGraph {
    declarations: Vec<Declaration>,
    exports: BTreeMap<String, Value>,
    #[serde(skip)]
    index: HashMap<ResourceHandle, usize>,
}

impl DeclarationGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// All declarations in declaration order.
    #[must_use]
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Looks up a declaration by kind and name.
    #[must_use]
    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&Declaration> {
        let handle = ResourceHandle::new(kind, name);
        self.index.get(&handle).map(|&i| &self.declarations[i])
    }

    /// Looks up a declaration by handle.
    #[must_use]
    pub fn resolve(&self, handle: &ResourceHandle) -> Option<&Declaration> {
        self.index.get(handle).map(|&i| &self.declarations[i])
    }

    /// Returns true if the handle was declared.
    #[must_use]
    pub fn contains(&self, handle: &ResourceHandle) -> bool {
        self.index.contains_key(handle)
    }

    /// Declarations of one kind, in declaration order.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(move |d| d.kind == kind)
    }

    /// Number of declarations of one kind.
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.of_kind(kind).count()
    }

    /// Published exports.
    #[must_use]
    pub fn exports(&self) -> &BTreeMap<String, Value> {
        &self.exports
    }

    /// Renders the graph as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn check_references(
        &self,
        kind: ResourceKind,
        name: &str,
        spec: &Value,
    ) -> Result<(), EngineError> {
        let mut tokens = Vec::new();
        collect_tokens(spec, &mut tokens);
        for (ref_kind, ref_name, attribute) in tokens {
            let known = self.declarations.iter().any(|d| {
                d.name == ref_name
                    && d.kind.to_string() == ref_kind
                    && d.kind.supports(&attribute)
            });
            if !known {
                return Err(EngineError::DanglingReference {
                    kind,
                    name: name.to_string(),
                    token: format!("${{{ref_kind}:{ref_name}.{attribute}}}"),
                });
            }
        }
        Ok(())
    }
}

impl ProvisioningEngine for DeclarationGraph {
    fn declare(
        &mut self,
        kind: ResourceKind,
        name: &str,
        spec: Value,
    ) -> Result<ResourceHandle, EngineError> {
        let handle = ResourceHandle::new(kind, name);
        if self.index.contains_key(&handle) {
            return Err(EngineError::NameCollision {
                kind,
                name: name.to_string(),
            });
        }
        self.check_references(kind, name, &spec)?;

        debug!(kind = %kind, name = %name, "declared resource");
        self.index.insert(handle.clone(), self.declarations.len());
        self.declarations.push(Declaration {
            kind,
            name: name.to_string(),
            spec,
        });
        Ok(handle)
    }

    fn reference(&self, handle: &ResourceHandle, attribute: &str) -> Result<Token, EngineError> {
        if !self.index.contains_key(handle) {
            return Err(EngineError::UnknownResource {
                handle: handle.logical_id(),
            });
        }
        if !handle.kind().supports(attribute) {
            return Err(EngineError::UnsupportedAttribute {
                kind: handle.kind(),
                attribute: attribute.to_string(),
            });
        }
        Ok(Token::for_attribute(handle, attribute))
    }

    fn export(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        if self.exports.contains_key(name) {
            return Err(EngineError::ExportCollision {
                name: name.to_string(),
            });
        }
        debug!(export = %name, "published export");
        self.exports.insert(name.to_string(), value);
        Ok(())
    }
}

fn collect_tokens(value: &Value, out: &mut Vec<(String, String, String)>) {
    match value {
        Value::String(s) => {
            for caps in TOKEN_PATTERN.captures_iter(s) {
                out.push((
                    caps[1].to_string(),
                    caps[2].to_string(),
                    caps[3].to_string(),
                ));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
