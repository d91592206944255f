//! JSON Schema compilation and validation for task and workflow I/O.
//!
//! Schemas are compiled once at registration; a malformed schema is a
//! startup error, never a runtime one.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Which side of a task a schema guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Input,
    Output,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Input => f.write_str("input"),
            SchemaKind::Output => f.write_str("output"),
        }
    }
}

/// A value failed validation against a definition's schema.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("{kind} for '{slug}' failed schema validation: {}", errors.join("; "))]
    SchemaValidation {
        slug: String,
        kind: SchemaKind,
        errors: Vec<String>,
    },
}

/// A compiled JSON Schema plus the raw document it came from.
#[derive(Clone)]
pub struct CompiledSchema {
    raw: Value,
    validator: Arc<jsonschema::Validator>,
}

impl CompiledSchema {
    /// Compile `raw`. The error string describes why the schema is invalid.
    pub fn compile(raw: &Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(raw).map_err(|e| e.to_string())?;
        Ok(Self {
            raw: raw.clone(),
            validator: Arc::new(validator),
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Validate `instance`, collecting every violation.
    pub fn validate(&self, slug: &str, kind: SchemaKind, instance: &Value) -> Result<(), SchemaError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::SchemaValidation {
                slug: slug.to_string(),
                kind,
                errors,
            })
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").field("raw", &self.raw).finish()
    }
}
