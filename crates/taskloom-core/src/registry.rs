//! Definition registry: the immutable slug -> definition lookup table.
//!
//! Tasks and workflows share one slug namespace. Registration happens on a
//! [`RegistryBuilder`]; `build()` freezes it into a [`DefinitionRegistry`]
//! that the queue, orchestrator and runner share through an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use taskloom_types::job::{JobKind, INLINE_BUCKET};

use crate::definition::{TaskDefinition, WorkflowDefinition};
use crate::schema::{CompiledSchema, SchemaError, SchemaKind};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The slug is already taken by a task or a workflow.
    #[error("slug '{0}' is already registered")]
    DuplicateSlug(String),

    /// The slug collides with the checkpoint bucket for inline steps.
    #[error("slug '{0}' is reserved")]
    ReservedSlug(String),

    #[error("unknown {kind} definition '{slug}'")]
    UnknownDefinition { kind: &'static str, slug: String },

    #[error("invalid {kind} schema for '{slug}': {reason}")]
    InvalidSchema {
        slug: String,
        kind: SchemaKind,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Registered entries
// ---------------------------------------------------------------------------

/// A task definition with its schemas compiled.
#[derive(Debug)]
pub struct RegisteredTask {
    pub definition: TaskDefinition,
    input: Option<CompiledSchema>,
    output: Option<CompiledSchema>,
}

impl RegisteredTask {
    fn new(definition: TaskDefinition) -> Result<Self, RegistryError> {
        let input = compile(&definition.slug, SchemaKind::Input, definition.input_schema.as_ref())?;
        let output = compile(
            &definition.slug,
            SchemaKind::Output,
            definition.output_schema.as_ref(),
        )?;
        Ok(Self {
            definition,
            input,
            output,
        })
    }

    pub fn slug(&self) -> &str {
        &self.definition.slug
    }

    pub fn validate_input(&self, input: &Value) -> Result<(), SchemaError> {
        match &self.input {
            Some(schema) => schema.validate(self.slug(), SchemaKind::Input, input),
            None => Ok(()),
        }
    }

    pub fn validate_output(&self, output: &Value) -> Result<(), SchemaError> {
        match &self.output {
            Some(schema) => schema.validate(self.slug(), SchemaKind::Output, output),
            None => Ok(()),
        }
    }
}

/// A workflow definition with its input schema compiled.
#[derive(Debug)]
pub struct RegisteredWorkflow {
    pub definition: WorkflowDefinition,
    input: Option<CompiledSchema>,
}

impl RegisteredWorkflow {
    fn new(definition: WorkflowDefinition) -> Result<Self, RegistryError> {
        let input = compile(&definition.slug, SchemaKind::Input, definition.input_schema.as_ref())?;
        Ok(Self { definition, input })
    }

    pub fn slug(&self) -> &str {
        &self.definition.slug
    }

    pub fn validate_input(&self, input: &Value) -> Result<(), SchemaError> {
        match &self.input {
            Some(schema) => schema.validate(self.slug(), SchemaKind::Input, input),
            None => Ok(()),
        }
    }
}

fn compile(
    slug: &str,
    kind: SchemaKind,
    raw: Option<&Value>,
) -> Result<Option<CompiledSchema>, RegistryError> {
    raw.map(|raw| {
        CompiledSchema::compile(raw).map_err(|reason| RegistryError::InvalidSchema {
            slug: slug.to_string(),
            kind,
            reason,
        })
    })
    .transpose()
}

/// A resolved definition.
#[derive(Debug, Clone)]
pub enum Definition {
    Task(Arc<RegisteredTask>),
    Workflow(Arc<RegisteredWorkflow>),
}

impl Definition {
    pub fn slug(&self) -> &str {
        match self {
            Definition::Task(task) => task.slug(),
            Definition::Workflow(workflow) => workflow.slug(),
        }
    }

    pub fn validate_input(&self, input: &Value) -> Result<(), SchemaError> {
        match self {
            Definition::Task(task) => task.validate_input(input),
            Definition::Workflow(workflow) => workflow.validate_input(input),
        }
    }
}

/// Either kind of definition, as accepted by [`RegistryBuilder::register`].
pub enum NewDefinition {
    Task(TaskDefinition),
    Workflow(WorkflowDefinition),
}

impl From<TaskDefinition> for NewDefinition {
    fn from(def: TaskDefinition) -> Self {
        NewDefinition::Task(def)
    }
}

impl From<WorkflowDefinition> for NewDefinition {
    fn from(def: WorkflowDefinition) -> Self {
        NewDefinition::Workflow(def)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Mutable registration phase. Consumed by `build()`.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tasks: HashMap<String, Arc<RegisteredTask>>,
    workflows: HashMap<String, Arc<RegisteredWorkflow>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task or workflow. Fails on a slug collision in either
    /// namespace, on the reserved inline slug, or on a schema that does not
    /// compile.
    pub fn register(&mut self, definition: impl Into<NewDefinition>) -> Result<&mut Self, RegistryError> {
        match definition.into() {
            NewDefinition::Task(def) => {
                self.ensure_free(&def.slug)?;
                let entry = RegisteredTask::new(def)?;
                tracing::debug!(slug = entry.slug(), "registered task");
                self.tasks.insert(entry.slug().to_string(), Arc::new(entry));
            }
            NewDefinition::Workflow(def) => {
                self.ensure_free(&def.slug)?;
                let entry = RegisteredWorkflow::new(def)?;
                tracing::debug!(slug = entry.slug(), "registered workflow");
                self.workflows
                    .insert(entry.slug().to_string(), Arc::new(entry));
            }
        }
        Ok(self)
    }

    fn ensure_free(&self, slug: &str) -> Result<(), RegistryError> {
        if slug == INLINE_BUCKET {
            return Err(RegistryError::ReservedSlug(slug.to_string()));
        }
        if self.tasks.contains_key(slug) || self.workflows.contains_key(slug) {
            return Err(RegistryError::DuplicateSlug(slug.to_string()));
        }
        Ok(())
    }

    pub fn build(self) -> DefinitionRegistry {
        tracing::info!(
            tasks = self.tasks.len(),
            workflows = self.workflows.len(),
            "definition registry ready"
        );
        DefinitionRegistry {
            tasks: self.tasks,
            workflows: self.workflows,
        }
    }
}

// ---------------------------------------------------------------------------
// DefinitionRegistry
// ---------------------------------------------------------------------------

/// Read-only registry of task and workflow definitions.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    tasks: HashMap<String, Arc<RegisteredTask>>,
    workflows: HashMap<String, Arc<RegisteredWorkflow>>,
}

impl DefinitionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve the definition a job kind refers to.
    pub fn resolve(&self, kind: &JobKind) -> Result<Definition, RegistryError> {
        match kind {
            JobKind::Task(slug) => self.task(slug).map(Definition::Task),
            JobKind::Workflow(slug) => self.workflow(slug).map(Definition::Workflow),
        }
    }

    pub fn task(&self, slug: &str) -> Result<Arc<RegisteredTask>, RegistryError> {
        self.tasks
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDefinition {
                kind: "task",
                slug: slug.to_string(),
            })
    }

    pub fn workflow(&self, slug: &str) -> Result<Arc<RegisteredWorkflow>, RegistryError> {
        self.workflows
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDefinition {
                kind: "workflow",
                slug: slug.to_string(),
            })
    }

    /// Registered task slugs, sorted.
    pub fn task_slugs(&self) -> Vec<&str> {
        let mut slugs: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        slugs
    }

    /// Registered workflow slugs, sorted.
    pub fn workflow_slugs(&self) -> Vec<&str> {
        let mut slugs: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        slugs
    }
}
