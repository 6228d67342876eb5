use crate::convert::{Converter, JsonConverter, StringConverter};
use crate::task::{FileStreamSourceTask, SourceTask};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type TaskFactory = Arc<dyn Fn() -> Box<dyn SourceTask> + Send + Sync>;
pub type ConverterFactory = Arc<dyn Fn() -> Box<dyn Converter> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown source task: '{0}'")]
    UnknownTask(String),
    #[error("Unknown converter: '{0}'")]
    UnknownConverter(String),
}

/// Maps configured task and converter names to constructors.
///
/// Clones share the same tables, so registrations made after the registry
/// was handed out are still visible.
#[derive(Clone, Default)]
pub struct Registry {
    tasks: Arc<RwLock<HashMap<String, TaskFactory>>>,
    converters: Arc<RwLock<HashMap<String, ConverterFactory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the `file-stream` task and the `json` and
    /// `string` converters.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_task("file-stream", Arc::new(|| Box::new(FileStreamSourceTask::new())));
        registry.register_converter("json", Arc::new(|| Box::new(JsonConverter::default())));
        registry.register_converter("string", Arc::new(|| Box::new(StringConverter)));
        registry
    }

    pub fn register_task(&self, name: impl Into<String>, factory: TaskFactory) {
        let name = name.into();
        tracing::debug!(task = %name, "Registered source task");
        self.tasks.write().insert(name, factory);
    }

    pub fn register_converter(&self, name: impl Into<String>, factory: ConverterFactory) {
        let name = name.into();
        tracing::debug!(converter = %name, "Registered converter");
        self.converters.write().insert(name, factory);
    }

    pub fn create_task(&self, name: &str) -> Result<Box<dyn SourceTask>, RegistryError> {
        let factory = self
            .tasks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))?;
        Ok(factory())
    }

    pub fn create_converter(&self, name: &str) -> Result<Box<dyn Converter>, RegistryError> {
        let factory = self
            .converters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownConverter(name.to_string()))?;
        Ok(factory())
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn converter_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.converters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tasks", &self.task_names())
            .field("converters", &self.converter_names())
            .finish()
    }
}
