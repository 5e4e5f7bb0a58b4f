use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use fractal_core::Task;

/// Error type for program execution and adapter construction.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("computation failed: {0}")]
    Failed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown program: {0}")]
    UnknownProgram(String),
    #[error("adapter error: {0}")]
    Adapter(String),
}

impl ComputeError {
    /// Category recorded in the task's failure outcome.
    pub fn error_type(&self) -> &'static str {
        match self {
            ComputeError::Failed(_) => "compute_error",
            ComputeError::InvalidInput(_) => "input_error",
            ComputeError::UnknownProgram(_) => "unknown_program",
            ComputeError::Adapter(_) => "adapter_error",
        }
    }
}

/// A program a manager can run on behalf of the server.
///
/// The payload is opaque to everything except the program itself.
pub trait Program: Send + Sync {
    /// Name tasks use to select this program.
    fn name(&self) -> &str;

    fn compute(&self, payload: &Value) -> Result<Value, ComputeError>;
}

/// Returns its payload unchanged.
///
/// Two optional payload keys make it useful for exercising the queue:
/// `sleep_ms` delays the result, and `fail` turns the run into a failure
/// carrying that message.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProgram;

impl Program for EchoProgram {
    fn name(&self) -> &str {
        "echo"
    }

    fn compute(&self, payload: &Value) -> Result<Value, ComputeError> {
        if let Some(ms) = payload.get("sleep_ms") {
            let ms = ms
                .as_u64()
                .ok_or_else(|| ComputeError::InvalidInput("sleep_ms must be a non-negative integer".into()))?;
            std::thread::sleep(Duration::from_millis(ms));
        }
        if let Some(message) = payload.get("fail") {
            let message = message.as_str().unwrap_or("requested failure");
            return Err(ComputeError::Failed(message.to_string()));
        }
        Ok(payload.clone())
    }
}

/// Programs available to a manager, keyed by name.
#[derive(Default, Clone)]
pub struct ProgramRegistry {
    programs: HashMap<String, Arc<dyn Program>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in programs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoProgram));
        registry
    }

    pub fn register(&mut self, program: Arc<dyn Program>) {
        info!("Registered program: {}", program.name());
        self.programs.insert(program.name().to_string(), program);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Program>> {
        self.programs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Program names, i.e. the capabilities a manager advertises.
    pub fn names(&self) -> BTreeSet<String> {
        self.programs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn execute(&self, task: &Task) -> Result<Value, ComputeError> {
        let program = self
            .get(&task.program)
            .ok_or_else(|| ComputeError::UnknownProgram(task.program.clone()))?;
        program.compute(&task.payload)
    }
}

impl std::fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.names())
            .finish()
    }
}
