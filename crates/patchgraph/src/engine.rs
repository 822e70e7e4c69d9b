use std::sync::Arc;
use std::time::Duration;

use patchconf::HardwareConfig;

use crate::db::Database;
use crate::error::PatchError;
use crate::runner::{CommandOutput, CommandRunner, Invocation};

/// Tunables the engine reads from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound for each capability probe.
    pub probe_timeout: Duration,
    /// How long a spawned bridge must stay up before attach reports success.
    pub bridge_grace: Duration,
    /// Backend driver selected when the daemon is started.
    pub driver: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            bridge_grace: Duration::from_millis(250),
            driver: "dummy".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(hardware: &HardwareConfig) -> Self {
        Self {
            probe_timeout: hardware.probe.timeout(),
            bridge_grace: hardware.jack.bridge_grace(),
            driver: hardware.jack.driver.clone(),
        }
    }
}

/// Handle threaded through every operation: the desired-state store, the
/// process runner and settings. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) settings: EngineSettings,
}

impl Engine {
    pub fn new(db: Arc<Database>, runner: Arc<dyn CommandRunner>, settings: EngineSettings) -> Self {
        Self {
            db,
            runner,
            settings,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run a routing command to completion and require a zero exit.
    pub(crate) async fn exec(&self, invocation: Invocation) -> Result<CommandOutput, PatchError> {
        let output = self
            .runner
            .run(&invocation, None)
            .await
            .map_err(|e| PatchError::routing(&invocation.program, e))?;

        if !output.success() {
            tracing::debug!(
                command = %invocation,
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "command failed"
            );
        }

        output
            .check(&invocation.program)
            .map_err(|e| PatchError::routing(&invocation.program, e))
    }
}
