//! Which execution backends this process can use.

use std::sync::Arc;

use qd_config::{ExecutionMode, QuanticsConfig};
use qd_platform::{DirectoryEngine, PlatformAdapter};

use crate::error::{AppError, AppResult};

/// An opened workflow store and the adapter bound to it.
#[derive(Clone)]
pub struct PlatformHandle {
    pub engine: Arc<DirectoryEngine>,
    pub adapter: Arc<PlatformAdapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Local,
    Platform,
}

/// Built once at startup and handed to whatever needs it.
#[derive(Clone, Default)]
pub struct Capabilities {
    platform: Option<PlatformHandle>,
}

impl Capabilities {
    pub fn local_only() -> Self {
        Self::default()
    }

    pub fn with_platform(engine: Arc<DirectoryEngine>, code_label: Option<&str>) -> Self {
        let adapter = Arc::new(PlatformAdapter::new(engine.clone(), code_label));
        Self {
            platform: Some(PlatformHandle { engine, adapter }),
        }
    }

    /// The platform is available when a store is configured and opens.
    pub fn detect(config: &QuanticsConfig) -> Self {
        let Some(store) = &config.aiida_store else {
            tracing::debug!("no workflow store configured, local execution only");
            return Self::local_only();
        };
        match DirectoryEngine::open(store) {
            Ok(engine) => {
                Self::with_platform(Arc::new(engine), config.aiida_code_label.as_deref())
            }
            Err(e) => {
                tracing::warn!(
                    store = %store.display(),
                    error = %e,
                    "workflow platform not available"
                );
                Self::local_only()
            }
        }
    }

    pub fn platform_available(&self) -> bool {
        self.platform.is_some()
    }

    pub fn platform(&self) -> Option<&PlatformHandle> {
        self.platform.as_ref()
    }

    pub fn resolve_mode(&self, requested: ExecutionMode) -> AppResult<ResolvedMode> {
        match (requested, self.platform_available()) {
            (ExecutionMode::Local, _) => Ok(ResolvedMode::Local),
            (ExecutionMode::Platform, true) | (ExecutionMode::Auto, true) => {
                Ok(ResolvedMode::Platform)
            }
            (ExecutionMode::Platform, false) => Err(AppError::Setup {
                message: "workflow platform requested but not available; \
                          set aiida_store to a workflow store directory"
                    .to_string(),
            }),
            (ExecutionMode::Auto, false) => Ok(ResolvedMode::Local),
        }
    }
}
