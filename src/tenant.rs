use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::engine::{Engine, EngineSettings};
use crate::limits::*;
use crate::source::JsonFileSource;

/// Manages per-center engines. Each training center gets its own Engine over
/// `<data_dir>/<center>.json`. Center = database name from the pgwire
/// connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: EngineSettings,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, settings: EngineSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get or lazily create an engine for the given center. The snapshot file
    /// need not exist yet; reads fail with a source error until it does.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let path = self.data_dir.join(format!("{safe_name}.json"));
        let source = Arc::new(JsonFileSource::new(path));
        let engine = self
            .engines
            .entry(tenant.to_string())
            .or_insert_with(|| {
                info!("center {tenant}: snapshot {}", source.path().display());
                Arc::new(Engine::with_loader(source, self.settings))
            })
            .value()
            .clone();

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
