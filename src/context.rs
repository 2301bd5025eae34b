use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::Settings;
use crate::error::ManageError;
use crate::exec::{Executor, Target};
use crate::paths;
use crate::registry::Registry;
use crate::remote::Remotes;

/// Everything an operation needs, built once in `main` and shared by `Arc`.
#[derive(Clone)]
pub struct Context {
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
    pub cache: Arc<CacheManager<Vec<String>>>,
    pub executor: Arc<Executor>,
    pub remotes: Arc<Remotes>,
}

impl Context {
    pub fn new(settings: Settings) -> Result<Self, ManageError> {
        let executor = Executor::new(settings.flake_dir()).with_run_logs(paths::run_logs_dir());
        Self::with_executor(settings, executor)
    }

    pub fn with_executor(settings: Settings, executor: Executor) -> Result<Self, ManageError> {
        let registry = Registry::with_builtins(&settings.config.actions)?;
        let cache = CacheManager::new().with_max_entries(settings.config.cache.max_entries);
        let remotes = Remotes::from_config(&settings.config.remote);
        tracing::debug!(
            actions = registry.len(),
            remotes = settings.config.remote.len(),
            "context ready"
        );
        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(registry),
            cache: Arc::new(cache),
            executor: Arc::new(executor),
            remotes: Arc::new(remotes),
        })
    }

    /// `--remote NAME` → ssh target; otherwise local.
    pub fn target(&self, remote: Option<&str>) -> Result<Target, ManageError> {
        match remote {
            Some(name) => {
                let machine = self.remotes.get(name)?;
                if !machine.enabled {
                    return Err(ManageError::Validation {
                        message: format!("remote '{name}' is disabled in the config"),
                    });
                }
                Ok(Target::Remote(machine.clone()))
            }
            None => Ok(Target::Local),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::config::tests::test_settings;

    /// Context over a scratch directory with no run logs.
    pub fn test_context(dir: &std::path::Path) -> Context {
        let settings = test_settings(dir);
        Context::with_executor(settings, Executor::new(dir)).unwrap()
    }

    #[test]
    fn unknown_remote_target_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        assert!(matches!(ctx.target(Some("nope")), Err(ManageError::UnknownRemote { .. })));
        assert!(matches!(ctx.target(None), Ok(Target::Local)));
    }
}
