//! Process-wide stats manager.
//!
//! Subsystems declare their groups and stats with [`register`] during
//! startup; [`init`] then builds the manager once. Declarations arriving
//! after that are rejected.

use std::path::Path;
use std::sync::OnceLock;

use framestat_core::{Error, Result};
use parking_lot::Mutex;

use crate::config::StatsConfig;
use crate::manager::StatManager;
use crate::registry::Registry;

/// Declarations collected before init.
static PENDING: Mutex<Option<Registry>> = Mutex::new(None);

static MANAGER: OnceLock<StatManager> = OnceLock::new();

/// Add declarations to the pending registry.
pub fn register(declare: impl FnOnce(&mut Registry) -> Result<()>) -> Result<()> {
    let mut pending = PENDING.lock();
    if MANAGER.get().is_some() {
        return Err(Error::RegisteredAfterInit);
    }
    declare(pending.get_or_insert_with(Registry::new))
}

/// Build the global manager from everything registered so far.
pub fn init(config: StatsConfig) -> Result<&'static StatManager> {
    init_with(config, None)
}

/// [`init`] with the configuration loaded from `path` (defaults when the
/// file is absent). Saved sets are written back to `path`.
pub fn init_from_path(path: &Path) -> Result<&'static StatManager> {
    let config = StatsConfig::load_or_default(path)?;
    init_with(config, Some(path))
}

fn init_with(config: StatsConfig, path: Option<&Path>) -> Result<&'static StatManager> {
    // Held until the manager is published so `register` cannot slip in between.
    let mut pending = PENDING.lock();
    if MANAGER.get().is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let registry = pending.take().unwrap_or_default();
    let mut manager = StatManager::with_system_clock(registry, config)?;
    if let Some(path) = path {
        manager = manager.with_config_path(path);
    }
    MANAGER
        .set(manager)
        .map_err(|_| Error::AlreadyInitialized)?;
    MANAGER.get().ok_or(Error::AlreadyInitialized)
}

/// The global manager, once initialized.
#[inline]
pub fn global() -> Option<&'static StatManager> {
    MANAGER.get()
}

/// Check if the global manager is initialized.
#[must_use]
pub fn is_initialized() -> bool {
    MANAGER.get().is_some()
}

/// Flush and detach the global manager's sinks.
pub fn shutdown() {
    if let Some(manager) = MANAGER.get() {
        manager.shutdown_sinks();
    }
}
