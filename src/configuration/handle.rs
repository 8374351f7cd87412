//! Installed-configuration handle
//!
//! Replaces a process-wide configuration singleton. A handle is created
//! empty, shared behind an `Arc`, and passed to every component that needs
//! the current chain.
//!
//! Lifecycle: `Empty` → `Installed(generation)`; each install supersedes the
//! previous snapshot. Snapshots are immutable; callers holding an old one
//! can ask whether it has been superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::configuration::ReplicatedTableConfiguration;
use super::errors::{ConfigurationError, ConfigurationResult};
use crate::observability::{log_event, Event};
use crate::view::View;

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Empty,
    Installed { generation: u64 },
}

/// An installed, validated configuration.
#[derive(Debug)]
pub struct InstalledConfiguration {
    configuration: ReplicatedTableConfiguration,
    generation: u64,
    installed_at: DateTime<Utc>,
    superseded: AtomicBool,
}

impl InstalledConfiguration {
    pub fn configuration(&self) -> &ReplicatedTableConfiguration {
        &self.configuration
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    /// A newer configuration has been installed since this one.
    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    /// The configuration's own lease has run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.installed_at + self.configuration.lease_duration() < now
    }

    /// `view`'s lease, counted from install time, has run out.
    pub fn is_view_expired(&self, view: &View, now: DateTime<Utc>) -> bool {
        view.is_expired(self.installed_at, now)
    }
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<Arc<InstalledConfiguration>>,
    generation: u64,
}

/// Shared holder of the current configuration.
#[derive(Debug, Default)]
pub struct ConfigurationHandle {
    slot: RwLock<Slot>,
}

impl ConfigurationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle with `configuration` already installed.
    pub fn with_configuration(
        configuration: ReplicatedTableConfiguration,
    ) -> ConfigurationResult<Arc<Self>> {
        let handle = Arc::new(Self::new());
        handle.install(configuration)?;
        Ok(handle)
    }

    pub fn state(&self) -> HandleState {
        let slot = self.read_slot();
        match slot.current {
            Some(ref installed) => HandleState::Installed {
                generation: installed.generation,
            },
            None => HandleState::Empty,
        }
    }

    /// Validate and install `configuration`.
    ///
    /// A view present in both the installed and the offered configuration
    /// must not go back in ViewId.
    pub fn install(
        &self,
        configuration: ReplicatedTableConfiguration,
    ) -> ConfigurationResult<Arc<InstalledConfiguration>> {
        configuration.validate()?;

        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(ref current) = slot.current {
            for (name, view) in configuration.views() {
                if let Some(installed) = current.configuration.get_view(name) {
                    if view.view_id() < installed.view_id() {
                        return Err(ConfigurationError::StaleConfiguration {
                            view: name.to_string(),
                            installed: installed.view_id(),
                            offered: view.view_id(),
                        });
                    }
                }
            }
        }

        slot.generation += 1;
        let installed = Arc::new(InstalledConfiguration {
            configuration,
            generation: slot.generation,
            installed_at: Utc::now(),
            superseded: AtomicBool::new(false),
        });
        if let Some(previous) = slot.current.replace(Arc::clone(&installed)) {
            previous.superseded.store(true, Ordering::Release);
        }

        let generation = installed.generation.to_string();
        let id = installed.configuration.id().to_string();
        log_event(
            Event::ConfigInstalled,
            &[("generation", &generation), ("id", &id)],
        );
        Ok(installed)
    }

    /// Snapshot of the installed configuration.
    pub fn current(&self) -> ConfigurationResult<Arc<InstalledConfiguration>> {
        self.read_slot()
            .current
            .clone()
            .ok_or(ConfigurationError::NotInstalled)
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
