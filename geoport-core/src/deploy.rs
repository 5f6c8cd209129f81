//! Staging → production → backup lifecycle of an imported dataset.
//!
//! The controller owns the state machine and its preconditions; the backend
//! only performs the namespace swaps. A failed precondition is reported
//! before the backend is touched, so rejected operations never change state.

use std::fmt;

use log::info;
use thiserror::Error;

use crate::{Deployer, SinkError};

/// Which namespaces currently hold data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentStatus {
    /// Freshly imported, not yet live.
    pub staging: bool,
    pub production: bool,
    pub backup: bool,
}

impl DeploymentStatus {
    /// Lifecycle state implied by the populated namespaces.
    #[must_use]
    pub const fn state(self) -> DeploymentState {
        match (self.production, self.backup, self.staging) {
            (true, true, _) => DeploymentState::ProductionWithBackup,
            (true, false, _) => DeploymentState::Production,
            (false, _, true) => DeploymentState::Staging,
            (false, _, false) => DeploymentState::Empty,
        }
    }
}

/// Lifecycle states of the destination dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    /// Nothing imported yet.
    Empty,
    Staging,
    Production,
    /// Production is live and the previous production is retained.
    ProductionWithBackup,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Empty => "empty",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::ProductionWithBackup => "production with backup",
        };
        f.write_str(label)
    }
}

/// Errors raised by deployment operations.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("no staged import to deploy")]
    NothingStaged,
    #[error("no backup available")]
    NoBackup,
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Drives deployment operations against a [`Deployer`].
///
/// # Examples
/// ```
/// use geoport_core::{DeployError, DeploymentController, DeploymentStatus, Deployer, SinkError};
///
/// #[derive(Default)]
/// struct Flags(DeploymentStatus);
///
/// impl Deployer for Flags {
///     fn status(&mut self) -> Result<DeploymentStatus, SinkError> { Ok(self.0) }
///     fn deploy(&mut self) -> Result<(), SinkError> {
///         self.0.backup = self.0.production;
///         self.0.production = true;
///         self.0.staging = false;
///         Ok(())
///     }
///     fn revert_deploy(&mut self) -> Result<(), SinkError> { Ok(()) }
///     fn remove_backup(&mut self) -> Result<(), SinkError> { Ok(()) }
/// }
///
/// let mut flags = Flags::default();
/// let mut controller = DeploymentController::new(&mut flags);
/// assert!(matches!(controller.revert_deploy(), Err(DeployError::NoBackup)));
/// ```
pub struct DeploymentController<'a> {
    deployer: &'a mut dyn Deployer,
}

impl<'a> DeploymentController<'a> {
    pub fn new(deployer: &'a mut dyn Deployer) -> Self {
        Self { deployer }
    }

    /// Current lifecycle state.
    pub fn state(&mut self) -> Result<DeploymentState, DeployError> {
        Ok(self.deployer.status()?.state())
    }

    /// Promote staging into production, retaining production as backup.
    pub fn deploy(&mut self) -> Result<DeploymentState, DeployError> {
        let status = self.deployer.status()?;
        if !status.staging {
            return Err(DeployError::NothingStaged);
        }
        if status.backup && status.production {
            info!("Replacing existing backup with current production");
        }
        self.deployer.deploy()?;
        self.report("deployed import to production")
    }

    /// Restore the backup into production.
    pub fn revert_deploy(&mut self) -> Result<DeploymentState, DeployError> {
        if !self.deployer.status()?.backup {
            return Err(DeployError::NoBackup);
        }
        self.deployer.revert_deploy()?;
        self.report("reverted production to backup")
    }

    /// Delete the retained backup.
    pub fn remove_backup(&mut self) -> Result<DeploymentState, DeployError> {
        if !self.deployer.status()?.backup {
            return Err(DeployError::NoBackup);
        }
        self.deployer.remove_backup()?;
        self.report("removed backup")
    }

    fn report(&mut self, action: &str) -> Result<DeploymentState, DeployError> {
        let state = self.state()?;
        info!("{action}; dataset is now {state}");
        Ok(state)
    }
}
