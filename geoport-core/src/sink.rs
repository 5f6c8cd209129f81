//! Destination storage contract.
//!
//! Every backend implements [`Sink`]. Finishing and deployment are optional
//! behaviours advertised through [`Capabilities`]; callers check the set once
//! when the import is configured instead of probing on every call.

use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::{Row, deploy::DeploymentStatus};

/// Optional behaviour a backend may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Post-import work such as building indexes ([`Finisher`]).
    Finisher,
    /// Staging/production/backup lifecycle ([`Deployer`]).
    Deployer,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finisher => f.write_str("finisher"),
            Self::Deployer => f.write_str("deployer"),
        }
    }
}

/// Set of capabilities advertised by a backend or required by an invocation.
///
/// # Examples
/// ```
/// use geoport_core::{Capabilities, Capability};
///
/// let offered = Capabilities::none().with(Capability::Finisher);
/// let required = Capabilities::none()
///     .with(Capability::Finisher)
///     .with(Capability::Deployer);
/// assert_eq!(offered.first_missing(required), Some(Capability::Deployer));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    finisher: bool,
    deployer: bool,
}

impl Capabilities {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            finisher: false,
            deployer: false,
        }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self {
            finisher: true,
            deployer: true,
        }
    }

    #[must_use]
    pub const fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Finisher => self.finisher = true,
            Capability::Deployer => self.deployer = true,
        }
        self
    }

    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::Finisher => self.finisher,
            Capability::Deployer => self.deployer,
        }
    }

    /// First capability of `required` this set lacks.
    #[must_use]
    pub fn first_missing(self, required: Self) -> Option<Capability> {
        [Capability::Finisher, Capability::Deployer]
            .into_iter()
            .find(|capability| required.contains(*capability) && !self.contains(*capability))
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.finisher && !self.deployer
    }
}

/// Errors reported by destination backends.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backend failed while performing `operation`.
    #[error("sink failed to {operation}")]
    Backend {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A row addressed a table the backend does not manage.
    #[error("row for {element} targets unknown table {table:?}")]
    UnknownTable { table: String, element: String },
    /// A mapping table name collides with a name the backend keeps for itself.
    #[error("table name {table:?} is reserved by the destination")]
    ReservedTableName { table: String },
    /// Rows arrived before [`Sink::init`].
    #[error("sink received rows before it was initialised")]
    NotInitialised,
    /// The backend advertised a capability but cannot provide it.
    #[error("sink does not implement the {0} capability")]
    Unsupported(Capability),
}

impl SinkError {
    /// Wrap a backend-specific error.
    pub fn backend<E>(operation: &'static str, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend {
            operation,
            source: Box::new(source),
        }
    }
}

/// Destination storage for resolved rows.
///
/// Calls arrive from a single flusher thread, strictly in batch order.
pub trait Sink: Send {
    /// Prepare an empty staging area for a fresh import.
    fn init(&mut self) -> Result<(), SinkError>;

    /// Persist one batch of rows.
    fn insert(&mut self, batch: &[Row]) -> Result<(), SinkError>;

    /// Optional behaviour this backend provides.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Access the finishing behaviour, when advertised.
    fn as_finisher(&mut self) -> Option<&mut dyn Finisher> {
        None
    }

    /// Access the deployment behaviour, when advertised.
    fn as_deployer(&mut self) -> Option<&mut dyn Deployer> {
        None
    }
}

/// Post-import finalisation.
pub trait Finisher {
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Namespace swaps backing the deployment lifecycle.
///
/// Implementations perform each swap atomically. Precondition checks live in
/// [`crate::DeploymentController`].
pub trait Deployer {
    /// Which namespaces currently hold data.
    fn status(&mut self) -> Result<DeploymentStatus, SinkError>;

    /// Move production to backup (replacing any older backup) and staging to
    /// production.
    fn deploy(&mut self) -> Result<(), SinkError>;

    /// Move production back to staging and backup to production.
    fn revert_deploy(&mut self) -> Result<(), SinkError>;

    /// Drop the backup namespace.
    fn remove_backup(&mut self) -> Result<(), SinkError>;
}
