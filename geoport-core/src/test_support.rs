//! In-memory [`Sink`] used by unit and behaviour tests.
//!
//! Clones share state, so a test can hand one clone to the write pass and
//! inspect the recorded batches through another.

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use geo::{Coord, Geometry};

use crate::{
    Capabilities, Capability, Deployer, DeploymentStatus, ElementKind, ElementRef, Finisher, Row,
    Sink, SinkError, TableMatch, TableType, Tags,
};

#[derive(Debug, Default)]
struct Inner {
    initialised: bool,
    finished: bool,
    insert_calls: usize,
    batches: Vec<Vec<Row>>,
    staging: Option<Vec<Row>>,
    production: Option<Vec<Row>>,
    backup: Option<Vec<Row>>,
}

/// Recording sink with the full staging/production/backup lifecycle.
#[derive(Debug, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
    capabilities: Capabilities,
    insert_delays: BTreeMap<ElementKind, Duration>,
    fail_on_insert: Option<usize>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Sink advertising every capability.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capabilities: Capabilities::all(),
            insert_delays: BTreeMap::new(),
            fail_on_insert: None,
        }
    }

    /// Restrict the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep before storing any batch whose first row has `kind`.
    #[must_use]
    pub fn with_insert_delay(mut self, kind: ElementKind, delay: Duration) -> Self {
        self.insert_delays.insert(kind, delay);
        self
    }

    /// Fail the `call`-th insert (1-based) with a backend error.
    #[must_use]
    pub fn failing_on_insert(mut self, call: usize) -> Self {
        self.fail_on_insert = Some(call);
        self
    }

    /// Batches in the order they were inserted.
    pub fn batches(&self) -> Vec<Vec<Row>> {
        self.lock().batches.clone()
    }

    /// Every inserted row, flattened in insertion order.
    pub fn rows(&self) -> Vec<Row> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    pub fn staging_rows(&self) -> Option<Vec<Row>> {
        self.lock().staging.clone()
    }

    pub fn production_rows(&self) -> Option<Vec<Row>> {
        self.lock().production.clone()
    }

    pub fn backup_rows(&self) -> Option<Vec<Row>> {
        self.lock().backup.clone()
    }

    /// Whether [`Finisher::finish`] ran.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Point row in `table` with a fixed location.
    pub fn sample_row(table: &str, id: u64) -> Row {
        let table_match = TableMatch {
            table: table.to_owned(),
            table_type: TableType::Point,
            key: "amenity".into(),
            value: "cafe".into(),
        };
        let tags = Tags::from([("amenity".to_owned(), "cafe".to_owned())]);
        Row::from_match(
            table_match,
            ElementRef::point(id),
            tags,
            Geometry::Point(geo::Point(Coord { x: 13.4, y: 52.5 })),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for MemorySink {
    fn init(&mut self) -> Result<(), SinkError> {
        let mut inner = self.lock();
        inner.initialised = true;
        inner.finished = false;
        inner.batches.clear();
        inner.staging = Some(Vec::new());
        Ok(())
    }

    fn insert(&mut self, batch: &[Row]) -> Result<(), SinkError> {
        if let Some(delay) = batch
            .first()
            .and_then(|row| self.insert_delays.get(&row.element.kind))
        {
            thread::sleep(*delay);
        }
        let mut inner = self.lock();
        if !inner.initialised {
            return Err(SinkError::NotInitialised);
        }
        inner.insert_calls += 1;
        if self.fail_on_insert == Some(inner.insert_calls) {
            return Err(SinkError::backend(
                "insert batch",
                io::Error::other("injected insert failure"),
            ));
        }
        inner
            .staging
            .get_or_insert_with(Vec::new)
            .extend_from_slice(batch);
        inner.batches.push(batch.to_vec());
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn as_finisher(&mut self) -> Option<&mut dyn Finisher> {
        if self.capabilities.contains(Capability::Finisher) {
            Some(self)
        } else {
            None
        }
    }

    fn as_deployer(&mut self) -> Option<&mut dyn Deployer> {
        if self.capabilities.contains(Capability::Deployer) {
            Some(self)
        } else {
            None
        }
    }
}

impl Finisher for MemorySink {
    fn finish(&mut self) -> Result<(), SinkError> {
        self.lock().finished = true;
        Ok(())
    }
}

impl Deployer for MemorySink {
    fn status(&mut self) -> Result<DeploymentStatus, SinkError> {
        let inner = self.lock();
        Ok(DeploymentStatus {
            staging: inner.staging.is_some(),
            production: inner.production.is_some(),
            backup: inner.backup.is_some(),
        })
    }

    fn deploy(&mut self) -> Result<(), SinkError> {
        let mut inner = self.lock();
        if let Some(previous) = inner.production.take() {
            inner.backup = Some(previous);
        }
        inner.production = inner.staging.take();
        Ok(())
    }

    fn revert_deploy(&mut self) -> Result<(), SinkError> {
        let mut inner = self.lock();
        inner.staging = inner.production.take();
        inner.production = inner.backup.take();
        Ok(())
    }

    fn remove_backup(&mut self) -> Result<(), SinkError> {
        self.lock().backup = None;
        Ok(())
    }
}
