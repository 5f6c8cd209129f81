//! Behavioural tests for the deployment lifecycle.

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::{cell::RefCell, fs, path::PathBuf};

use geoport_core::{DeployError, DeploymentController, DeploymentStatus, Deployer, SinkError};

/// Datasets identified by name in each namespace.
#[derive(Debug, Default)]
struct NamedDatasets {
    staging: Option<String>,
    production: Option<String>,
    backup: Option<String>,
}

impl Deployer for NamedDatasets {
    fn status(&mut self) -> Result<DeploymentStatus, SinkError> {
        Ok(DeploymentStatus {
            staging: self.staging.is_some(),
            production: self.production.is_some(),
            backup: self.backup.is_some(),
        })
    }

    fn deploy(&mut self) -> Result<(), SinkError> {
        if let Some(previous) = self.production.take() {
            self.backup = Some(previous);
        }
        self.production = self.staging.take();
        Ok(())
    }

    fn revert_deploy(&mut self) -> Result<(), SinkError> {
        self.staging = self.production.take();
        self.production = self.backup.take();
        Ok(())
    }

    fn remove_backup(&mut self) -> Result<(), SinkError> {
        self.backup = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DeploymentWorld {
    datasets: RefCell<NamedDatasets>,
    error: RefCell<Option<DeployError>>,
}

#[fixture]
fn world() -> DeploymentWorld {
    DeploymentWorld::default()
}

fn unquote(name: &str) -> String {
    name.trim_matches('"').to_owned()
}

#[given("a staged import called {name:word}")]
fn staged_import(world: &DeploymentWorld, name: String) {
    world.datasets.borrow_mut().staging = Some(unquote(&name));
}

#[given("production holds the dataset {name:word}")]
fn production_dataset(world: &DeploymentWorld, name: String) {
    world.datasets.borrow_mut().production = Some(unquote(&name));
}

#[when("I deploy the staged import")]
fn deploy(world: &DeploymentWorld) {
    let mut datasets = world.datasets.borrow_mut();
    DeploymentController::new(&mut *datasets)
        .deploy()
        .expect("deploy should succeed");
}

#[when("I revert the deployment")]
fn revert(world: &DeploymentWorld) {
    let mut datasets = world.datasets.borrow_mut();
    if let Err(err) = DeploymentController::new(&mut *datasets).revert_deploy() {
        world.error.replace(Some(err));
    }
}

#[then("production holds {name:word}")]
fn production_holds(world: &DeploymentWorld, name: String) {
    assert_eq!(
        world.datasets.borrow().production.as_deref(),
        Some(unquote(&name).as_str())
    );
}

#[then("staging holds {name:word}")]
fn staging_holds(world: &DeploymentWorld, name: String) {
    assert_eq!(
        world.datasets.borrow().staging.as_deref(),
        Some(unquote(&name).as_str())
    );
}

#[then("the backup holds {name:word}")]
fn backup_holds(world: &DeploymentWorld, name: String) {
    assert_eq!(
        world.datasets.borrow().backup.as_deref(),
        Some(unquote(&name).as_str())
    );
}

#[then("no backup is retained")]
fn no_backup(world: &DeploymentWorld) {
    assert!(world.datasets.borrow().backup.is_none());
}

#[then("a missing backup error is returned")]
fn missing_backup(world: &DeploymentWorld) {
    match world.error.borrow().as_ref() {
        Some(DeployError::NoBackup) => {}
        other => panic!("expected a missing backup error, got {other:?}"),
    }
}

#[scenario(path = "tests/features/deployment.feature", index = 0)]
fn deploying_first_import(world: DeploymentWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/deployment.feature", index = 1)]
fn deploying_over_production(world: DeploymentWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/deployment.feature", index = 2)]
fn reverting_restores_backup(world: DeploymentWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/deployment.feature", index = 3)]
fn reverting_without_backup(world: DeploymentWorld) {
    let _ = world;
}

#[test]
fn scenario_indices_follow_feature_order() {
    let feature =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/features/deployment.feature");
    let contents = fs::read_to_string(&feature).unwrap_or_else(|err| {
        panic!("failed to read feature file {feature:?}: {err}");
    });
    let titles: Vec<&str> = contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Scenario: "))
        .collect();
    assert_eq!(
        titles,
        [
            "deploying a first import",
            "deploying over an existing production",
            "reverting restores the backup",
            "reverting without a backup",
        ],
        "scenario order changed in feature file"
    );
}
