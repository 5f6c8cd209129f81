//! Domain model for the geoport importer.
//!
//! Holds the primitives cached between passes, the tag mapping that routes
//! them into destination tables, resolution outcomes, and the contract that
//! destination backends implement. Storage and the pipeline live in
//! `geoport-data`.
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod deploy;
pub mod element;
pub mod mapping;
pub mod resolve;
pub mod row;
pub mod sink;

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;

pub use deploy::{DeployError, DeploymentController, DeploymentState, DeploymentStatus};
pub use element::{ElementKind, ElementRef, Line, Member, PackedCoord, Point, Relation, Tags};
pub use mapping::{ANY_VALUE, Mapping, MappingError, TableMatch, TableSpec, TableType, TagMatcher};
pub use resolve::{Degradation, MAX_RELATION_DEPTH, Resolution};
pub use row::Row;
pub use sink::{Capabilities, Capability, Deployer, Finisher, Sink, SinkError};
