//! Core types and algorithms for the stepweave scenario engine.
//!
//! This crate has no async runtime dependency. It provides the pieces a
//! scenario run is made of; the `stepweave` crate sequences them.
//!
//! # Core Types
//!
//! - [`Document`] - The universal payload for requests and responses
//! - [`merge`] / [`compose`] - Layered request composition
//! - [`ExecutionSettings`] / [`resolve`] - Per-call retry and validation policy
//! - [`Validator`] / [`ValidationSpec`] - Path-existence assertions
//! - [`VariableBinder`] / [`VariableCache`] - Values captured for later steps
//! - [`Step`] / [`Scenario`] - Declarative test cases
//! - [`StepweaveError`] - Error taxonomy
//!
//! # Seams
//!
//! - [`Transport`] - The protocol-specific call behind a service
//! - [`TransportRegistry`] - Service name to transport lookup
//! - [`PathQuery`] - Path evaluation used by assertions and bindings
//! - [`StepReporter`] - Step lifecycle events

mod bind;
mod document;
mod error;
mod merge;
mod path;
mod settings;
mod step;
mod traits;
mod validate;

pub use bind::{VariableBinder, VariableCache};
pub use document::{normalize_body, xml_to_document, Document, BODY_KEY};
pub use error::{ErrorKind, ScenarioFailure, StepweaveError};
pub use merge::{compose, compose_layers, merge, IGNORE_BASE_HEADERS};
pub use path::{is_definite, JsonPathQuery, PathError, PathQuery};
pub use settings::{resolve, resolve_optional, ExecutionSettings};
pub use step::{Scenario, Step, StepName};
pub use traits::{NoopReporter, StepReporter, TracingReporter, Transport, TransportRegistry};
pub use validate::{ValidationSpec, Validator};

pub use indexmap::IndexMap;
