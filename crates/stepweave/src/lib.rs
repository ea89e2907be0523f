//! A declarative, data-driven scenario engine for service tests.
//!
//! Scenarios are ordered steps read from documents. Each step composes a
//! request from layered templates, calls a service through a pluggable
//! [`Transport`] under a retry policy, asserts on the response and captures
//! variables for later steps.
//!
//! # Example
//!
//! ```rust,ignore
//! use stepweave::prelude::*;
//!
//! let factory = TransportFactory::new().register("REST", |definition| {
//!     Ok(std::sync::Arc::new(RestTransport::new(definition)?))
//! });
//! let catalog = ServiceCatalog::from_definitions(&services, &factory)?;
//!
//! let orchestrator = std::sync::Arc::new(
//!     Orchestrator::builder()
//!         .registry(catalog)
//!         .substitute_variables(true)
//!         .build()?,
//! );
//!
//! let scenarios = Scenario::list_from_suite(&suite)?;
//! for report in orchestrator.run_suite(scenarios).await {
//!     match report.result {
//!         Ok(run) => println!("{} passed in {:?}", report.name, run.elapsed),
//!         Err(failure) => println!("{} failed: {}", report.name, failure),
//!     }
//! }
//! ```

mod cancel;
mod catalog;
mod orchestrator;
mod retry;
mod substitute;

// Re-export core types
pub use stepweave_core::*;

// Export engine types
pub use cancel::{CancelHandle, CancelSignal};
pub use catalog::{
    ApiDefinition, CatalogBuilder, ServiceCatalog, ServiceDefinition, TransportFactory,
};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, ScenarioReport, ScenarioRun, StepRecord,
};
pub use retry::{RetryExecutor, RetryOutcome};
pub use substitute::substitute;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CancelHandle, CancelSignal, Document, ExecutionSettings, Orchestrator,
        OrchestratorBuilder, RetryExecutor, Scenario, ScenarioFailure, ScenarioReport,
        ScenarioRun, ServiceCatalog, Step, StepName, StepReporter, StepweaveError, Transport,
        TransportFactory, TransportRegistry, ValidationSpec, VariableCache,
    };
}
