//! Workflow definitions this orchestrator runs.

pub mod create_order;

use saga::{Result, Workflow, WorkflowRegistry};

/// Every workflow definition, built fresh.
pub fn all() -> Result<Vec<Workflow>> {
    Ok(vec![create_order::workflow()?])
}

/// Registry over [`all`].
pub fn registry() -> Result<WorkflowRegistry> {
    WorkflowRegistry::new(all()?)
}
