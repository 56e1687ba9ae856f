//! Scenario providers
//!
//! A provider turns one requested topology change into the validators that
//! must pass first and the ordered plan of tasks that carries it out.
//! Checks that decide whether the change can be attempted at all belong in
//! the provider's constructor and fail there with an
//! [`ErrorCategory::Argument`](crate::error::ErrorCategory::Argument) error.

use crate::error::Classified;
use crate::plan::TaskPlan;
use crate::task::Task;
use crate::validator::Validator;

/// A task behind a box, as stored in plans.
pub type BoxedTask<E> = Box<dyn Task<Error = E>>;
/// A validator behind a box.
pub type BoxedValidator<E> = Box<dyn Validator<Error = E>>;

/// One topology change, ready to validate and run.
pub trait ScenarioProvider {
    /// Error shared by the provider's validators and tasks.
    type Error: std::error::Error + Classified + Send + Sync + 'static;

    /// Scenario name used in logs and reports.
    fn name(&self) -> &str;

    /// Validators in the order they must run.
    fn validators(&self) -> Vec<BoxedValidator<Self::Error>>;

    /// Tasks with their prerequisites, in execution order.
    fn plan(&self) -> TaskPlan<BoxedTask<Self::Error>>;

    /// The flattened plan.
    fn tasks(&self) -> Vec<BoxedTask<Self::Error>> {
        self.plan().into_items()
    }

    /// Compensating tasks, `None` when the scenario cannot be rolled back.
    fn rollback_tasks(&self) -> Option<Vec<BoxedTask<Self::Error>>> {
        None
    }
}

/// Names of the validators a provider would run.
pub fn validator_names<P: ScenarioProvider + ?Sized>(provider: &P) -> Vec<String> {
    provider
        .validators()
        .iter()
        .map(|v| v.name().to_string())
        .collect()
}

/// Names of the tasks a provider would run, in order.
pub fn task_names<P: ScenarioProvider + ?Sized>(provider: &P) -> Vec<String> {
    provider
        .tasks()
        .iter()
        .map(|t| t.name().to_string())
        .collect()
}
