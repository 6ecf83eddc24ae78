mod logging;
mod model;
mod scf_routine;

pub use model::LinearModel;
pub use scf_routine::{Evaluator, ScfError, ScfResult, ScfRoutine};
