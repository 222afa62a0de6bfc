pub mod engine;
pub mod profile;
pub mod results;
pub mod sequence;

pub use engine::{
    ExecutionStatus, Progress, RunnerControls, SequenceResult, SequenceRunner, StepResult,
};
pub use profile::{DutProfile, ProfileStore};
pub use results::{ResultFormat, ResultsStore, RunSummary};
pub use sequence::{Sequence, SequenceStore, Step};
