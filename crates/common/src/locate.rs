//! Locating the step a failure belongs to

use crate::event::StepRecord;

/// Step name used when no step in the tree carries an error
pub const UNKNOWN_STEP: &str = "Unknown step";

/// First step in pre-order that carries an error itself.
///
/// A step with an error is returned without looking at its children; the
/// children of a step are searched only when the step has no error.
pub fn find_failing_step(steps: &[StepRecord]) -> Option<&StepRecord> {
    steps.iter().find_map(|step| {
        if step.has_error() {
            Some(step)
        } else {
            find_failing_step(&step.steps)
        }
    })
}

/// Title of the failing step, or [`UNKNOWN_STEP`].
pub fn failing_step_title(steps: &[StepRecord]) -> &str {
    find_failing_step(steps)
        .map(|s| s.title.as_str())
        .unwrap_or(UNKNOWN_STEP)
}
