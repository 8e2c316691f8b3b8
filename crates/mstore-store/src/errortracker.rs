//! Accumulated non-fatal load errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One recorded problem: a message and a detail string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    pub message: String,
    pub detail: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// Per-course error log plus the courses that failed to load at all.
#[derive(Clone, Debug, Default)]
pub struct ErrorTracker {
    course_errors: BTreeMap<String, Vec<LoadError>>,
    errored_courses: BTreeMap<String, Vec<LoadError>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal error against `course_id`.
    pub fn record(&mut self, course_id: &str, error: LoadError) {
        warn!(course = course_id, message = %error.message, detail = %error.detail, "course load error");
        self.course_errors
            .entry(course_id.to_string())
            .or_default()
            .push(error);
    }

    /// Record that `course_dir` could not be loaded.
    pub fn record_failed_course(&mut self, course_dir: &str, error: LoadError) {
        warn!(course_dir, message = %error.message, "course failed to load");
        self.errored_courses
            .entry(course_dir.to_string())
            .or_default()
            .push(error);
    }

    pub fn course_errors(&self, course_id: &str) -> Vec<LoadError> {
        self.course_errors.get(course_id).cloned().unwrap_or_default()
    }

    pub fn errored_courses(&self) -> &BTreeMap<String, Vec<LoadError>> {
        &self.errored_courses
    }
}
