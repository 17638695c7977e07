//! Generational-analysis session state and its completion marker file.

use ferrox_utils::sync::{AtomicU8, Ordering};
use std::fs::File;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GenAnalysisState {
    Disabled = 0,
    Enabled = 1,
    Done = 2,
}

/// Substitute `%p` in a path template with the current process id.
pub fn replace_pid(template: &str) -> String {
    template.replace("%p", &std::process::id().to_string())
}

/// Tracks a generation-aware diagnostic session. The session machinery
/// itself lives outside this crate; the finalizer worker only observes the
/// `Done` transition and writes the completion marker.
pub struct GenAnalysisControl {
    state: AtomicU8,
    completion_template: Option<String>,
}

impl GenAnalysisControl {
    pub(crate) fn new(completion_template: Option<String>) -> Self {
        Self {
            state: AtomicU8::new(GenAnalysisState::Disabled as u8),
            completion_template,
        }
    }

    pub fn state(&self) -> GenAnalysisState {
        match self.state.load(Ordering::Acquire) {
            1 => GenAnalysisState::Enabled,
            2 => GenAnalysisState::Done,
            _ => GenAnalysisState::Disabled,
        }
    }

    pub fn set_state(&self, state: GenAnalysisState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// If the session has finished, disable it and write the zero-byte
    /// completion file so external tooling can see the session ended.
    pub(crate) fn complete_if_done(&self) {
        let transitioned = self.state.compare_exchange(
            GenAnalysisState::Done as u8,
            GenAnalysisState::Disabled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if transitioned.is_err() {
            return;
        }
        let Some(template) = &self.completion_template else {
            return;
        };
        let path = replace_pid(template);
        match File::create(&path) {
            Ok(_) => debug!(target: "finalizer", path = %path, "wrote gen-analysis completion file"),
            Err(error) => {
                warn!(target: "finalizer", path = %path, %error, "failed to write gen-analysis completion file")
            }
        }
    }
}
