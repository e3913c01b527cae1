//! Per-invocation flags, passed explicitly to whatever needs them.

/// Global CLI flags for one `lsf` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunContext {
    pub debug: bool,
    pub verbose: bool,
    /// Apply the command globally rather than to the current environment
    pub global: bool,
}

impl RunContext {
    /// Debug implies verbose.
    pub fn is_verbose(&self) -> bool {
        self.verbose || self.debug
    }
}
