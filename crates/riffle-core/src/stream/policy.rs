//! Execution-strategy policy for fused iterators.
//!
//! [`CompilePolicy`] controls the one-time decision the dispatcher makes
//! on the first pull: run the interpreter, or lower the pipeline to native
//! code. Compilation has a fixed setup cost, so the default only compiles
//! pipelines that are both long (many retained steps) and fed by a source
//! expected to produce a very large number of elements.

/// When the dispatcher is allowed to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompileMode {
    /// Compile when the pipeline clears both thresholds.
    #[default]
    Auto,
    /// Never compile; always interpret.
    Never,
    /// Compile unconditionally, ignoring the thresholds.
    Always,
}

/// Controls interpreter-versus-compiled selection on the first pull.
///
/// With [`CompileMode::Auto`], the pipeline compiles only when **both**:
/// - the retained step count is at least [`min_steps`](Self::min_steps), and
/// - the source's length hint is at least
///   [`min_source_hint`](Self::min_source_hint).
///
/// Anything shorter or smaller interprets: the interpreter wins whenever
/// the compile latency cannot be amortized over the stream. Without the
/// `jit` cargo feature every mode interprets.
#[derive(Debug, Clone)]
pub struct CompilePolicy {
    /// Compilation mode.
    pub mode: CompileMode,
    /// Minimum retained step count before compiling.
    pub min_steps: usize,
    /// Minimum source length hint before compiling.
    pub min_source_hint: usize,
}

impl Default for CompilePolicy {
    fn default() -> Self {
        Self {
            mode: CompileMode::Auto,
            min_steps: 10,
            min_source_hint: 50_000_000,
        }
    }
}

impl CompilePolicy {
    /// Sets the compilation mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: CompileMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the minimum retained step count.
    #[must_use]
    pub const fn with_min_steps(mut self, min_steps: usize) -> Self {
        self.min_steps = min_steps;
        self
    }

    /// Sets the minimum source length hint.
    #[must_use]
    pub const fn with_min_source_hint(mut self, min_source_hint: usize) -> Self {
        self.min_source_hint = min_source_hint;
        self
    }
}
