//! First-use trace rendering.

/// One rendered stack frame, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub text: String,
    /// The frame executes profiler code (the preloaded library itself).
    pub own: bool,
}

impl StackFrame {
    pub fn new(text: impl Into<String>, own: bool) -> Self {
        Self {
            text: text.into(),
            own,
        }
    }
}

/// Render the frames the target program cares about as a tab-indented,
/// newline-terminated blob.
///
/// Leading profiler frames are dropped except for the one right before the
/// first foreign frame, which stays so the hand-off into the profiler is
/// visible. Everything from the first foreign frame on is kept verbatim.
pub fn render_first_use_trace(frames: &[StackFrame]) -> String {
    let Some(boundary) = frames.iter().position(|frame| !frame.own) else {
        return String::new();
    };
    let start = boundary.saturating_sub(1);

    let capacity = frames[start..].iter().map(|f| f.text.len() + 2).sum();
    let mut out = String::with_capacity(capacity);
    for frame in &frames[start..] {
        out.push('\t');
        out.push_str(&frame.text);
        out.push('\n');
    }
    out
}
