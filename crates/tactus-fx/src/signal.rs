//! Buffer access shared by the signal-level recalls.

use tactus_core::{RecallResult, RecallTarget, RecyclingId, RunContext, SignalId};

/// The signal a signal-level recall is attached to.
pub(crate) fn signal_target(cx: &RunContext<'_>) -> Option<(RecyclingId, SignalId)> {
    match cx.target() {
        RecallTarget::Signal { recycling, signal } => Some((recycling, signal)),
        _ => None,
    }
}

/// Run `f` on the current buffer of the target signal.
///
/// A signal removed earlier in the tic is skipped; its child is cancelled at
/// the next `run_pre` of the recycling level.
pub(crate) fn with_current(cx: &RunContext<'_>, f: impl FnOnce(&mut [f64])) -> RecallResult {
    let Some((recycling, signal)) = signal_target(cx) else {
        return Ok(());
    };
    if !cx.recycling(recycling)?.contains_signal(signal) {
        return Ok(());
    }
    cx.with_signal(recycling, signal, |s| {
        if let Some(buffer) = s.current_mut() {
            f(buffer);
        }
    })
}

/// Read the current buffer of the target signal.
pub(crate) fn read_current<R>(cx: &RunContext<'_>, f: impl FnOnce(&[f64]) -> R) -> RecallResult<Option<R>> {
    let Some((recycling, signal)) = signal_target(cx) else {
        return Ok(None);
    };
    if !cx.recycling(recycling)?.contains_signal(signal) {
        return Ok(None);
    }
    cx.read_signal(recycling, signal, |s| s.current().map(f))
}
