//! Peak: publishes the largest absolute sample of the current tic.
//!
//! The channel level resets `peak` in `run_pre`; the signal children raise
//! it in `run_post`, which runs before the channel's own `run_post`.

use crate::signal::read_current;
use std::sync::Arc;
use tactus_core::{
    MapChild, Port, PortSet, Recall, RecallFactory, RecallParams, RecallResult, RecallTarget, RecyclingRun,
    RunContext,
};

pub const NAME: &str = "peak";

pub struct PeakFactory;

impl RecallFactory for PeakFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, _params: &RecallParams) -> RecallResult<Vec<Port>> {
        Ok(vec![Port::float("peak", 0.0)])
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(PeakChannel)))
    }
}

#[derive(Debug, Clone)]
pub struct PeakChannel;

impl Recall for PeakChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        cx.port("peak")?.set(0.0);
        Ok(())
    }

    fn new_child(&self, target: &RecallTarget) -> Option<Box<dyn Recall>> {
        match target {
            RecallTarget::Recycling { .. } => Some(Box::new(RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(PeakSignal) as Box<dyn Recall>)
            }))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeakSignal;

impl Recall for PeakSignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_post(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let peak = read_current(cx, |buffer| buffer.iter().fold(0.0_f64, |acc, s| acc.max(s.abs())))?;
        if let Some(peak) = peak {
            cx.port("peak")?.raise(peak);
        }
        Ok(())
    }
}
