//! Stream: plays the recycling's template one buffer per tic.
//!
//! Each recycling gets a signal of its own, seeded from the template. The
//! first tic plays buffer 0; every later `run_pre` advances by one buffer.
//! At the end of the stream the signal is removed and the recall completes,
//! which in turn completes its recycling and channel levels.

use crate::signal::signal_target;
use tactus_core::{
    get_param_or, AbilityFlags, ChannelRun, MapChild, ParamValue, Port, PortSet, Recall, RecallFactory,
    RecallFlags, RecallParams, RecallResult, RecallTarget, RecyclingRun, RunContext,
};
use std::sync::Arc;

pub const NAME: &str = "stream";

pub struct StreamFactory;

impl RecallFactory for StreamFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, _params: &RecallParams) -> RecallResult<Vec<Port>> {
        Ok(Vec::new())
    }

    fn flags(&self) -> RecallFlags {
        RecallFlags::propagate_done()
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let ability = if get_param_or(params, "playback-only", false, ParamValue::as_bool) {
            AbilityFlags::PLAYBACK
        } else {
            AbilityFlags::ALL
        };
        let channel = ChannelRun::new(NAME, move |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(StreamSignal::default()) as Box<dyn Recall>)
            })
            .seeded()
            .with_ability(ability);
            Some(Box::new(recycling) as Box<dyn Recall>)
        })
        .with_ability(ability);
        Ok(Some(Box::new(channel)))
    }
}

/// Signal level of a stream.
#[derive(Debug, Clone, Default)]
pub struct StreamSignal {
    started: bool,
}

impl Recall for StreamSignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some((recycling, signal)) = signal_target(cx) else {
            return Ok(());
        };
        // other recalls' signals on the same recycling are left alone
        let owner = cx.read_signal(recycling, signal, |s| s.recall_id())?;
        if owner != Some(cx.recall_id()) {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            return Ok(());
        }

        if !cx.with_signal(recycling, signal, |s| s.advance())? {
            cx.remove_signal(recycling, signal)?;
            tracing::trace!(signal = %signal, recycling = %recycling, "stream finished");
            cx.mark_done();
        }
        Ok(())
    }
}
