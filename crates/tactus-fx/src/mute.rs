//! Mute: silences the visible source signals while `muted` is set.

use crate::signal::with_current;
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortSet, Recall, RecallFactory, RecallParams,
    RecallResult, RecallTarget, RecyclingRun, RunContext,
};

pub const NAME: &str = "mute";

pub struct MuteFactory;

impl RecallFactory for MuteFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let muted = get_param_or(params, "muted", false, ParamValue::as_bool);
        Ok(vec![Port::bool("muted", muted)])
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let channel = ChannelRun::new(NAME, |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(MuteSignal) as Box<dyn Recall>)
            });
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

#[derive(Debug, Clone)]
pub struct MuteSignal;

impl Recall for MuteSignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_inter(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        if !cx.port("muted")?.get_bool() {
            return Ok(());
        }
        with_current(cx, |buffer| buffer.fill(0.0))
    }
}
