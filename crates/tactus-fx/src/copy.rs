//! Copy: mixes an input channel's signals into the linked output channel.
//!
//! Mapped on inputs only. Each recycling pair owns one signal on the output
//! side; it is cleared in `run_pre` and receives the scaled sum of every
//! visible input signal in `run_post`, after the input chain processed them.

use crate::signal::signal_target;
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory,
    RecallParams, RecallResult, RecallTarget, RecyclingId, RecyclingRun, RunContext,
};

pub const NAME: &str = "copy";

pub struct CopyFactory;

impl RecallFactory for CopyFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let gain = get_param_or(params, "gain", 1.0, ParamValue::as_f64);
        Ok(vec![Port::float("gain", gain).with_range(PortRange::linear(0.0, 4.0, 1.0))])
    }

    fn channel_recall(
        &self,
        target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        // nothing to copy into without a destination
        let RecallTarget::Channel {
            destination: Some(_), ..
        } = target
        else {
            return Ok(None);
        };
        let channel = ChannelRun::new(NAME, |target| {
            let RecallTarget::Recycling {
                source,
                destination: Some(_),
            } = *target
            else {
                return None;
            };
            let recycling = RecyclingRun::new(NAME, MapChild::Destination, move |_| {
                Some(Box::new(CopySignal { source }) as Box<dyn Recall>)
            })
            .seeded();
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

/// Output-side signal fed from `source`.
#[derive(Debug, Clone)]
pub struct CopySignal {
    source: RecyclingId,
}

impl Recall for CopySignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some((recycling, signal)) = signal_target(cx) else {
            return Ok(());
        };
        cx.with_signal(recycling, signal, |s| s.clear_current())
    }

    fn run_post(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some((recycling, signal)) = signal_target(cx) else {
            return Ok(());
        };
        let gain = cx.port("gain")?.get();

        let mut mix: Vec<f64> = Vec::new();
        for source in cx.signals(self.source)? {
            cx.read_signal(self.source, source, |s| {
                if let Some(buffer) = s.current() {
                    if mix.len() < buffer.len() {
                        mix.resize(buffer.len(), 0.0);
                    }
                    for (m, sample) in mix.iter_mut().zip(buffer) {
                        *m += sample;
                    }
                }
            })?;
        }

        cx.with_signal(recycling, signal, |s| {
            if let Some(buffer) = s.current_mut() {
                for (out, m) in buffer.iter_mut().zip(&mix) {
                    *out += m * gain;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{drum, engine, output_signal, pcm, seed_input, tic};
    use approx::assert_relative_eq;
    use tactus_core::{params, ChannelKind, SoundScope};

    #[test]
    fn test_copy_mixes_into_output() {
        let engine = engine();
        let audio = drum(&engine);
        seed_input(&engine, audio, &pcm(&[0.25, 0.5, 0.75, 1.0]));
        engine.map_recall(audio, crate::stream::NAME, params! {}, ChannelKind::Input, 0, 0).unwrap();
        engine
            .map_recall(audio, super::NAME, params! { "gain" => 2.0 }, ChannelKind::Input, 0, 0)
            .unwrap();
        let context = engine.start_playback(audio, SoundScope::Playback).unwrap();

        tic(&engine, context);
        let out = output_signal(&engine, audio, context, |s| s.current().unwrap().to_vec()).unwrap();
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[3], 2.0);
    }

    #[test]
    fn test_copy_skips_outputs() {
        let engine = engine();
        let audio = drum(&engine);
        let container = engine
            .map_recall(audio, super::NAME, params! {}, ChannelKind::Output, 0, 0)
            .unwrap();
        assert!(engine.containers().get(container).unwrap().templates().is_empty());
    }
}
