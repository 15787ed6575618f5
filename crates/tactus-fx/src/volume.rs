//! Volume: scales every visible source signal by the `volume` port.

use crate::error::check_range;
use crate::signal::with_current;
use std::sync::Arc;
use tactus_core::{
    get_param_or, ChannelRun, MapChild, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory,
    RecallParams, RecallResult, RecallTarget, RecyclingRun, RunContext,
};

pub const NAME: &str = "volume";

pub struct VolumeFactory;

impl RecallFactory for VolumeFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let volume = get_param_or(params, "volume", 1.0, ParamValue::as_f64);
        let volume = check_range("volume", volume, 0.0, 2.0, "0.0..=2.0")?;
        Ok(vec![Port::float("volume", volume).with_range(PortRange::linear(0.0, 2.0, 1.0))])
    }

    fn channel_recall(
        &self,
        _target: &RecallTarget,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        let channel = ChannelRun::new(NAME, |_| {
            let recycling = RecyclingRun::new(NAME, MapChild::Source, |_| {
                Some(Box::new(VolumeSignal) as Box<dyn Recall>)
            });
            Some(Box::new(recycling) as Box<dyn Recall>)
        });
        Ok(Some(Box::new(channel)))
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSignal;

impl Recall for VolumeSignal {
    fn name(&self) -> &str {
        NAME
    }

    fn run_inter(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let volume = cx.port("volume")?.get();
        if volume == 1.0 {
            return Ok(());
        }
        with_current(cx, |buffer| {
            for sample in buffer {
                *sample *= volume;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{drum, engine, input_signal, pcm, seed_input, tic};
    use approx::assert_relative_eq;
    use tactus_core::{params, ChannelKind, PortValue, SoundScope};

    #[test]
    fn test_volume_scales_stream() {
        let engine = engine();
        let audio = drum(&engine);
        seed_input(&engine, audio, &pcm(&[0.5; 4]));
        engine.map_recall(audio, crate::stream::NAME, params! {}, ChannelKind::Input, 0, 0).unwrap();
        let volume = engine
            .map_recall(audio, super::NAME, params! { "volume" => 0.5 }, ChannelKind::Input, 0, 0)
            .unwrap();
        let context = engine.start_playback(audio, SoundScope::Playback).unwrap();

        tic(&engine, context);
        let sample = input_signal(&engine, audio, context, |s| s.current().unwrap()[0]);
        assert_relative_eq!(sample.unwrap(), 0.25);

        engine.write_port(volume, "volume", PortValue::Float(2.0)).unwrap();
        assert_eq!(engine.read_port(volume, "volume").unwrap(), PortValue::Float(2.0));
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let engine = engine();
        let audio = drum(&engine);
        let err = engine
            .map_recall(audio, super::NAME, params! { "volume" => 9.0 }, ChannelKind::Input, 0, 0)
            .unwrap_err();
        assert!(err.to_string().contains("volume"));
    }
}
