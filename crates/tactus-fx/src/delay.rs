//! Delay: an audio-level step clock, one step counter per sound scope.
//!
//! A step lasts `4 * tact` beats at `bpm`, rounded to whole tics on average.
//! The first tic starts step 0. Each step is published during `run_pre`
//! together with the tic it fired in, so recalls of the same context can act
//! on it with [`step_for`].
//!
//! Whether a listener sees a step in the tic it fired depends on run order:
//! a listener bound after the delay runs later in the same stage and sees it
//! at once, one bound before it sees it a tic late. Either way every step is
//! seen exactly once.

use crate::error::check_range;
use std::sync::Arc;
use tactus_core::{
    get_param_or, AudioId, ParamValue, Port, PortRange, PortSet, Recall, RecallFactory, RecallParams,
    RecallResult, RunContext, SoundScope,
};

pub const NAME: &str = "delay";

/// Port holding the current step of `scope`.
pub fn step_port(scope: SoundScope) -> String {
    format!("{}-step", scope.name())
}

/// Port holding the tic the current step of `scope` fired in.
pub fn step_tic_port(scope: SoundScope) -> String {
    format!("{}-step-tic", scope.name())
}

/// Port holding the delay's run order in its `scope` context.
pub fn order_port(scope: SoundScope) -> String {
    format!("{}-order", scope.name())
}

/// The step a recall with `run_order` should act on during `tic`, if any.
///
/// Only valid for recalls bound in the same context as the delay and reading
/// during `run_pre`.
pub fn step_for(ports: &PortSet, scope: SoundScope, tic: u64, run_order: u32) -> RecallResult<Option<i64>> {
    let fired = ports.get(&step_tic_port(scope))?.get();
    if fired < 0.0 {
        return Ok(None);
    }
    let delay_order = ports.get(&order_port(scope))?.get();
    let lag = if run_order as f64 > delay_order { 0 } else { 1 };
    if fired as u64 + lag == tic {
        Ok(Some(ports.get(&step_port(scope))?.get().round() as i64))
    } else {
        Ok(None)
    }
}

pub struct DelayFactory;

impl RecallFactory for DelayFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn ports(&self, params: &RecallParams) -> RecallResult<Vec<Port>> {
        let bpm = get_param_or(params, "bpm", 120.0, ParamValue::as_f64);
        let bpm = check_range("bpm", bpm, 1.0, 999.0, "1..=999 bpm")?;
        let tact = get_param_or(params, "tact", 0.0625, ParamValue::as_f64);
        let tact = check_range("tact", tact, 1.0 / 64.0, 1.0, "1/64..=1")?;

        let mut ports = vec![
            Port::float("bpm", bpm).with_range(PortRange::linear(1.0, 999.0, 120.0)),
            Port::float("tact", tact).with_range(PortRange::linear(1.0 / 64.0, 1.0, 0.0625)),
            Port::float("delay", 0.0),
        ];
        for scope in SoundScope::ALL.iter() {
            ports.push(Port::int(step_port(*scope), -1));
            ports.push(Port::int(step_tic_port(*scope), -1));
            ports.push(Port::int(order_port(*scope), -1));
        }
        Ok(ports)
    }

    fn audio_recall(
        &self,
        audio: AudioId,
        _ports: &Arc<PortSet>,
        _params: &RecallParams,
    ) -> RecallResult<Option<Box<dyn Recall>>> {
        Ok(Some(Box::new(Delay::new(audio))))
    }
}

#[derive(Debug, Clone)]
pub struct Delay {
    audio: AudioId,
    /// Tics into the current step.
    position: f64,
}

impl Delay {
    pub fn new(audio: AudioId) -> Self {
        Self { audio, position: 0.0 }
    }
}

impl Recall for Delay {
    fn name(&self) -> &str {
        NAME
    }

    fn run_init(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let scope = cx.sound_scope();
        self.position = 0.0;
        cx.port(&step_port(scope))?.set(-1.0);
        cx.port(&step_tic_port(scope))?.set(-1.0);
        cx.port(&order_port(scope))?.set(cx.run_order() as f64);
        Ok(())
    }

    fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
        let Some(params) = cx.graph().audio(self.audio).map(|a| a.params()) else {
            return Ok(());
        };
        let bpm = cx.port("bpm")?.get().max(1.0);
        let tact = cx.port("tact")?.get();
        let frames_per_step = params.samplerate as f64 * 60.0 / bpm * 4.0 * tact;
        let delay = (frames_per_step / params.buffer_size.max(1) as f64).max(1.0);
        cx.port("delay")?.set(delay);

        let scope = cx.sound_scope();
        if self.position < 1.0 {
            let step = cx.port(&step_port(scope))?;
            let next = step.get().round() + 1.0;
            step.set(next);
            cx.port(&step_tic_port(scope))?.set(cx.tic().tic as f64);
            tracing::trace!(audio = %self.audio, scope = scope.name(), step = next, "delay step");
        }
        self.position += 1.0;
        if self.position >= delay {
            self.position -= delay;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drum, engine, tic};
    use std::sync::{Mutex, OnceLock};
    use tactus_core::{params, ChannelKind, ContainerId, EngineContext, PortValue, RecallTarget};

    type Seen = Arc<Mutex<Vec<(u64, i64)>>>;

    /// Records every step it is told to act on.
    #[derive(Clone)]
    struct Listener {
        delay: Arc<OnceLock<Arc<PortSet>>>,
        seen: Seen,
    }

    impl Recall for Listener {
        fn name(&self) -> &str {
            "listener"
        }

        fn run_pre(&mut self, cx: &mut RunContext<'_>) -> RecallResult {
            let Some(delay) = self.delay.get() else {
                return Ok(());
            };
            let tic = cx.tic().tic;
            if let Some(step) = step_for(delay, cx.sound_scope(), tic, cx.run_order())? {
                self.seen.lock().unwrap().push((tic, step));
            }
            Ok(())
        }
    }

    fn listen(engine: &EngineContext, audio: AudioId, delay: &Arc<OnceLock<Arc<PortSet>>>) -> Seen {
        let seen = Seen::default();
        let listener = Listener {
            delay: Arc::clone(delay),
            seen: Arc::clone(&seen),
        };
        engine
            .add_template(Box::new(listener), RecallTarget::Audio(audio), PortSet::empty(), Default::default())
            .unwrap();
        seen
    }

    /// Four frames per beat at the default bpm, so a half-bar tact is two
    /// tics per step.
    fn map_delay(engine: &EngineContext, audio: AudioId) -> ContainerId {
        engine.set_samplerate(audio, 8).unwrap();
        engine
            .map_recall(audio, NAME, params! { "tact" => 0.5 }, ChannelKind::Output, 0, 0)
            .unwrap()
    }

    fn step(engine: &EngineContext, container: ContainerId, scope: SoundScope) -> i64 {
        match engine.read_port(container, &step_port(scope)).unwrap() {
            PortValue::Int(step) => step,
            other => panic!("unexpected step value {other:?}"),
        }
    }

    #[test]
    fn test_steps_every_delay_tics() {
        let engine = engine();
        let audio = drum(&engine);
        let container = map_delay(&engine, audio);
        let context = engine.start_playback(audio, SoundScope::Sequencer).unwrap();

        let mut steps = Vec::new();
        for _ in 0..5 {
            tic(&engine, context);
            steps.push(step(&engine, container, SoundScope::Sequencer));
        }
        assert_eq!(steps, vec![0, 0, 1, 1, 2]);
        assert_eq!(engine.read_port(container, "delay").unwrap(), PortValue::Float(2.0));
        assert_eq!(step(&engine, container, SoundScope::Playback), -1);
    }

    #[test]
    fn test_listener_latency_follows_run_order() {
        let engine = engine();
        let audio = drum(&engine);
        let ports = Arc::new(OnceLock::new());
        let early = listen(&engine, audio, &ports);
        let container = map_delay(&engine, audio);
        assert!(ports.set(engine.containers().ports(container).unwrap()).is_ok());
        let late = listen(&engine, audio, &ports);

        let context = engine.start_playback(audio, SoundScope::Sequencer).unwrap();
        let orders: Vec<u32> = engine
            .recall_ids()
            .in_context(context)
            .iter()
            .filter_map(|id| engine.recall_ids().get(*id))
            .map(|entry| entry.run_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);

        for _ in 0..4 {
            tic(&engine, context);
        }
        let early = early.lock().unwrap().clone();
        let late = late.lock().unwrap().clone();
        assert_eq!(early.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(late.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![0, 1]);
        // the listener ahead of the delay hears each step one tic late
        for ((early_tic, _), (late_tic, _)) in early.iter().zip(&late) {
            assert_eq!(*early_tic, late_tic + 1);
        }
    }
}
