
pub mod config;
pub mod input;
pub mod memory;
pub use config::*;
pub use input::*;
pub use memory::*;

use crate::cache::{ self, CacheState, ProbeBuffer, SetRange };
use crate::channel::{ Channel, PerfChannel };
use crate::error::Result;

/// Harness used to run trials for registered input classes.
///
/// Trials
/// ======
///
/// A single trial ([`LeakHarness::run_trial`]) runs the following steps:
///
/// 1. Optionally train: for `train_iters` iterations, reset experiment
///    memory to the trainer's default (if any), run the trainer's setup,
///    flush (fully on the first iteration, keeping predictor state after),
///    and run the training callback.
/// 2. Reset experiment memory to the class default and run the class setup.
/// 3. Flush. If training ran, predictor state is kept.
/// 4. Prime the cache (or start the clock in stopwatch mode, or start
///    counting mispredicts in mispredict mode).
/// 5. Run the victim.
/// 6. Probe the cache (or stop the clock/count), producing a [`CacheState`].
/// 7. Report any counter failure latched by the channel.
///
/// Noise
/// =====
///
/// A class is only worth comparing against another class when it produces
/// the same snapshot every time. [`LeakHarness::run_multi_compare`] runs a
/// baseline trial followed by `repeats` more trials and counts how many
/// disagree with the baseline.
///
pub struct LeakHarness<C: Channel> {
    channel: C,
    cfg: HarnessConfig,
    probe: ProbeBuffer,
    mem: ExperimentMemory,
    pub inputs: InputRegistry,
}

/// A class baseline and how many repeated trials disagreed with it.
#[derive(Clone, Debug)]
pub struct Observation {
    pub class: ClassId,
    pub baseline: CacheState,
    pub noise: usize,
    pub repeats: usize,
}
impl Observation {
    /// True when every repeated trial matched the baseline.
    pub fn is_conclusive(&self) -> bool { self.noise == 0 }
}
impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.baseline)?;
        if !self.is_conclusive() {
            writeln!(f, "INCONCLUSIVE: {}", self.noise)?;
        }
        Ok(())
    }
}

impl <C: Channel> LeakHarness<C> {
    pub(crate) fn new(cfg: HarnessConfig, channel: C, probe: ProbeBuffer,
        mem: ExperimentMemory, inputs: InputRegistry) -> Self
    {
        Self { channel, cfg, probe, mem, inputs }
    }

    pub fn config(&self) -> &HarnessConfig { &self.cfg }

    /// Trial parameters may be changed between trials. `geometry`,
    /// `mem_words` and `pinned_core` only take effect in
    /// [`HarnessConfig::emit`]; the probing buffer keeps the geometry it
    /// was created with.
    pub fn config_mut(&mut self) -> &mut HarnessConfig { &mut self.cfg }
    pub fn channel(&mut self) -> &mut C { &mut self.channel }
    pub fn probe_buffer(&self) -> &ProbeBuffer { &self.probe }
    pub fn memory(&self) -> &ExperimentMemory { &self.mem }
    pub fn memory_mut(&mut self) -> &mut ExperimentMemory { &mut self.mem }

    /// Register an input class.
    pub fn register(&mut self, class: InputClass) -> Result<()> {
        self.inputs.register(class)
    }

    /// Register the trainer shared by both classes.
    pub fn set_trainer(&mut self, trainer: Trainer) {
        self.inputs.set_trainer(trainer);
    }

    /// The set range used for cross-class comparisons.
    pub fn range(&self) -> Result<SetRange> {
        self.cfg.range_preset.range(self.probe.geometry())
    }

    /// Run a single trial for `class`.
    pub fn run_trial(&mut self, class: ClassId) -> Result<CacheState> {
        let cfg = self.cfg;
        let Self { channel, probe, mem, inputs, .. } = self;
        let geometry = probe.geometry();
        let (trainer, input) = inputs.split_mut(class)?;

        let mut trained = false;
        if let Some(trainer) = trainer {
            for iter in 0..cfg.train_iters {
                if let Some(val) = trainer.mem_default {
                    mem.fill(val);
                }
                (trainer.setup)(&mut TrialCtx::new(channel, mem));
                if iter == 0 {
                    channel.full_flush();
                } else {
                    channel.flush_excluding_predictor();
                }
                (trainer.train)(&mut TrialCtx::new(channel, mem));
                trained = true;
            }
        }

        mem.fill(input.mem_default);
        (input.setup)(&mut TrialCtx::new(channel, mem));

        if trained {
            channel.flush_excluding_predictor();
        } else {
            channel.full_flush();
        }

        let before = channel.sample();
        let res = match cfg.mode {
            MeasureMode::PrimeProbe => {
                cache::prime(channel, probe);
                (input.victim)(&mut TrialCtx::new(channel, mem));
                cache::probe(channel, probe)
            },
            MeasureMode::Stopwatch => {
                let mut res = CacheState::new(geometry);
                cache::start_clock(channel, &mut res);
                (input.victim)(&mut TrialCtx::new(channel, mem));
                cache::stop_clock(channel, &mut res);
                res
            },
            MeasureMode::Mispredicts => {
                let mut res = CacheState::new(geometry);
                cache::start_branch_count(channel, &mut res);
                (input.victim)(&mut TrialCtx::new(channel, mem));
                cache::stop_branch_count(channel, &mut res);
                res
            },
        };
        let delta = channel.sample().delta(&before);
        channel.check()?;
        tracing::trace!("class {}: {} evicted ({})",
            class, res.evicted_count(), delta);
        Ok(res)
    }

    /// Returns true if two trials of the same class disagree under the
    /// current measurement mode.
    fn trials_differ(&self, a: &CacheState, b: &CacheState) -> bool {
        match self.cfg.mode {
            MeasureMode::PrimeProbe => cache::compare(a, b),
            MeasureMode::Stopwatch => {
                cache::compare_time(a, b, self.cfg.time_threshold)
            },
            MeasureMode::Mispredicts => cache::compare_mispredicts(a, b),
        }
    }

    /// Run a baseline trial and `repeats` more, returning the baseline and
    /// the number of repeated trials that disagreed with it.
    pub fn run_multi_compare(&mut self, class: ClassId, repeats: usize)
        -> Result<(CacheState, usize)>
    {
        let baseline = self.run_trial(class)?;
        let mut noise = 0;
        for _ in 0..repeats {
            let res = self.run_trial(class)?;
            if self.trials_differ(&baseline, &res) {
                noise += 1;
            }
        }
        if noise != 0 {
            tracing::warn!("class {}: {}/{} trials disagreed with baseline",
                class, noise, repeats);
        } else {
            tracing::debug!("class {}: reproducible over {} trials",
                class, repeats + 1);
        }
        Ok((baseline, noise))
    }

    /// Observe a single class using the configured number of repeats.
    pub fn observe(&mut self, class: ClassId) -> Result<Observation> {
        let repeats = self.cfg.repeats;
        let (baseline, noise) = self.run_multi_compare(class, repeats)?;
        Ok(Observation { class, baseline, noise, repeats })
    }
}

impl LeakHarness<PerfChannel> {
    /// Allow the channel to touch and flush the probing buffer and
    /// experiment memory.
    pub fn register_regions(&mut self) {
        let (base, len) = (self.probe.base(), self.probe.len());
        self.channel.register_region(base, len);
        let (base, len) = (self.mem.base(), self.mem.len());
        self.channel.register_region(base, len);
    }
}

impl HarnessConfig {
    /// Create a [LeakHarness] measuring the host this process runs on.
    pub fn emit_host(self) -> Result<LeakHarness<PerfChannel>> {
        let channel = PerfChannel::new(self.geometry.line())?;
        let mut res = self.emit(channel)?;
        res.register_regions();
        Ok(res)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::CacheGeometry;
    use crate::channel::SimChannel;
    use crate::error::LeakError;
    use crate::verdict::Verdict;

    /// Records the flushes issued by the harness, and optionally fails the
    /// next counter check.
    struct Recording {
        sim: SimChannel,
        flushes: Vec<&'static str>,
        fault: Option<std::io::Error>,
    }
    impl Recording {
        fn new() -> Self {
            Self {
                sim: SimChannel::new(CacheGeometry::ARIANE_L1D),
                flushes: Vec::new(),
                fault: None,
            }
        }
    }
    impl Channel for Recording {
        fn cycles(&mut self) -> u64 { self.sim.cycles() }
        fn dcache_misses(&mut self) -> u64 { self.sim.dcache_misses() }
        fn icache_misses(&mut self) -> u64 { self.sim.icache_misses() }
        fn branch_mispredicts(&mut self) -> u64 { self.sim.branch_mispredicts() }
        fn full_flush(&mut self) {
            self.flushes.push("full");
            self.sim.full_flush();
        }
        fn flush_excluding_predictor(&mut self) {
            self.flushes.push("excl");
            self.sim.flush_excluding_predictor();
        }
        fn barrier(&mut self) {}
        fn touch(&mut self, addr: usize) { self.sim.touch(addr) }
        fn flush_line(&mut self, addr: usize) { self.sim.flush_line(addr) }
        fn branch(&mut self, site: usize, taken: bool) -> bool {
            self.sim.branch(site, taken)
        }
        fn check(&mut self) -> Result<()> {
            match self.fault.take() {
                Some(e) => Err(LeakError::Perf(e)),
                None => Ok(()),
            }
        }
    }

    fn recording() -> LeakHarness<Recording> {
        let cfg = HarnessConfig::default_sim().mem_words(64);
        cfg.emit(Recording::new()).unwrap()
    }

    fn harness() -> LeakHarness<SimChannel> {
        let cfg = HarnessConfig::default_sim().mem_words(4096);
        cfg.emit(SimChannel::new(cfg.geometry)).unwrap()
    }

    /// Address in the same (set, way) as the probing buffer's (16, 3), but
    /// outside of it.
    fn aliasing(h: &LeakHarness<SimChannel>) -> usize {
        h.probe_buffer().addr(16, 3) + 8 * CacheGeometry::ARIANE_L1D.size()
    }

    #[test]
    fn victim_eviction_is_captured() {
        let mut h = harness();
        let addr = aliasing(&h);
        h.register(InputClass::new(ClassId::A, "touch")
            .victim(move |ctx| ctx.touch(addr))).unwrap();
        let res = h.run_trial(ClassId::A).unwrap();
        assert_eq!(res.iter_evicted().collect::<Vec<_>>(), vec![(16, 3)]);
    }

    #[test]
    fn unregistered_class() {
        let mut h = harness();
        assert!(matches!(h.run_trial(ClassId::B),
            Err(LeakError::UnregisteredClass(2))));
    }

    #[test]
    fn zero_repeats_has_no_noise() {
        let sim = SimChannel::new(CacheGeometry::ARIANE_L1D).noise(1.0, 1);
        let cfg = HarnessConfig::default_sim().mem_words(64);
        let mut noisy = cfg.emit(sim).unwrap();
        noisy.register(InputClass::new(ClassId::A, "nothing")).unwrap();
        let (_, noise) = noisy.run_multi_compare(ClassId::A, 0).unwrap();
        assert_eq!(noise, 0);
    }

    #[test]
    fn setup_resets_memory() {
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "mem")
            .mem_default(5)
            .setup(|ctx| ctx.mem().write(1, 9))
            .victim(|ctx| {
                assert_eq!(ctx.load(0), 5);
                assert_eq!(ctx.load(1), 9);
                ctx.store(0, 1);
            })).unwrap();
        h.run_trial(ClassId::A).unwrap();
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.memory().read(0), 1);
    }

    #[test]
    fn training_preserves_predictor() {
        const SITE: usize = 0x100;
        let mut h = harness();
        h.config_mut().train_iters = 4;
        h.set_trainer(Trainer::new(|ctx| { ctx.branch(SITE, true); }));
        h.register(InputClass::new(ClassId::A, "branch")
            .victim(|ctx| {
                assert!(ctx.branch(SITE, true));
            })).unwrap();
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.channel().predictor_state(SITE), 3);

        // Without training the victim starts from a cold predictor.
        h.config_mut().train_iters = 0;
        h.register(InputClass::new(ClassId::A, "branch")
            .victim(|ctx| {
                assert!(!ctx.branch(SITE, true));
            })).unwrap();
        h.run_trial(ClassId::A).unwrap();
    }

    #[test]
    fn training_flush_order() {
        let mut h = recording();
        h.register(InputClass::new(ClassId::A, "nothing")).unwrap();
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.channel().flushes, ["full"]);

        // Training iterations are ignored without a trainer.
        h.channel().flushes.clear();
        h.config_mut().train_iters = 3;
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.channel().flushes, ["full"]);

        h.channel().flushes.clear();
        h.set_trainer(Trainer::new(|ctx| { ctx.branch(0x100, true); }));
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.channel().flushes, ["full", "excl", "excl", "excl"]);
    }

    #[test]
    fn trained_state_reaches_victim() {
        const SITE: usize = 0x100;
        let mut h = harness();
        h.config_mut().train_iters = 2;
        h.set_trainer(Trainer::new(|ctx| { ctx.branch(SITE, true); }));
        h.register(InputClass::new(ClassId::A, "not taken")
            .victim(|ctx| {
                // Both training iterations count: 1 -> 2 -> 3.
                assert!(ctx.branch(SITE, false));
            })).unwrap();
        h.run_trial(ClassId::A).unwrap();
        assert_eq!(h.channel().predictor_state(SITE), 2);
    }

    #[test]
    fn counter_failure_fails_the_trial() {
        let mut h = recording();
        h.register(InputClass::new(ClassId::A, "nothing")).unwrap();
        h.channel().fault = Some(std::io::Error::new(
            std::io::ErrorKind::Other, "counter read failed"));
        assert!(matches!(h.run_trial(ClassId::A), Err(LeakError::Perf(_))));
        // The fault is reported once.
        assert!(h.run_trial(ClassId::A).is_ok());

        h.channel().fault = Some(std::io::Error::new(
            std::io::ErrorKind::Other, "counter read failed"));
        assert!(matches!(h.observe(ClassId::A), Err(LeakError::Perf(_))));
    }

    #[test]
    fn geometry_is_fixed_at_emit() {
        let mut h = harness();
        let addr = aliasing(&h);
        for id in [ClassId::A, ClassId::B] {
            h.register(InputClass::new(id, "touch")
                .victim(move |ctx| ctx.touch(addr))).unwrap();
        }
        h.config_mut().geometry = CacheGeometry::HOST_L1D;
        assert_eq!(h.range().unwrap(),
            SetRange::full(CacheGeometry::ARIANE_L1D));
        let res = h.run_trial(ClassId::A).unwrap();
        assert_eq!(res.geometry(), CacheGeometry::ARIANE_L1D);
        assert_eq!(h.verdict().unwrap(), Verdict::Equal);

        h.config_mut().mode = MeasureMode::Stopwatch;
        let res = h.run_trial(ClassId::A).unwrap();
        assert_eq!(res.geometry(), CacheGeometry::ARIANE_L1D);
    }

    #[test]
    fn mispredict_mode() {
        const SITE: usize = 0x100;
        let mut h = harness();
        h.config_mut().mode = MeasureMode::Mispredicts;
        h.register(InputClass::new(ClassId::A, "taken twice")
            .victim(|ctx| { ctx.branch(SITE, true); ctx.branch(SITE, true); }))
            .unwrap();
        let res = h.run_trial(ClassId::A).unwrap();
        assert_eq!(res.mispredicts, 1);
        assert_eq!(res.evicted_count(), 0);
        let (_, noise) = h.run_multi_compare(ClassId::A, 5).unwrap();
        assert_eq!(noise, 0);
    }

    #[test]
    fn stopwatch_mode() {
        let mut h = harness();
        h.config_mut().mode = MeasureMode::Stopwatch;
        h.register(InputClass::new(ClassId::A, "two loads")
            .victim(|ctx| { ctx.load(0); ctx.load(0); })).unwrap();
        let res = h.run_trial(ClassId::A).unwrap();
        assert_eq!(res.evicted_count(), 0);
        assert_eq!(res.cycles, 42);
        let (_, noise) = h.run_multi_compare(ClassId::A, 5).unwrap();
        assert_eq!(noise, 0);
    }

    #[test]
    fn observation() {
        let mut h = harness();
        let addr = aliasing(&h);
        h.register(InputClass::new(ClassId::A, "touch")
            .victim(move |ctx| ctx.touch(addr))).unwrap();
        let obs = h.observe(ClassId::A).unwrap();
        assert!(obs.is_conclusive());
        assert_eq!(obs.repeats, 10);
        assert_eq!(obs.to_string(), "set 16\n- way 3\n");
    }
}
