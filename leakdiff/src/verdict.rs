//! Differential verdicts between two input classes.

use crate::cache::{ Comparison, SetRange };
use crate::channel::Channel;
use crate::error::Result;
use crate::harness::{ ClassId, LeakHarness };

/// Outcome of comparing two input classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Both classes are reproducible and leave the same state.
    Equal,
    /// Both classes are reproducible and leave different states.
    Unequal,
    /// At least one class is not reproducible. The cross-class comparison
    /// was not attempted.
    Inconclusive { noise_a: usize, noise_b: usize },
}
impl Verdict {
    /// Sum of both noise counts (zero unless inconclusive).
    pub fn noise(&self) -> usize {
        match self {
            Self::Inconclusive { noise_a, noise_b } => noise_a + noise_b,
            _ => 0,
        }
    }

    pub fn is_conclusive(&self) -> bool {
        !matches!(self, Self::Inconclusive { .. })
    }
}
impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "EQUAL"),
            Self::Unequal => write!(f, "UNEQUAL"),
            Self::Inconclusive { noise_a, noise_b } => {
                write!(f, "INCONCLUSIVE: {} ({}, {})",
                    noise_a + noise_b, noise_a, noise_b)
            },
        }
    }
}

/// Compare classes `a` and `b`.
///
/// Each class is checked for reproducibility over `repeats` trials. Only
/// when neither class produced noise are their baselines compared (over
/// `range`, using `comparison`).
///
/// Fails with [`crate::error::LeakError::ModeMismatch`] before running any
/// trial if `comparison` reads something the harness' measurement mode
/// doesn't record.
pub fn diff<C: Channel>(harness: &mut LeakHarness<C>,
    a: ClassId, b: ClassId,
    range: SetRange, comparison: Comparison, repeats: usize)
    -> Result<Verdict>
{
    comparison.check_mode(harness.config().mode)?;
    let (base_a, noise_a) = harness.run_multi_compare(a, repeats)?;
    let (base_b, noise_b) = harness.run_multi_compare(b, repeats)?;
    let res = if noise_a != 0 || noise_b != 0 {
        Verdict::Inconclusive { noise_a, noise_b }
    } else if comparison.differs(&base_a, &base_b, range) {
        Verdict::Unequal
    } else {
        Verdict::Equal
    };
    tracing::info!("class {} vs {} ({}, sets {}..{}): {}",
        a, b, comparison.name(), range.lower(), range.upper(), res);
    Ok(res)
}

impl <C: Channel> LeakHarness<C> {
    /// Compare the two registered classes using the configured range,
    /// comparison and number of repeats.
    pub fn verdict(&mut self) -> Result<Verdict> {
        let range = self.range()?;
        let cfg = *self.config();
        diff(self, ClassId::A, ClassId::B, range, cfg.comparison, cfg.repeats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::CacheGeometry;
    use crate::channel::SimChannel;
    use crate::error::LeakError;
    use crate::harness::{ HarnessConfig, InputClass, MeasureMode, Trainer };
    use crate::victim::{ Block, Cmp, Victim };

    const GEOM: CacheGeometry = CacheGeometry::ARIANE_L1D;

    fn harness_with(sim: SimChannel) -> LeakHarness<SimChannel> {
        HarnessConfig::default_sim().mem_words(8192).emit(sim).unwrap()
    }

    fn harness() -> LeakHarness<SimChannel> {
        harness_with(SimChannel::new(GEOM))
    }

    fn load_victim(word: usize) -> Victim {
        Victim::new(vec![ Block::Load { word } ])
    }

    #[test]
    fn display() {
        assert_eq!(Verdict::Equal.to_string(), "EQUAL");
        assert_eq!(Verdict::Unequal.to_string(), "UNEQUAL");
        let v = Verdict::Inconclusive { noise_a: 2, noise_b: 1 };
        assert_eq!(v.to_string(), "INCONCLUSIVE: 3 (2, 1)");
        assert_eq!(v.noise(), 3);
    }

    #[test]
    fn identical_classes_are_equal() {
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "a")
            .victim(load_victim(600).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "b")
            .victim(load_victim(600).into_fn())).unwrap();
        for _ in 0..4 {
            assert_eq!(h.verdict().unwrap(), Verdict::Equal);
        }
    }

    #[test]
    fn irrelevant_setup_is_equal() {
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "a")
            .setup(|ctx| ctx.mem().write(7, 0))
            .victim(load_victim(600).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "b")
            .setup(|ctx| ctx.mem().write(7, 0xffff))
            .victim(load_victim(600).into_fn())).unwrap();
        assert_eq!(h.verdict().unwrap(), Verdict::Equal);
    }

    #[test]
    fn secret_dependent_load_is_unequal() {
        // word 4 holds the secret; it selects which word is loaded
        let victim = || Victim::new(vec![
            Block::LoadAdd { word: 1024, addend_word: 4 },
        ]);
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "secret=0")
            .setup(|ctx| ctx.mem().write(4, 0))
            .victim(victim().into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "secret=512")
            .setup(|ctx| ctx.mem().write(4, 512))
            .victim(victim().into_fn())).unwrap();
        assert_eq!(h.verdict().unwrap(), Verdict::Unequal);
    }

    #[test]
    fn count_comparison_tolerates_way_changes() {
        // Words 1024 and 1536 land in the same set, different ways
        let mut h = harness();
        h.config_mut().comparison = Comparison::OccupancyCount;
        h.register(InputClass::new(ClassId::A, "a")
            .victim(load_victim(1024).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "b")
            .victim(load_victim(1536).into_fn())).unwrap();
        assert_eq!(h.verdict().unwrap(), Verdict::Equal);
        h.config_mut().comparison = Comparison::Exact;
        assert_eq!(h.verdict().unwrap(), Verdict::Unequal);
    }

    #[test]
    fn noisy_platform_is_inconclusive() {
        let mut h = harness_with(SimChannel::new(GEOM).noise(0.01, 0x1337));
        h.register(InputClass::new(ClassId::A, "a")
            .victim(load_victim(600).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "b")
            .victim(load_victim(601).into_fn())).unwrap();
        match h.verdict().unwrap() {
            Verdict::Inconclusive { noise_a, noise_b } => {
                assert!(noise_a + noise_b > 0);
                assert!(noise_a <= 10 && noise_b <= 10);
            },
            v => panic!("expected an inconclusive verdict, got {}", v),
        }
    }

    #[test]
    fn speculative_leak_needs_training() {
        // if (idx < bound) load(1024 + idx)
        let victim = || Victim::new(vec![
            Block::CondBranch {
                lhs: 2, rhs: 3, cmp: Cmp::Lt, site: 0x80,
                then_: vec![ Block::LoadAdd { word: 1024, addend_word: 2 } ],
                else_: vec![],
            },
        ]);
        let mut h = harness_with(SimChannel::new(GEOM).speculation_window(4));
        h.set_trainer(Trainer::new(victim().into_fn())
            .setup(|ctx| { ctx.mem().write(2, 0); ctx.mem().write(3, 16); }));
        // Both classes are out of bounds: architecturally nothing leaks.
        h.register(InputClass::new(ClassId::A, "idx=64")
            .setup(|ctx| { ctx.mem().write(2, 64); ctx.mem().write(3, 16); })
            .victim(victim().into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "idx=640")
            .setup(|ctx| { ctx.mem().write(2, 640); ctx.mem().write(3, 16); })
            .victim(victim().into_fn())).unwrap();

        assert_eq!(h.verdict().unwrap(), Verdict::Equal);
        h.config_mut().train_iters = 8;
        assert_eq!(h.verdict().unwrap(), Verdict::Unequal);
    }

    #[test]
    fn stopwatch_verdict() {
        let mut h = harness();
        h.config_mut().mode = MeasureMode::Stopwatch;
        h.config_mut().comparison = Comparison::Timing(20);
        h.register(InputClass::new(ClassId::A, "one load")
            .victim(load_victim(600).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "two loads")
            .victim(Victim::new(vec![
                Block::Load { word: 600 }, Block::Load { word: 1200 },
            ]).into_fn())).unwrap();
        assert_eq!(h.verdict().unwrap(), Verdict::Unequal);
    }

    #[test]
    fn mismatched_comparison_is_fatal() {
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "one load")
            .victim(load_victim(600).into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "two loads")
            .victim(Victim::new(vec![
                Block::Load { word: 600 }, Block::Load { word: 1200 },
            ]).into_fn())).unwrap();

        // Stopwatch snapshots have no evicted lines to compare.
        h.config_mut().mode = MeasureMode::Stopwatch;
        assert!(matches!(h.verdict(), Err(LeakError::ModeMismatch {
            mode: "stopwatch", comparison: "exact",
        })));

        h.config_mut().mode = MeasureMode::PrimeProbe;
        h.config_mut().comparison = Comparison::Timing(20);
        assert!(matches!(h.verdict(), Err(LeakError::ModeMismatch {
            mode: "prime-probe", comparison: "timing",
        })));

        let range = h.range().unwrap();
        assert!(matches!(
            diff(&mut h, ClassId::A, ClassId::B, range, Comparison::Mispredicts, 0),
            Err(LeakError::ModeMismatch { .. })));
    }

    #[test]
    fn mispredict_verdict_needs_training() {
        // if (idx < bound) {}; if (idx >= bound) {}
        let victim = || Victim::new(vec![
            Block::CondBranch {
                lhs: 2, rhs: 3, cmp: Cmp::Lt, site: 0x80,
                then_: vec![], else_: vec![],
            },
            Block::CondBranch {
                lhs: 2, rhs: 3, cmp: Cmp::Ge, site: 0xc0,
                then_: vec![], else_: vec![],
            },
        ]);
        let cfg = HarnessConfig::default_sim()
            .mem_words(64)
            .mode(MeasureMode::Mispredicts);
        let mut h = cfg.emit(SimChannel::new(GEOM)).unwrap();
        h.set_trainer(Trainer::new(victim().into_fn())
            .setup(|ctx| { ctx.mem().write(2, 0); ctx.mem().write(3, 16); }));
        h.register(InputClass::new(ClassId::A, "idx=1")
            .setup(|ctx| { ctx.mem().write(2, 1); ctx.mem().write(3, 16); })
            .victim(victim().into_fn())).unwrap();
        h.register(InputClass::new(ClassId::B, "idx=64")
            .setup(|ctx| { ctx.mem().write(2, 64); ctx.mem().write(3, 16); })
            .victim(victim().into_fn())).unwrap();

        // A cold predictor misses exactly one of the two branches either way.
        assert_eq!(h.run_trial(ClassId::A).unwrap().mispredicts, 1);
        assert_eq!(h.run_trial(ClassId::B).unwrap().mispredicts, 1);
        assert_eq!(h.verdict().unwrap(), Verdict::Equal);

        h.config_mut().train_iters = 4;
        assert_eq!(h.run_trial(ClassId::A).unwrap().mispredicts, 0);
        assert_eq!(h.run_trial(ClassId::B).unwrap().mispredicts, 2);
        assert_eq!(h.verdict().unwrap(), Verdict::Unequal);
    }

    #[test]
    fn unregistered_class_is_fatal() {
        let mut h = harness();
        h.register(InputClass::new(ClassId::A, "a")).unwrap();
        assert!(matches!(h.verdict(), Err(LeakError::UnregisteredClass(2))));
    }
}
