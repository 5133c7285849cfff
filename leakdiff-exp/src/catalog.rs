//! The experiment catalog.
//!
//! Experiments share a layout of experiment memory:
//!
//! | word   | contents                                   |
//! |--------|--------------------------------------------|
//! | 0      | the word loaded behind the bounds check    |
//! | 6      | the bound                                  |
//! | 10     | the input (secret)                         |
//! | 1024.. | a table indexed by the input               |
//!
//! The speculative experiments only perform the load when
//! `input < bound`. Training runs the victim with an input below the bound,
//! so the predictor learns "taken" and a later input above the bound
//! performs the load transiently.

use leakdiff::*;

const LOAD_WORD: usize = 0;
const BOUND_WORD: usize = 6;
const INPUT_WORD: usize = 10;
const TABLE_WORD: usize = 1024;

const BOUND: u64 = 4;
const BRANCH_SITE: usize = 0x1000;
const JUMP_SITE: usize = 0x1040;

/// Experiments available to the `diff` and `observe` binaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Experiment {
    /// Load behind a trained branch: architectural vs. transient load
    SpecLoad,
    /// Like `spec-load`, but the load sits behind a run of nops
    SpecLoadNops,
    /// Like `spec-load`, but the victim starts with an unconditional jump
    SpecLoadUncond,
    /// Input never read by the victim
    IrrelevantInput,
    /// Input used directly as a table index
    SecretIndex,
}

impl Experiment {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpecLoad => "spec-load",
            Self::SpecLoadNops => "spec-load-nops",
            Self::SpecLoadUncond => "spec-load-uncond",
            Self::IrrelevantInput => "irrelevant-input",
            Self::SecretIndex => "secret-index",
        }
    }

    /// Number of training iterations the experiment was designed for.
    pub fn train_iters(&self) -> usize {
        match self {
            Self::SpecLoad | Self::SpecLoadNops | Self::SpecLoadUncond => 15,
            Self::IrrelevantInput | Self::SecretIndex => 0,
        }
    }

    /// The two inputs compared by this experiment.
    pub fn inputs(&self) -> (u64, u64) {
        match self {
            Self::SpecLoad | Self::SpecLoadNops | Self::SpecLoadUncond => (1, 17),
            Self::IrrelevantInput => (0, 0xffff_ffff),
            Self::SecretIndex => (0, 512),
        }
    }

    /// `if input < bound { body }`
    fn guarded(body: Vec<Block>) -> Block {
        Block::CondBranch {
            lhs: INPUT_WORD,
            rhs: BOUND_WORD,
            cmp: Cmp::Lt,
            site: BRANCH_SITE,
            then_: body,
            else_: vec![],
        }
    }

    pub fn victim(&self) -> Victim {
        let load = Block::Load { word: LOAD_WORD };
        match self {
            Self::SpecLoad => Victim::new(vec![ Self::guarded(vec![load]) ]),
            Self::SpecLoadNops => Victim::new(vec![
                Self::guarded(vec![ Block::Nops(32), load ]),
            ]),
            Self::SpecLoadUncond => Victim::new(vec![
                Block::Jump { site: JUMP_SITE, body: vec![
                    Self::guarded(vec![load]),
                ]},
            ]),
            Self::IrrelevantInput => Victim::new(vec![
                Block::Load { word: BOUND_WORD },
                Block::Nops(4),
            ]),
            Self::SecretIndex => Victim::new(vec![
                Block::LoadAdd { word: TABLE_WORD, addend_word: INPUT_WORD },
            ]),
        }
    }

    fn setup(input: u64) -> impl FnMut(&mut TrialCtx) + 'static {
        move |ctx| {
            ctx.mem().write(BOUND_WORD, BOUND);
            ctx.mem().write(INPUT_WORD, input);
        }
    }

    /// Build input class `id` with the given input.
    pub fn class(&self, id: ClassId, input: u64) -> InputClass {
        InputClass::new(id, self.name())
            .setup(Self::setup(input))
            .victim(self.victim().into_fn())
    }

    /// Register both classes, and a trainer for the speculative
    /// experiments.
    pub fn register<C: Channel>(&self, harness: &mut LeakHarness<C>)
        -> Result<()>
    {
        let (a, b) = self.inputs();
        harness.register(self.class(ClassId::A, a))?;
        harness.register(self.class(ClassId::B, b))?;
        if self.train_iters() != 0 {
            harness.set_trainer(Trainer::new(self.victim().into_fn())
                .setup(Self::setup(1)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn harness(window: usize) -> LeakHarness<SimChannel> {
        let sim = SimChannel::new(CacheGeometry::ARIANE_L1D)
            .speculation_window(window);
        HarnessConfig::default_sim().mem_words(4096).emit(sim).unwrap()
    }

    fn verdict(exp: Experiment, window: usize, train: bool) -> Verdict {
        let mut h = harness(window);
        exp.register(&mut h).unwrap();
        h.config_mut().train_iters = if train { exp.train_iters() } else { 0 };
        h.verdict().unwrap()
    }

    #[test]
    fn spec_load() {
        // Untrained: only the in-bounds input loads
        assert_eq!(verdict(Experiment::SpecLoad, 8, false), Verdict::Unequal);
        // Trained: the out-of-bounds input loads transiently
        assert_eq!(verdict(Experiment::SpecLoad, 8, true), Verdict::Equal);
        // No speculation at all
        assert_eq!(verdict(Experiment::SpecLoad, 0, true), Verdict::Unequal);
    }

    #[test]
    fn spec_load_nops() {
        assert_eq!(verdict(Experiment::SpecLoadNops, 8, true), Verdict::Unequal);
        assert_eq!(verdict(Experiment::SpecLoadNops, 64, true), Verdict::Equal);
    }

    #[test]
    fn spec_load_uncond() {
        assert_eq!(verdict(Experiment::SpecLoadUncond, 8, true), Verdict::Equal);
    }

    #[test]
    fn irrelevant_input() {
        assert_eq!(verdict(Experiment::IrrelevantInput, 8, false), Verdict::Equal);
    }

    #[test]
    fn secret_index() {
        assert_eq!(verdict(Experiment::SecretIndex, 8, false), Verdict::Unequal);
    }
}
