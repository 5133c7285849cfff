//! Composable victim routines.
//!
//! A [`Victim`] is a list of [`Block`]s interpreted against a
//! [`TrialCtx`]. Every load and branch goes through the channel, so the
//! same victim can be run against the simulator or the host.
//!
//! Speculation
//! ===========
//!
//! When a conditional branch is mispredicted, the blocks on the wrong path
//! are executed *transiently* before the architectural path. The wrong
//! path gets a budget of [`TrialCtx::speculation_window`] operations: each
//! load costs one and [`Block::Nops`] costs its length. Transient branches
//! are not trained and nothing is written back.

use crate::harness::TrialCtx;

/// Condition evaluated by [`Block::CondBranch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Ge,
}
impl Cmp {
    pub fn eval(&self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// A single step of a victim routine. Operands name words of experiment
/// memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    /// Load `lhs` and `rhs`, then run `then_` if `cmp` holds and `else_`
    /// otherwise. `site` identifies the branch to the predictor.
    CondBranch {
        lhs: usize,
        rhs: usize,
        cmp: Cmp,
        site: usize,
        then_: Vec<Block>,
        else_: Vec<Block>,
    },

    /// An unconditional jump at `site`, followed by `body`. Jumps don't
    /// train or consult the direction predictor.
    Jump { site: usize, body: Vec<Block> },

    /// Load a single word.
    Load { word: usize },

    /// Load `addend_word`, then load the word at `word` plus the loaded
    /// value (wrapping around the end of experiment memory).
    LoadAdd { word: usize, addend_word: usize },

    /// Some amount of work with no memory accesses.
    Nops(usize),
}

/// A victim routine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Victim(pub Vec<Block>);

impl Victim {
    pub fn new(blocks: Vec<Block>) -> Self { Self(blocks) }

    /// Execute every block.
    pub fn run(&self, ctx: &mut TrialCtx) {
        Self::exec(&self.0, ctx);
    }

    /// Turn this victim into a callback for [`crate::harness::InputClass`].
    pub fn into_fn(self) -> impl FnMut(&mut TrialCtx) + 'static {
        move |ctx| self.run(ctx)
    }

    fn offset_word(ctx: &mut TrialCtx, word: usize, offset: u64) -> usize {
        let words = ctx.mem().words();
        (word.wrapping_add(offset as usize)) % words
    }

    fn exec(blocks: &[Block], ctx: &mut TrialCtx) {
        for block in blocks {
            match block {
                Block::CondBranch { lhs, rhs, cmp, site, then_, else_ } => {
                    let (a, b) = (ctx.load(*lhs), ctx.load(*rhs));
                    let taken = cmp.eval(a, b);
                    let predicted = ctx.branch(*site, taken);
                    let (path, wrong_path) = if taken {
                        (then_, else_)
                    } else {
                        (else_, then_)
                    };
                    if predicted != taken {
                        let mut budget = ctx.speculation_window();
                        Self::speculate(wrong_path, ctx, &mut budget);
                    }
                    Self::exec(path, ctx);
                },
                Block::Jump { site, body } => {
                    ctx.jump(*site);
                    Self::exec(body, ctx);
                },
                Block::Load { word } => {
                    ctx.load(*word);
                },
                Block::LoadAdd { word, addend_word } => {
                    let off = ctx.load(*addend_word);
                    let target = Self::offset_word(ctx, *word, off);
                    ctx.load(target);
                },
                Block::Nops(n) => {
                    for i in 0..*n {
                        std::hint::black_box(i);
                    }
                },
            }
        }
    }

    /// Transiently run `blocks` until `budget` runs out.
    fn speculate(blocks: &[Block], ctx: &mut TrialCtx, budget: &mut usize) {
        for block in blocks {
            if *budget == 0 {
                return;
            }
            match block {
                Block::CondBranch { lhs, rhs, cmp, then_, else_, .. } => {
                    let a = Self::spec_load(ctx, *lhs, budget);
                    let b = Self::spec_load(ctx, *rhs, budget);
                    let (Some(a), Some(b)) = (a, b) else { return };
                    let path = if cmp.eval(a, b) { then_ } else { else_ };
                    Self::speculate(path, ctx, budget);
                },
                Block::Jump { body, .. } => {
                    Self::speculate(body, ctx, budget);
                },
                Block::Load { word } => {
                    Self::spec_load(ctx, *word, budget);
                },
                Block::LoadAdd { word, addend_word } => {
                    let Some(off) = Self::spec_load(ctx, *addend_word, budget)
                        else { return };
                    let target = Self::offset_word(ctx, *word, off);
                    Self::spec_load(ctx, target, budget);
                },
                Block::Nops(n) => {
                    *budget = budget.saturating_sub(*n);
                },
            }
        }
    }

    fn spec_load(ctx: &mut TrialCtx, word: usize, budget: &mut usize)
        -> Option<u64>
    {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;
        Some(ctx.load(word))
    }
}
