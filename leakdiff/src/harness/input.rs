//! Input classes: the callbacks that make up one side of a differential
//! experiment.

use crate::channel::Channel;
use crate::error::{ LeakError, Result };
use crate::harness::ExperimentMemory;

/// Identifies a registered [`InputClass`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u8);
impl ClassId {
    pub const A: Self = Self(1);
    pub const B: Self = Self(2);
}
impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State handed to setup, training and victim callbacks.
///
/// Every access made through a [`TrialCtx`] is visible to the channel; the
/// raw accessors on [`ExperimentMemory`] are not, and should only be used
/// by setup code.
pub struct TrialCtx<'a> {
    channel: &'a mut dyn Channel,
    mem: &'a mut ExperimentMemory,
}
impl <'a> TrialCtx<'a> {
    pub fn new(channel: &'a mut dyn Channel, mem: &'a mut ExperimentMemory)
        -> Self
    {
        Self { channel, mem }
    }

    /// Read word `word` of experiment memory.
    pub fn load(&mut self, word: usize) -> u64 {
        self.channel.touch(self.mem.word_addr(word));
        self.mem.read(word)
    }

    /// Write word `word` of experiment memory.
    pub fn store(&mut self, word: usize, val: u64) {
        self.channel.touch(self.mem.word_addr(word));
        self.mem.write(word, val);
    }

    /// Resolve a conditional branch. Returns the predicted direction.
    pub fn branch(&mut self, site: usize, taken: bool) -> bool {
        self.channel.branch(site, taken)
    }

    /// Execute an unconditional jump.
    pub fn jump(&mut self, site: usize) {
        self.channel.jump(site);
    }

    /// Access an arbitrary address.
    pub fn touch(&mut self, addr: usize) {
        self.channel.touch(addr);
    }

    pub fn speculation_window(&self) -> usize {
        self.channel.speculation_window()
    }

    pub fn mem(&mut self) -> &mut ExperimentMemory { &mut *self.mem }
    pub fn channel(&mut self) -> &mut dyn Channel { &mut *self.channel }
}

/// A callback run during a trial.
pub type TrialFn = Box<dyn FnMut(&mut TrialCtx)>;

fn noop() -> TrialFn { Box::new(|_| {}) }

/// One input class: a setup routine establishing the secret-dependent
/// precondition, and the victim under test.
pub struct InputClass {
    pub id: ClassId,
    pub desc: &'static str,
    /// Value written to every word of experiment memory before `setup`.
    pub mem_default: u64,
    pub setup: TrialFn,
    pub victim: TrialFn,
}
impl InputClass {
    pub fn new(id: ClassId, desc: &'static str) -> Self {
        Self { id, desc, mem_default: 0, setup: noop(), victim: noop() }
    }

    pub fn mem_default(mut self, val: u64) -> Self {
        self.mem_default = val;
        self
    }

    pub fn setup(mut self, f: impl FnMut(&mut TrialCtx) + 'static) -> Self {
        self.setup = Box::new(f);
        self
    }

    pub fn victim(mut self, f: impl FnMut(&mut TrialCtx) + 'static) -> Self {
        self.victim = Box::new(f);
        self
    }
}

/// Callbacks run before every trial (of either class) to put the branch
/// predictor into a known state.
pub struct Trainer {
    /// Optional value written to every word of experiment memory before
    /// each training iteration.
    pub mem_default: Option<u64>,
    pub setup: TrialFn,
    pub train: TrialFn,
}
impl Trainer {
    pub fn new(train: impl FnMut(&mut TrialCtx) + 'static) -> Self {
        Self { mem_default: None, setup: noop(), train: Box::new(train) }
    }

    pub fn mem_default(mut self, val: u64) -> Self {
        self.mem_default = Some(val);
        self
    }

    pub fn setup(mut self, f: impl FnMut(&mut TrialCtx) + 'static) -> Self {
        self.setup = Box::new(f);
        self
    }
}

/// Up to two input classes (with ids 1 and 2) and an optional trainer.
#[derive(Default)]
pub struct InputRegistry {
    classes: [Option<InputClass>; 2],
    trainer: Option<Trainer>,
}
impl InputRegistry {
    pub fn new() -> Self { Self::default() }

    fn slot(id: ClassId) -> Option<usize> {
        match id.0 {
            1 | 2 => Some(id.0 as usize - 1),
            _ => None,
        }
    }

    /// Register a class, replacing any class already registered with the
    /// same id.
    pub fn register(&mut self, class: InputClass) -> Result<()> {
        let slot = Self::slot(class.id).ok_or(LeakError::ClassSlot(class.id.0))?;
        tracing::debug!("registered class {} ({})", class.id, class.desc);
        self.classes[slot] = Some(class);
        Ok(())
    }

    pub fn set_trainer(&mut self, trainer: Trainer) {
        self.trainer = Some(trainer);
    }

    pub fn is_registered(&self, id: ClassId) -> bool {
        Self::slot(id).map_or(false, |s| self.classes[s].is_some())
    }

    pub fn get(&self, id: ClassId) -> Result<&InputClass> {
        Self::slot(id).and_then(|s| self.classes[s].as_ref())
            .ok_or(LeakError::UnregisteredClass(id.0))
    }

    pub fn get_mut(&mut self, id: ClassId) -> Result<&mut InputClass> {
        Self::slot(id).and_then(|s| self.classes[s].as_mut())
            .ok_or(LeakError::UnregisteredClass(id.0))
    }

    pub fn trainer_mut(&mut self) -> Option<&mut Trainer> {
        self.trainer.as_mut()
    }

    /// Split into the trainer and the class with id `id`.
    pub fn split_mut(&mut self, id: ClassId)
        -> Result<(Option<&mut Trainer>, &mut InputClass)>
    {
        let slot = Self::slot(id);
        let class = slot.and_then(|s| self.classes[s].as_mut())
            .ok_or(LeakError::UnregisteredClass(id.0))?;
        Ok((self.trainer.as_mut(), class))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registration() {
        let mut reg = InputRegistry::new();
        reg.register(InputClass::new(ClassId::A, "a")).unwrap();
        assert!(reg.is_registered(ClassId::A));
        assert!(!reg.is_registered(ClassId::B));
        assert!(matches!(reg.get(ClassId::B),
            Err(LeakError::UnregisteredClass(2))));
        assert!(matches!(reg.register(InputClass::new(ClassId(3), "c")),
            Err(LeakError::ClassSlot(3))));
        assert!(matches!(reg.get(ClassId(0)),
            Err(LeakError::UnregisteredClass(0))));
    }

    #[test]
    fn replace() {
        let mut reg = InputRegistry::new();
        reg.register(InputClass::new(ClassId::A, "first")).unwrap();
        reg.register(InputClass::new(ClassId::A, "second")).unwrap();
        assert_eq!(reg.get(ClassId::A).unwrap().desc, "second");
    }
}
