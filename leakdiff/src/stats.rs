
use std::collections::*;

/// A list of observed values.
///
/// In general, each entry in the list is a *difference* between two
/// counter values (for instance, the cycles taken by one reload).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResults(pub Vec<u64>);

/// Implemented on types which contain a list of observed values.
pub trait ResultList<D: Copy + Ord> {
    /// Return a reference to the list of values.
    fn data(&self) -> &[D];

    /// Return the number of observed values.
    fn len(&self) -> usize { self.data().len() }

    fn is_empty(&self) -> bool { self.data().is_empty() }

    /// Return the minimum value in the list.
    fn get_min(&self) -> Option<D> { self.data().iter().min().copied() }

    /// Return the maximum value in the list.
    fn get_max(&self) -> Option<D> { self.data().iter().max().copied() }

    /// Return the most-frequent value in the list.
    fn get_mode(&self) -> Option<D> {
        self.histogram().into_iter()
            .max_by(|x, y| x.1.cmp(&y.1))
            .map(|(val, _)| val)
    }

    /// Return a histogram counting the distribution of all values in the
    /// list.
    fn histogram(&self) -> BTreeMap<D, usize> {
        let mut dist = BTreeMap::new();
        for r in self.data().iter() {
            *dist.entry(*r).or_insert(0) += 1;
        }
        dist
    }

    /// Returns the number of values for which `f` returns `true`.
    fn count_where(&self, mut f: impl FnMut(D) -> bool) -> usize {
        self.data().iter().filter(|x| f(**x)).count()
    }

    /// Return the indexes of all values in the list for which the given
    /// function `f` returns `true`.
    fn filter(&self, mut f: impl FnMut(D) -> bool) -> Vec<usize> {
        self.data().iter().enumerate().filter(|(_, x)| f(**x))
            .map(|(idx, _)| idx).collect()
    }
}

impl ResultList<u64> for RawResults {
    fn data(&self) -> &[u64] { &self.0 }
}
