//! Epoch indexing for network orbital correction.
//!
//! Every distinct acquisition date appearing as a master or slave across
//! the interferogram network is assigned a dense integer index 0..E-1.
//! Indices address column blocks of the network design matrix, so they
//! must have no gaps. Ordering is strictly chronological: it carries no
//! correctness weight, but it makes the column layout of the joint design
//! matrix reproducible across runs and machines.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::types::Interferogram;

/// Dense chronological index over the distinct acquisition dates of a
/// network. Built once per correction run and passed by reference into
/// every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochIndex {
    indices: BTreeMap<NaiveDate, usize>,
}

impl EpochIndex {
    /// Index all master and slave dates across the network.
    pub fn from_ifgs(ifgs: &[Interferogram]) -> Self {
        let dates = ifgs
            .iter()
            .flat_map(|ifg| [ifg.master(), ifg.slave()]);
        Self::from_dates(dates)
    }

    /// Index an arbitrary collection of dates. Duplicates collapse to one
    /// epoch; iteration order of the input is irrelevant.
    pub fn from_dates<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Self {
        // BTreeMap keys are sorted, so enumeration yields chronological,
        // gap-free indices.
        let mut indices: BTreeMap<NaiveDate, usize> =
            dates.into_iter().map(|d| (d, 0)).collect();
        for (i, idx) in indices.values_mut().enumerate() {
            *idx = i;
        }
        log::debug!("Indexed {} distinct epochs", indices.len());
        Self { indices }
    }

    /// Index of a date, if it belongs to the network.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.indices.get(&date).copied()
    }

    /// Number of distinct epochs E; valid indices are 0..E.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dates in ascending (index) order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.indices.keys().copied()
    }
}
