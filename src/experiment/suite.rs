//! Cohort description: which methods ran against which aggregation groups.
//!
//! A suite is both the archive record of a finished cohort and the request
//! shape for operator-submitted cohorts. Keys and method lists are kept
//! sorted so two suites built from the same experiments in any order compare
//! and serialize identically.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::experiment::lifecycle::Experiment;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSuite {
    pub platform_type: String,
    /// Aggregation identifier -> experiment method names, sorted.
    pub aggregation_map: BTreeMap<String, Vec<String>>,
}

impl ExperimentSuite {
    #[must_use]
    pub fn new(platform_type: impl Into<String>) -> Self {
        Self {
            platform_type: platform_type.into(),
            aggregation_map: BTreeMap::new(),
        }
    }

    /// Add one method for one aggregation group.
    #[must_use]
    pub fn with_method(mut self, aggregation_id: impl Into<String>, method: impl Into<String>) -> Self {
        self.insert(aggregation_id.into(), method.into());
        self
    }

    /// Group `(aggregation id, method)` pairs.
    pub fn from_pairs<I, A, M>(platform_type: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, M)>,
        A: Into<String>,
        M: Into<String>,
    {
        let mut suite = Self::new(platform_type);
        for (aggregation_id, method) in pairs {
            suite.insert(aggregation_id.into(), method.into());
        }
        suite
    }

    /// Suite describing a cohort. Experiments without a bound action are
    /// recorded under their requested method, or skipped if they have none.
    #[must_use]
    pub fn from_experiments(platform_type: &str, experiments: &[Arc<Experiment>]) -> Self {
        Self::from_pairs(
            platform_type,
            experiments.iter().filter_map(|experiment| {
                let method = experiment
                    .action_name()
                    .or_else(|| experiment.specific_method().map(str::to_string))?;
                Some((experiment.container().aggregation_identifier().to_string(), method))
            }),
        )
    }

    fn insert(&mut self, aggregation_id: String, method: String) {
        let methods = self.aggregation_map.entry(aggregation_id).or_default();
        let at = methods.partition_point(|m| m < &method);
        methods.insert(at, method);
    }

    /// Total number of experiments the suite asks for.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.aggregation_map.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiment_count() == 0
    }

    /// Parse a JSON request body; method lists are re-sorted.
    pub fn from_json(raw: &str) -> crate::core::errors::Result<Self> {
        let mut suite: Self = serde_json::from_str(raw)?;
        for methods in suite.aggregation_map.values_mut() {
            methods.sort();
        }
        Ok(suite)
    }
}
