use std::collections::BTreeMap;

use serde::Serialize;

use crate::taxonomy::normalize;

/// Hit/total counters for one category or skill.
///
/// In narrative mode `hits` counts episodes that reached a fully-achieved
/// ending; in quiz mode it counts correct answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub hits: u32,
    pub total: u32,
}

impl Tally {
    pub fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.hits += 1;
        }
    }

    /// `100 * hits / total`, or `0.0` when nothing was recorded.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.hits) / f64::from(self.total) * 100.0
        }
    }
}

/// How keys are canonicalized before they hit the counter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    /// Keys are used as given (narrative orientation labels).
    Verbatim,
    /// Keys go through [`normalize`] (quiz skill tags).
    Normalized,
}

/// Additive per-key counters for one evaluation batch.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    style: KeyStyle,
    tallies: BTreeMap<String, Tally>,
}

impl StatsAggregator {
    pub fn new(style: KeyStyle) -> Self {
        Self {
            style,
            tallies: BTreeMap::new(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        match self.style {
            KeyStyle::Verbatim => name.to_string(),
            KeyStyle::Normalized => normalize(name),
        }
    }

    /// Make a key visible in reports even if no sample ever completes for it.
    pub fn register(&mut self, name: &str) {
        let key = self.key(name);
        self.tallies.entry(key).or_default();
    }

    pub fn record(&mut self, name: &str, success: bool) {
        let key = self.key(name);
        self.tallies.entry(key).or_default().record(success);
    }

    pub fn tally(&self, name: &str) -> Option<Tally> {
        self.tallies.get(&self.key(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tallies.contains_key(&self.key(name))
    }

    pub fn percentage(&self, name: &str) -> f64 {
        self.tally(name).map_or(0.0, |t| t.percentage())
    }

    /// Mean percentage over the members that have at least one sample.
    pub fn roll_up<'a>(&self, members: impl IntoIterator<Item = &'a str>) -> f64 {
        let values: Vec<f64> = members
            .into_iter()
            .filter_map(|m| self.tally(m))
            .filter(|t| t.total > 0)
            .map(|t| t.percentage())
            .collect();

        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn percentages(&self) -> BTreeMap<String, f64> {
        self.tallies
            .iter()
            .map(|(k, t)| (k.clone(), t.percentage()))
            .collect()
    }

    pub fn tallies(&self) -> &BTreeMap<String, Tally> {
        &self.tallies
    }
}
