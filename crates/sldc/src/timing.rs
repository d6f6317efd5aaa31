//! Hierarchical phase timing.
//!
//! A [`WorkflowTiming`] maps dot-separated phase paths
//! (`workflow.sldc.segment`) to every duration observed for that phase.
//! Parallel workers each fill their own instance; the orchestrator merges
//! them afterwards with [`WorkflowTiming::merge`]. The phase tree is never
//! stored: [`WorkflowTiming::phases_hierarchy`] rebuilds it from the keys.
//!
//! Timestamps are captured via the `web-time` crate. Durations are
//! serialized as fractional seconds (`f64`).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

/// Serde support for the phase map, durations as fractional seconds.
mod phases_serde {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        phases: &BTreeMap<String, Vec<Duration>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let seconds: BTreeMap<&str, Vec<f64>> = phases
            .iter()
            .map(|(phase, durations)| {
                (
                    phase.as_str(),
                    durations.iter().map(Duration::as_secs_f64).collect(),
                )
            })
            .collect();
        seconds.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<Duration>>, D::Error> {
        let seconds = BTreeMap::<String, Vec<f64>>::deserialize(deserializer)?;
        seconds
            .into_iter()
            .map(|(phase, values)| {
                let durations = values
                    .into_iter()
                    .map(|secs| {
                        Duration::try_from_secs_f64(secs).map_err(|_| {
                            serde::de::Error::custom(format!(
                                "duration of phase `{phase}` must be finite and non-negative"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((phase, durations))
            })
            .collect()
    }
}

/// Durations observed per phase path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowTiming {
    root: Option<String>,
    #[serde(with = "phases_serde")]
    phases: BTreeMap<String, Vec<Duration>>,
    #[serde(skip)]
    started: BTreeMap<String, Instant>,
}

/// Summary statistics of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStats {
    /// Sum of all durations.
    pub sum: Duration,
    /// Shortest duration.
    pub min: Duration,
    /// Average duration.
    pub mean: Duration,
    /// Longest duration.
    pub max: Duration,
    /// Number of observations.
    pub count: usize,
}

impl PhaseStats {
    fn of(durations: &[Duration]) -> Option<Self> {
        let min = durations.iter().min().copied()?;
        let max = durations.iter().max().copied()?;
        let sum: Duration = durations.iter().sum();
        let mean = u32::try_from(durations.len()).map_or(Duration::ZERO, |n| sum / n);
        Some(Self {
            sum,
            min,
            mean,
            max,
            count: durations.len(),
        })
    }
}

/// One node of the phase tree derived from dot-separated paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseTree {
    /// Child nodes keyed by their path segment.
    pub children: BTreeMap<String, PhaseTree>,
}

impl PhaseTree {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_owned()).or_default();
        }
    }

    /// Whether this node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl WorkflowTiming {
    /// Timing without a root prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timing whose phases are all recorded under `root`.
    #[must_use]
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// The root prefix, if any.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    fn path(&self, phase: &str) -> String {
        match &self.root {
            Some(root) => format!("{root}.{phase}"),
            None => phase.to_owned(),
        }
    }

    /// Start timing `phase` (relative to the root).
    ///
    /// Starting a phase that is already running restarts it.
    pub fn start(&mut self, phase: &str) {
        self.started.insert(self.path(phase), Instant::now());
    }

    /// Stop timing `phase` and record the elapsed duration.
    ///
    /// Returns `None` if the phase was not started.
    pub fn end(&mut self, phase: &str) -> Option<Duration> {
        let path = self.path(phase);
        let elapsed = self.started.remove(&path)?.elapsed();
        self.phases.entry(path).or_default().push(elapsed);
        Some(elapsed)
    }

    /// Record an externally measured duration for `phase`.
    pub fn record(&mut self, phase: &str, duration: Duration) {
        self.phases
            .entry(self.path(phase))
            .or_default()
            .push(duration);
    }

    /// Run `f`, recording its wall-clock duration under `phase`.
    pub fn time<T>(&mut self, phase: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.record(phase, start.elapsed());
        value
    }

    /// Durations recorded for the full phase `path` (root included).
    #[must_use]
    pub fn get(&self, path: &str) -> &[Duration] {
        self.phases.get(path).map_or(&[], Vec::as_slice)
    }

    /// Every recorded full phase path, sorted.
    pub fn phases(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Append every duration of `other` to this timing.
    ///
    /// Paths are taken as-is: the root of `other` is already part of them.
    pub fn merge(&mut self, other: &Self) {
        for (path, durations) in &other.phases {
            self.phases
                .entry(path.clone())
                .or_default()
                .extend_from_slice(durations);
        }
    }

    /// Merge several timings into a new one rooted at `root`.
    #[must_use]
    pub fn merge_all<'a>(root: Option<&str>, timings: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut merged = Self {
            root: root.map(str::to_owned),
            ..Self::default()
        };
        for timing in timings {
            merged.merge(timing);
        }
        merged
    }

    /// Tree of phases derived from the recorded paths.
    #[must_use]
    pub fn phases_hierarchy(&self) -> PhaseTree {
        let mut tree = PhaseTree::default();
        for path in self.phases.keys() {
            tree.insert(path);
        }
        tree
    }

    /// Statistics of every recorded phase.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, PhaseStats> {
        self.phases
            .iter()
            .filter_map(|(path, durations)| {
                PhaseStats::of(durations).map(|stats| (path.clone(), stats))
            })
            .collect()
    }

    /// Human-readable table of the phase tree with per-phase statistics.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Workflow Timing Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "{:<32} {:>12} {:>6} {:>12} {:>12}",
            "Phase", "Total", "Count", "Mean", "Max"
        ));
        lines.push("-".repeat(80));

        let stats = self.stats();
        let tree = self.phases_hierarchy();
        let mut stack: Vec<(String, usize, &PhaseTree)> = Vec::new();
        for (name, child) in tree.children.iter().rev() {
            stack.push((name.clone(), 0, child));
        }
        while let Some((path, depth, node)) = stack.pop() {
            let segment = path.rsplit('.').next().unwrap_or(&path);
            let name = format!("{}{segment}", "  ".repeat(depth));
            if let Some(s) = stats.get(&path) {
                let total = duration_ms(s.sum);
                let mean = duration_ms(s.mean);
                let max = duration_ms(s.max);
                let count = s.count;
                lines.push(format!(
                    "{name:<32} {total:>10.3}ms {count:>6} {mean:>10.3}ms {max:>10.3}ms"
                ));
            } else {
                lines.push(name);
            }
            for (child_name, child) in node.children.iter().rev() {
                stack.push((format!("{path}.{child_name}"), depth + 1, child));
            }
        }
        lines.join("\n")
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
