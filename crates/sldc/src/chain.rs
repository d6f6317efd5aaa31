//! Workflow chains.
//!
//! A chain runs a first workflow on the whole image, then lets each
//! following executor re-process a window around selected polygons of the
//! first result, typically with a finer or more specialised workflow.

use std::collections::BTreeSet;

use geo::{BoundingRect, Polygon, Translate};

use crate::image::View;
use crate::information::{ChainInformation, WorkflowInformation};
use crate::pool::WorkerPool;
use crate::types::{Label, WorkflowError};
use crate::workflow::Workflow;

/// Selection of the polygons an executor re-processes.
pub trait PolygonFilter: Send + Sync {
    /// Indices of the rows of `information` to re-process.
    fn filter(&self, image: &View, information: &WorkflowInformation) -> Vec<usize>;
}

/// Filter keeping every polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAll;

impl PolygonFilter for KeepAll {
    fn filter(&self, _image: &View, information: &WorkflowInformation) -> Vec<usize> {
        (0..information.len()).collect()
    }
}

/// Filter keeping polygons whose label is in a set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    labels: BTreeSet<Label>,
}

impl LabelFilter {
    /// Keep polygons labelled with one of `labels`.
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
        }
    }
}

impl PolygonFilter for LabelFilter {
    fn filter(&self, _image: &View, information: &WorkflowInformation) -> Vec<usize> {
        information
            .iter()
            .filter(|record| record.label().is_some_and(|label| self.labels.contains(&label)))
            .map(|record| record.index())
            .collect()
    }
}

/// Options of a chain executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Result label; defaults to the executor position (`1`, `2`, ...).
    pub label: Option<String>,
    /// Clip each window to its polygon.
    pub clip: bool,
    /// Number of windows processed in parallel.
    pub n_jobs: usize,
}

struct Executor {
    label: String,
    workflow: Box<dyn Workflow>,
    filter: Box<dyn PolygonFilter>,
    clip: bool,
    pool: WorkerPool,
}

/// First workflow followed by windowed executors.
pub struct WorkflowChain {
    first_label: String,
    first: Box<dyn Workflow>,
    executors: Vec<Executor>,
}

impl std::fmt::Debug for WorkflowChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.executors.iter().map(|e| e.label.as_str()).collect();
        f.debug_struct("WorkflowChain")
            .field("first_label", &self.first_label)
            .field("executors", &labels)
            .finish_non_exhaustive()
    }
}

impl WorkflowChain {
    /// Start building a chain.
    #[must_use]
    pub fn builder() -> WorkflowChainBuilder {
        WorkflowChainBuilder::default()
    }

    /// Run the chain on `image`.
    ///
    /// Every result is expressed in `image` coordinates.
    ///
    /// # Errors
    ///
    /// Propagates the errors of every workflow of the chain.
    pub fn process(&self, image: &View) -> Result<ChainInformation, WorkflowError> {
        let first = self.first.process(image)?;
        tracing::debug!(
            label = %self.first_label,
            polygons = first.len(),
            "first workflow done"
        );

        let mut executed = Vec::with_capacity(self.executors.len());
        for executor in &self.executors {
            let windows: Vec<View> = executor
                .filter
                .filter(image, &first)
                .into_iter()
                .filter_map(|index| first.get(index))
                .map(|record| window_around(image, record.polygon(), executor.clip))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .flatten()
                .collect();
            tracing::debug!(label = %executor.label, windows = windows.len(), "executor");

            let results = executor.pool.map(windows, |window| {
                let (dx, dy) = window.offset();
                executor
                    .workflow
                    .process(&window)
                    .map(|info| info.translated(f64::from(dx), f64::from(dy)))
            })?;

            let mut merged: Option<WorkflowInformation> = None;
            for information in results {
                match merged.as_mut() {
                    Some(acc) => acc.merge(information)?,
                    None => merged = Some(information),
                }
            }
            executed.push((executor.label.clone(), merged.unwrap_or_default()));
        }

        let mut results = ChainInformation::new();
        results.push(self.first_label.clone(), first);
        for (label, information) in executed {
            results.push(label, information);
        }
        Ok(results)
    }
}

/// Window of `image` covering the pixels of `polygon`, optionally clipped.
///
/// Returns `None` for polygons lying outside the image.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn window_around(
    image: &View,
    polygon: &Polygon<f64>,
    clip: bool,
) -> Result<Option<View>, WorkflowError> {
    let Some(rect) = polygon.bounding_rect() else {
        return Ok(None);
    };
    let width = f64::from(image.width());
    let height = f64::from(image.height());
    // Coordinates are pixel centres: the last covered pixel is at `max`.
    let x0 = rect.min().x.floor().clamp(0.0, width);
    let y0 = rect.min().y.floor().clamp(0.0, height);
    let x1 = (rect.max().x.ceil() + 1.0).clamp(0.0, width);
    let y1 = (rect.max().y.ceil() + 1.0).clamp(0.0, height);
    if x1 <= x0 || y1 <= y0 {
        return Ok(None);
    }

    let window = image.window(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )?;
    Ok(Some(if clip {
        window.clipped(polygon.translate(-x0, -y0))
    } else {
        window
    }))
}

/// Builder of [`WorkflowChain`].
#[derive(Default)]
pub struct WorkflowChainBuilder {
    first: Option<(Box<dyn Workflow>, String)>,
    executors: Vec<Executor>,
}

impl WorkflowChainBuilder {
    /// The workflow run on the whole image, labelled `0`.
    #[must_use]
    pub fn first_workflow(self, workflow: impl Workflow + 'static) -> Self {
        self.labelled_first_workflow(workflow, "0")
    }

    /// The workflow run on the whole image, with a custom label.
    #[must_use]
    pub fn labelled_first_workflow(
        mut self,
        workflow: impl Workflow + 'static,
        label: impl Into<String>,
    ) -> Self {
        self.first = Some((Box::new(workflow), label.into()));
        self
    }

    /// Re-process the polygons selected by `filter` with `workflow`.
    #[must_use]
    pub fn add_executor(
        self,
        workflow: impl Workflow + 'static,
        filter: impl PolygonFilter + 'static,
    ) -> Self {
        self.add_executor_with(workflow, filter, ExecutorOptions::default())
    }

    /// Same as [`add_executor`](Self::add_executor) with explicit options.
    #[must_use]
    pub fn add_executor_with(
        mut self,
        workflow: impl Workflow + 'static,
        filter: impl PolygonFilter + 'static,
        options: ExecutorOptions,
    ) -> Self {
        let label = options
            .label
            .unwrap_or_else(|| (self.executors.len() + 1).to_string());
        self.executors.push(Executor {
            label,
            workflow: Box::new(workflow),
            filter: Box::new(filter),
            clip: options.clip,
            pool: WorkerPool::new(options.n_jobs),
        });
        self
    }

    /// Assemble the chain.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingComponent`] without first workflow
    /// and [`WorkflowError::Configuration`] when two workflows share a
    /// label.
    pub fn build(self) -> Result<WorkflowChain, WorkflowError> {
        let (first, first_label) = self
            .first
            .ok_or(WorkflowError::MissingComponent("first workflow"))?;
        let mut seen = BTreeSet::from([first_label.clone()]);
        for executor in &self.executors {
            if !seen.insert(executor.label.clone()) {
                return Err(WorkflowError::Configuration(format!(
                    "duplicate workflow label `{}` in chain",
                    executor.label
                )));
            }
        }
        Ok(WorkflowChain {
            first_label,
            first,
            executors: self.executors,
        })
    }
}
