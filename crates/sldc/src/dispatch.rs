//! Dispatch and classification of located polygons.
//!
//! A [`Dispatcher`] routes every polygon to at most one classifier, either
//! through an ordered list of [`DispatchingRule`]s (first match wins) or
//! through a user function returning a dispatch label. The
//! [`DispatcherClassifier`] then calls each classifier once with all the
//! polygons routed to it.

use std::collections::BTreeMap;

use geo::Polygon;

use crate::image::View;
use crate::timing::WorkflowTiming;
use crate::types::{Label, WorkflowError};

/// Predicate deciding whether a polygon belongs to a classifier.
pub trait DispatchingRule: Send + Sync {
    /// Whether `polygon` (in `image` coordinates) matches this rule.
    fn evaluate(&self, image: &View, polygon: &Polygon<f64>) -> bool;

    /// Evaluate several polygons at once.
    fn evaluate_batch(&self, image: &View, polygons: &[&Polygon<f64>]) -> Vec<bool> {
        polygons
            .iter()
            .map(|polygon| self.evaluate(image, polygon))
            .collect()
    }
}

/// Rule matching every polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchAllRule;

impl DispatchingRule for CatchAllRule {
    fn evaluate(&self, _image: &View, _polygon: &Polygon<f64>) -> bool {
        true
    }
}

/// Classifier predicting a label and a probability for each polygon.
pub trait PolygonClassifier: Send + Sync {
    /// Classify `polygons` (in `image` coordinates).
    ///
    /// Returns one label and one probability per polygon, in order.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`WorkflowError::Collaborator`].
    fn predict_batch(
        &self,
        image: &View,
        polygons: &[&Polygon<f64>],
    ) -> Result<(Vec<Label>, Vec<f64>), WorkflowError>;
}

/// Custom dispatch function: returns a dispatch label or `None`.
pub type DispatchFn = dyn Fn(&View, &Polygon<f64>) -> Option<String> + Send + Sync;

/// Routing strategy, chosen once when the workflow is built.
pub enum Dispatcher {
    /// Ordered rules; the `i`-th rule routes to the `i`-th classifier.
    RuleBased {
        /// Rules in evaluation order.
        rules: Vec<Box<dyn DispatchingRule>>,
        /// Dispatch label of each rule.
        labels: Vec<String>,
    },
    /// User function whose labels are mapped to classifier indices.
    Custom {
        /// The dispatch function.
        dispatch: Box<DispatchFn>,
        /// Dispatch label to classifier index. Unknown labels are unmatched.
        mapping: BTreeMap<String, usize>,
    },
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleBased { labels, .. } => f
                .debug_struct("RuleBased")
                .field("labels", labels)
                .finish_non_exhaustive(),
            Self::Custom { mapping, .. } => f
                .debug_struct("Custom")
                .field("mapping", mapping)
                .finish_non_exhaustive(),
        }
    }
}

impl Dispatcher {
    /// Rule-based dispatcher labelling each rule with its index.
    #[must_use]
    pub fn rules(rules: Vec<Box<dyn DispatchingRule>>) -> Self {
        let labels = (0..rules.len()).map(|index| index.to_string()).collect();
        Self::RuleBased { rules, labels }
    }

    /// Custom dispatcher.
    pub fn custom<F>(dispatch: F, mapping: BTreeMap<String, usize>) -> Self
    where
        F: Fn(&View, &Polygon<f64>) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom {
            dispatch: Box::new(dispatch),
            mapping,
        }
    }

    /// Route every polygon: `(classifier index, dispatch label)` or `None`.
    fn dispatch(&self, image: &View, polygons: &[&Polygon<f64>]) -> Vec<Option<(usize, String)>> {
        match self {
            Self::RuleBased { rules, labels } => {
                let mut routes = vec![None; polygons.len()];
                let mut pending: Vec<usize> = (0..polygons.len()).collect();
                for (index, rule) in rules.iter().enumerate() {
                    if pending.is_empty() {
                        break;
                    }
                    let candidates: Vec<&Polygon<f64>> =
                        pending.iter().map(|&i| polygons[i]).collect();
                    let matches = rule.evaluate_batch(image, &candidates);
                    let mut still_pending = Vec::with_capacity(pending.len());
                    for (&i, matched) in pending.iter().zip(matches) {
                        if matched {
                            routes[i] = Some((index, labels[index].clone()));
                        } else {
                            still_pending.push(i);
                        }
                    }
                    pending = still_pending;
                }
                routes
            }
            Self::Custom { dispatch, mapping } => polygons
                .iter()
                .map(|polygon| {
                    let label = dispatch(image, polygon)?;
                    let index = *mapping.get(&label)?;
                    Some((index, label))
                })
                .collect(),
        }
    }

    fn targets(&self) -> Vec<usize> {
        match self {
            Self::RuleBased { rules, .. } => (0..rules.len()).collect(),
            Self::Custom { mapping, .. } => mapping.values().copied().collect(),
        }
    }
}

/// Per-polygon output of [`DispatcherClassifier::dispatch_classify_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Predicted label, `None` for unmatched polygons.
    pub predictions: Vec<Option<Label>>,
    /// Prediction probability, `0.0` for unmatched polygons.
    pub probabilities: Vec<f64>,
    /// Dispatch label, `None` for unmatched polygons.
    pub dispatches: Vec<Option<String>>,
}

impl Classification {
    /// Append the results of another batch.
    pub fn extend(&mut self, other: Self) {
        self.predictions.extend(other.predictions);
        self.probabilities.extend(other.probabilities);
        self.dispatches.extend(other.dispatches);
    }

    /// Number of classified polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Dispatcher plus the classifiers it routes to.
pub struct DispatcherClassifier {
    dispatcher: Dispatcher,
    classifiers: Vec<Box<dyn PolygonClassifier>>,
}

impl std::fmt::Debug for DispatcherClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherClassifier")
            .field("dispatcher", &self.dispatcher)
            .field("classifiers", &self.classifiers.len())
            .finish()
    }
}

impl DispatcherClassifier {
    /// Pair `dispatcher` with its `classifiers`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if a rule or mapping entry
    /// has no classifier, or if rule labels and rules differ in number.
    pub fn new(
        dispatcher: Dispatcher,
        classifiers: Vec<Box<dyn PolygonClassifier>>,
    ) -> Result<Self, WorkflowError> {
        if let Dispatcher::RuleBased { rules, labels } = &dispatcher {
            if rules.len() != labels.len() {
                return Err(WorkflowError::Configuration(format!(
                    "{} dispatching rules but {} rule labels",
                    rules.len(),
                    labels.len()
                )));
            }
            if rules.len() != classifiers.len() {
                return Err(WorkflowError::Configuration(format!(
                    "{} dispatching rules but {} classifiers",
                    rules.len(),
                    classifiers.len()
                )));
            }
        }
        if let Some(missing) = dispatcher
            .targets()
            .into_iter()
            .find(|&index| index >= classifiers.len())
        {
            return Err(WorkflowError::Configuration(format!(
                "dispatch target {missing} has no classifier ({} available)",
                classifiers.len()
            )));
        }
        Ok(Self {
            dispatcher,
            classifiers,
        })
    }

    /// Number of classifiers.
    #[must_use]
    pub fn classifier_count(&self) -> usize {
        self.classifiers.len()
    }

    /// Dispatch then classify `polygons`.
    ///
    /// Every classifier is invoked at most once, with all the polygons
    /// routed to it. Records the `dispatch` and `classify` phases in
    /// `timing`.
    ///
    /// # Errors
    ///
    /// Propagates classifier failures, and returns
    /// [`WorkflowError::Collaborator`] if a classifier returns the wrong
    /// number of predictions.
    pub fn dispatch_classify_batch(
        &self,
        image: &View,
        polygons: &[&Polygon<f64>],
        timing: &mut WorkflowTiming,
    ) -> Result<Classification, WorkflowError> {
        let routes = timing.time("dispatch", || self.dispatcher.dispatch(image, polygons));

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, route) in routes.iter().enumerate() {
            if let Some((classifier, _)) = route {
                groups.entry(*classifier).or_default().push(i);
            }
        }
        let dispatched: usize = groups.values().map(Vec::len).sum();
        tracing::info!(
            dispatched,
            unmatched = polygons.len() - dispatched,
            "dispatched polygons"
        );

        let mut predictions = vec![None; polygons.len()];
        let mut probabilities = vec![0.0; polygons.len()];
        timing.start("classify");
        for (classifier, members) in &groups {
            let batch: Vec<&Polygon<f64>> = members.iter().map(|&i| polygons[i]).collect();
            let (labels, probas) = self.classifiers[*classifier].predict_batch(image, &batch)?;
            if labels.len() != batch.len() || probas.len() != batch.len() {
                return Err(WorkflowError::Collaborator {
                    component: "classifier",
                    reason: format!(
                        "classifier {classifier} returned {} labels and {} probabilities \
                         for {} polygons",
                        labels.len(),
                        probas.len(),
                        batch.len()
                    ),
                });
            }
            for ((&i, label), proba) in members.iter().zip(labels).zip(probas) {
                predictions[i] = Some(label);
                probabilities[i] = proba;
            }
        }
        timing.end("classify");

        Ok(Classification {
            predictions,
            probabilities,
            dispatches: routes
                .into_iter()
                .map(|route| route.map(|(_, label)| label))
                .collect(),
        })
    }
}
