//! Columnar workflow results.
//!
//! [`WorkflowInformation`] stores parallel arrays (polygons, labels and any
//! number of named extra fields) plus the timing of the run that produced
//! them. Two instances with the same field names can be merged.

use std::collections::BTreeMap;

use geo::{Polygon, Translate};
use serde::{Deserialize, Serialize};

use crate::timing::WorkflowTiming;
use crate::types::{Label, WorkflowError};

/// Value of an extra per-polygon field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// No value for this polygon.
    #[default]
    Missing,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl FieldValue {
    /// Whether the value is [`Missing`](Self::Missing).
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Numeric value, integers widened to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Integer(value) => Some(value as f64),
            Self::Float(value) => Some(value),
            Self::Missing | Self::Text(_) => None,
        }
    }

    /// Text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

/// Polygons found by a workflow run, with their labels and extra fields.
///
/// Deserialization applies the same length checks as
/// [`new`](Self::new) and [`with_field`](Self::with_field).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawWorkflowInformation")]
pub struct WorkflowInformation {
    polygons: Vec<Polygon<f64>>,
    labels: Vec<Option<Label>>,
    fields: BTreeMap<String, Vec<FieldValue>>,
    timing: WorkflowTiming,
}

/// Unchecked serialized form of [`WorkflowInformation`].
#[derive(Deserialize)]
struct RawWorkflowInformation {
    polygons: Vec<Polygon<f64>>,
    labels: Vec<Option<Label>>,
    fields: BTreeMap<String, Vec<FieldValue>>,
    timing: WorkflowTiming,
}

impl TryFrom<RawWorkflowInformation> for WorkflowInformation {
    type Error = WorkflowError;

    fn try_from(raw: RawWorkflowInformation) -> Result<Self, Self::Error> {
        raw.fields
            .into_iter()
            .try_fold(Self::new(raw.polygons, raw.labels, raw.timing)?, |info, (name, values)| {
                info.with_field(name, values)
            })
    }
}

impl WorkflowInformation {
    /// Record set of `polygons` with one label each.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::FieldLength`] if the lengths differ.
    pub fn new(
        polygons: Vec<Polygon<f64>>,
        labels: Vec<Option<Label>>,
        timing: WorkflowTiming,
    ) -> Result<Self, WorkflowError> {
        check_length("labels", polygons.len(), labels.len())?;
        Ok(Self {
            polygons,
            labels,
            fields: BTreeMap::new(),
            timing,
        })
    }

    /// Add (or replace) the extra field `name`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::FieldLength`] if `values` does not hold one
    /// value per polygon.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        values: Vec<FieldValue>,
    ) -> Result<Self, WorkflowError> {
        let name = name.into();
        check_length(&name, self.polygons.len(), values.len())?;
        self.fields.insert(name, values);
        Ok(self)
    }

    /// Number of polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Whether no polygon was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// All polygons.
    #[must_use]
    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.polygons
    }

    /// All labels, index-aligned with [`polygons`](Self::polygons).
    #[must_use]
    pub fn labels(&self) -> &[Option<Label>] {
        &self.labels
    }

    /// Values of the extra field `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&[FieldValue]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Names of the extra fields, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Timing of the run(s) that produced this record set.
    #[must_use]
    pub const fn timing(&self) -> &WorkflowTiming {
        &self.timing
    }

    /// Row `index`, or `None` past the end.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Record<'_>> {
        (index < self.len()).then_some(Record { info: self, index })
    }

    /// Iterate over all rows.
    pub fn iter(&self) -> impl Iterator<Item = Record<'_>> {
        (0..self.len()).map(|index| Record { info: self, index })
    }

    /// Append the rows and timings of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::IncompatibleSchema`] if the two record sets
    /// do not have the same extra field names.
    pub fn merge(&mut self, other: Self) -> Result<(), WorkflowError> {
        if !self.fields.keys().eq(other.fields.keys()) {
            return Err(WorkflowError::IncompatibleSchema {
                left: self.fields.keys().cloned().collect(),
                right: other.fields.keys().cloned().collect(),
            });
        }
        self.polygons.extend(other.polygons);
        self.labels.extend(other.labels);
        for (name, values) in other.fields {
            self.fields.entry(name).or_default().extend(values);
        }
        self.timing.merge(&other.timing);
        Ok(())
    }

    /// Shift every polygon by `(dx, dy)`.
    #[must_use]
    pub fn translated(mut self, dx: f64, dy: f64) -> Self {
        for polygon in &mut self.polygons {
            polygon.translate_mut(dx, dy);
        }
        self
    }
}

fn check_length(field: &str, expected: usize, actual: usize) -> Result<(), WorkflowError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WorkflowError::FieldLength {
            field: field.to_owned(),
            expected,
            actual,
        })
    }
}

/// One row of a [`WorkflowInformation`].
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    info: &'a WorkflowInformation,
    index: usize,
}

impl<'a> Record<'a> {
    /// Row index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The polygon.
    #[must_use]
    pub fn polygon(&self) -> &'a Polygon<f64> {
        &self.info.polygons[self.index]
    }

    /// The label, `None` when no classifier handled the polygon.
    #[must_use]
    pub fn label(&self) -> Option<Label> {
        self.info.labels[self.index]
    }

    /// Value of the extra field `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'a FieldValue> {
        self.info.fields.get(name).map(|values| &values[self.index])
    }
}

/// Results of a workflow chain, one record set per workflow label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainInformation {
    entries: Vec<(String, WorkflowInformation)>,
}

impl ChainInformation {
    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the results of the workflow labelled `label`.
    pub fn push(&mut self, label: impl Into<String>, information: WorkflowInformation) {
        self.entries.push((label.into(), information));
    }

    /// Results of the workflow labelled `label`.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&WorkflowInformation> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == label)
            .map(|(_, information)| information)
    }

    /// `(label, results)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkflowInformation)> {
        self.entries
            .iter()
            .map(|(label, information)| (label.as_str(), information))
    }

    /// Number of workflows in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain produced nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All record sets merged into one.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::IncompatibleSchema`] if the entries do not
    /// share the same extra fields.
    pub fn merged(&self) -> Result<WorkflowInformation, WorkflowError> {
        let mut entries = self.entries.iter().map(|(_, information)| information);
        let Some(first) = entries.next() else {
            return Ok(WorkflowInformation::default());
        };
        let mut merged = first.clone();
        for information in entries {
            merged.merge(information.clone())?;
        }
        Ok(merged)
    }
}
