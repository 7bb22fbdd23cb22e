//! Min/max/null summaries and the filter predicates evaluated against them.

use std::cmp::Ordering;

use crate::types::{LogicalType, Value};

/// Comparison operator of a [`TableFilter`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ComparisonOp {
    /// `value = constant`
    Equal,
    /// `value <> constant`
    NotEqual,
    /// `value < constant`
    LessThan,
    /// `value <= constant`
    LessThanOrEqual,
    /// `value > constant`
    GreaterThan,
    /// `value >= constant`
    GreaterThanOrEqual,
}

/// Predicate pushed into a column scan.
#[derive(Clone, Debug, PartialEq)]
pub enum TableFilter {
    /// Compare each value against a constant; nulls never match.
    Compare {
        /// Operator applied as `value op constant`.
        op: ComparisonOp,
        /// Right-hand constant.
        constant: Value,
    },
    /// Matches nulls only.
    IsNull,
    /// Matches non-null values only.
    IsNotNull,
}

impl TableFilter {
    /// Shorthand for a comparison filter.
    pub fn compare(op: ComparisonOp, constant: impl Into<Value>) -> Self {
        TableFilter::Compare {
            op,
            constant: constant.into(),
        }
    }

    /// Evaluates the filter against a single value.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            TableFilter::IsNull => value.is_null(),
            TableFilter::IsNotNull => !value.is_null(),
            TableFilter::Compare { op, constant } => match value.compare(constant) {
                None => false,
                Some(ordering) => match op {
                    ComparisonOp::Equal => ordering == Ordering::Equal,
                    ComparisonOp::NotEqual => ordering != Ordering::Equal,
                    ComparisonOp::LessThan => ordering == Ordering::Less,
                    ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
                    ComparisonOp::GreaterThan => ordering == Ordering::Greater,
                    ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
                },
            },
        }
    }
}

/// Outcome of checking a filter against statistics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterPropagateResult {
    /// Some rows may or may not match.
    NoPruningPossible,
    /// No row covered by the statistics can match.
    AlwaysFalse,
    /// Every row covered by the statistics matches.
    AlwaysTrue,
}

/// Summary of the values stored in a segment or column.
///
/// `min`/`max` are `None` until a non-null value has been observed.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseStatistics {
    logical_type: LogicalType,
    min: Option<Value>,
    max: Option<Value>,
    has_null: bool,
    has_no_null: bool,
}

impl BaseStatistics {
    /// Statistics describing zero values.
    pub fn empty(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            min: None,
            max: None,
            has_null: false,
            has_no_null: false,
        }
    }

    /// Computes statistics over `values`.
    pub fn from_values<'a>(
        logical_type: LogicalType,
        values: impl IntoIterator<Item = &'a Value>,
    ) -> Self {
        let mut stats = Self::empty(logical_type);
        for value in values {
            stats.update(value);
        }
        stats
    }

    /// Type the statistics describe.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Smallest non-null value seen.
    pub fn min(&self) -> Option<&Value> {
        self.min.as_ref()
    }

    /// Largest non-null value seen.
    pub fn max(&self) -> Option<&Value> {
        self.max.as_ref()
    }

    /// Returns true when at least one null was seen.
    pub fn has_null(&self) -> bool {
        self.has_null
    }

    /// Returns true when at least one non-null value was seen.
    pub fn has_no_null(&self) -> bool {
        self.has_no_null
    }

    /// Returns true when the statistics cover no values at all.
    pub fn is_empty(&self) -> bool {
        !self.has_null && !self.has_no_null
    }

    /// Widens the statistics to include `value`.
    pub fn update(&mut self, value: &Value) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        self.has_no_null = true;
        if self
            .min
            .as_ref()
            .map_or(true, |min| value.compare(min) == Some(Ordering::Less))
        {
            self.min = Some(value.clone());
        }
        if self
            .max
            .as_ref()
            .map_or(true, |max| value.compare(max) == Some(Ordering::Greater))
        {
            self.max = Some(value.clone());
        }
    }

    /// Widens the statistics to include everything `other` covers.
    pub fn merge(&mut self, other: &BaseStatistics) {
        self.has_null |= other.has_null;
        if let Some(min) = &other.min {
            self.update(min);
        }
        if let Some(max) = &other.max {
            self.update(max);
        }
    }

    /// Decides whether `filter` can match any value the statistics cover.
    pub fn check_filter(&self, filter: &TableFilter) -> FilterPropagateResult {
        if self.is_empty() {
            return FilterPropagateResult::AlwaysFalse;
        }
        match filter {
            TableFilter::IsNull => {
                if !self.has_null {
                    FilterPropagateResult::AlwaysFalse
                } else if !self.has_no_null {
                    FilterPropagateResult::AlwaysTrue
                } else {
                    FilterPropagateResult::NoPruningPossible
                }
            }
            TableFilter::IsNotNull => {
                if !self.has_no_null {
                    FilterPropagateResult::AlwaysFalse
                } else if !self.has_null {
                    FilterPropagateResult::AlwaysTrue
                } else {
                    FilterPropagateResult::NoPruningPossible
                }
            }
            TableFilter::Compare { op, constant } => self.check_comparison(*op, constant),
        }
    }

    fn check_comparison(&self, op: ComparisonOp, constant: &Value) -> FilterPropagateResult {
        use FilterPropagateResult::*;
        let (Some(min), Some(max)) = (&self.min, &self.max) else {
            // Only nulls; comparisons never match them.
            return AlwaysFalse;
        };
        let (Some(min_cmp), Some(max_cmp)) = (min.compare(constant), max.compare(constant)) else {
            return NoPruningPossible;
        };
        let result = match op {
            ComparisonOp::Equal => {
                if min_cmp == Ordering::Greater || max_cmp == Ordering::Less {
                    AlwaysFalse
                } else if min_cmp == Ordering::Equal && max_cmp == Ordering::Equal {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            ComparisonOp::NotEqual => {
                if min_cmp == Ordering::Equal && max_cmp == Ordering::Equal {
                    AlwaysFalse
                } else if min_cmp == Ordering::Greater || max_cmp == Ordering::Less {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            ComparisonOp::LessThan => {
                if min_cmp != Ordering::Less {
                    AlwaysFalse
                } else if max_cmp == Ordering::Less {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            ComparisonOp::LessThanOrEqual => {
                if min_cmp == Ordering::Greater {
                    AlwaysFalse
                } else if max_cmp != Ordering::Greater {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            ComparisonOp::GreaterThan => {
                if max_cmp != Ordering::Greater {
                    AlwaysFalse
                } else if min_cmp == Ordering::Greater {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
            ComparisonOp::GreaterThanOrEqual => {
                if max_cmp == Ordering::Less {
                    AlwaysFalse
                } else if min_cmp != Ordering::Less {
                    AlwaysTrue
                } else {
                    NoPruningPossible
                }
            }
        };
        if result == AlwaysTrue && self.has_null {
            NoPruningPossible
        } else {
            result
        }
    }
}
