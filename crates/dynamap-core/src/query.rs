//! Query and scan expressions, key condition resolution and paging.
//!
//! A query names its hash key through a record whose key fields are set and
//! adds at most one range condition. [`resolve_key_conditions`] picks the
//! primary table, a local index or a global index from the fields involved
//! and rejects combinations that fit more than one.

use std::collections::{BTreeSet, HashMap};

use dynamap_model::input::{QueryInput, ScanInput};
use dynamap_model::types::{
    ComparisonOperator, Condition, ConditionalOperator, ConsumedCapacity, KeyType,
    ReturnConsumedCapacity, Select,
};
use dynamap_model::{AttributeValue, Item};
use typed_builder::TypedBuilder;

use crate::error::MappingError;
use crate::field::Record;
use crate::table::{FieldModel, TableModel};

/// A query against a table or one of its indexes.
///
/// ```
/// use dynamap_core::query::QueryExpression;
/// use dynamap_model::types::{ComparisonOperator, Condition};
/// use dynamap_model::AttributeValue;
///
/// #[derive(Debug, Clone, Default)]
/// struct Reply { thread: String }
///
/// let expr = QueryExpression::builder()
///     .hash_key_values(Reply { thread: "t-1".to_owned() })
///     .range_key_conditions(vec![(
///         "posted".to_owned(),
///         Condition::new(ComparisonOperator::Gt, vec![AttributeValue::N("10".to_owned())]),
///     )])
///     .limit(20)
///     .build();
/// assert!(expr.scan_index_forward);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct QueryExpression<T> {
    /// Record carrying the hash key value(s). Every non-null hash field
    /// produces a condition; leave a field `None` to leave it out.
    #[builder(default, setter(strip_option))]
    pub hash_key_values: Option<T>,
    /// Range key conditions by attribute name. At most one is allowed.
    #[builder(default)]
    pub range_key_conditions: Vec<(String, Condition)>,
    /// Index to query. Inferred when absent.
    #[builder(default, setter(strip_option, into))]
    pub index_name: Option<String>,
    /// Raw key condition expression, exclusive with structured conditions.
    #[builder(default, setter(strip_option, into))]
    pub key_condition_expression: Option<String>,
    /// Legacy non-key filter conditions.
    #[builder(default)]
    pub query_filter: HashMap<String, Condition>,
    /// How `query_filter` conditions combine.
    #[builder(default, setter(strip_option))]
    pub conditional_operator: Option<ConditionalOperator>,
    /// Filter expression applied after the key conditions.
    #[builder(default, setter(strip_option, into))]
    pub filter_expression: Option<String>,
    /// Attributes to return.
    #[builder(default, setter(strip_option, into))]
    pub projection_expression: Option<String>,
    /// Expression attribute name placeholders.
    #[builder(default)]
    pub expression_attribute_names: HashMap<String, String>,
    /// Expression attribute value placeholders.
    #[builder(default)]
    pub expression_attribute_values: HashMap<String, AttributeValue>,
    /// Ascending range key order.
    #[builder(default = true)]
    pub scan_index_forward: bool,
    /// Overrides the mapper's read consistency.
    #[builder(default, setter(strip_option))]
    pub consistent_read: Option<bool>,
    /// Page size.
    #[builder(default, setter(strip_option))]
    pub limit: Option<i32>,
    /// Key to resume after.
    #[builder(default)]
    pub exclusive_start_key: Item,
    /// What to return.
    #[builder(default, setter(strip_option))]
    pub select: Option<Select>,
    /// Consumed capacity detail.
    #[builder(default, setter(strip_option))]
    pub return_consumed_capacity: Option<ReturnConsumedCapacity>,
}

/// A scan of a table or index.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ScanExpression {
    /// Index to scan.
    #[builder(default, setter(strip_option, into))]
    pub index_name: Option<String>,
    /// Legacy filter conditions.
    #[builder(default)]
    pub scan_filter: HashMap<String, Condition>,
    /// How `scan_filter` conditions combine.
    #[builder(default, setter(strip_option))]
    pub conditional_operator: Option<ConditionalOperator>,
    /// Filter expression.
    #[builder(default, setter(strip_option, into))]
    pub filter_expression: Option<String>,
    /// Attributes to return.
    #[builder(default, setter(strip_option, into))]
    pub projection_expression: Option<String>,
    /// Expression attribute name placeholders.
    #[builder(default)]
    pub expression_attribute_names: HashMap<String, String>,
    /// Expression attribute value placeholders.
    #[builder(default)]
    pub expression_attribute_values: HashMap<String, AttributeValue>,
    /// Page size.
    #[builder(default, setter(strip_option))]
    pub limit: Option<i32>,
    /// Key to resume after. Ignored by parallel scans.
    #[builder(default)]
    pub exclusive_start_key: Item,
    /// Segment to scan. Overwritten by parallel scans.
    #[builder(default, setter(strip_option))]
    pub segment: Option<i32>,
    /// Total segments. Overwritten by parallel scans.
    #[builder(default, setter(strip_option))]
    pub total_segments: Option<i32>,
    /// What to return.
    #[builder(default, setter(strip_option))]
    pub select: Option<Select>,
    /// Overrides the mapper's read consistency.
    #[builder(default, setter(strip_option))]
    pub consistent_read: Option<bool>,
    /// Consumed capacity detail.
    #[builder(default, setter(strip_option))]
    pub return_consumed_capacity: Option<ReturnConsumedCapacity>,
}

/// One page of query or scan results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Decoded items.
    pub items: Vec<T>,
    /// Key to pass as `exclusive_start_key` for the next page, if any.
    pub last_evaluated_key: Option<Item>,
    /// Items returned after filtering.
    pub count: i32,
    /// Items examined before filtering.
    pub scanned_count: i32,
    /// Capacity the call consumed, when it was requested.
    pub consumed_capacity: Option<ConsumedCapacity>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            last_evaluated_key: None,
            count: 0,
            scanned_count: 0,
            consumed_capacity: None,
        }
    }
}

impl<T> Page<T> {
    /// Whether more pages follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.last_evaluated_key.is_some()
    }
}

/// Key conditions ready to send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedKeyConditions {
    /// Index to query, `None` for the table itself.
    pub index_name: Option<String>,
    /// At most one hash and one range condition.
    pub key_conditions: HashMap<String, Condition>,
    /// Raw expression passed through unchanged.
    pub key_condition_expression: Option<String>,
}

fn hash_key_conditions<'m, T: Record>(
    model: &'m TableModel<T>,
    values: Option<&T>,
) -> Result<Vec<(&'m FieldModel<T>, Condition)>, MappingError> {
    let Some(values) = values else {
        return Ok(Vec::new());
    };
    let mut conditions = Vec::new();
    for field in model.fields() {
        let is_hash = field.key_type() == Some(KeyType::Hash)
            || field.meta().global_indexes(KeyType::Hash).next().is_some();
        if !is_hash {
            continue;
        }
        let value = field.get(values);
        if value.is_null() {
            continue;
        }
        let operand = field.convert_value(value)?.ok_or_else(|| {
            MappingError::new(model.owner(), "empty hash key value").with_property(field.name())
        })?;
        conditions.push((
            field,
            Condition::new(ComparisonOperator::Eq, vec![operand]),
        ));
    }
    Ok(conditions)
}

fn join(names: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
    format!("[{}]", names.join(", "))
}

/// Picks the index and key conditions for a query.
///
/// Errors name the fields and indexes involved.
#[allow(clippy::too_many_lines)]
pub fn resolve_key_conditions<T: Record>(
    model: &TableModel<T>,
    expr: &QueryExpression<T>,
) -> Result<ResolvedKeyConditions, MappingError> {
    let illegal = |reason: String| MappingError::new(model.owner(), reason);
    let hash_conditions = hash_key_conditions(model, expr.hash_key_values.as_ref())?;
    let range_conditions = &expr.range_key_conditions;

    if let Some(expression) = &expr.key_condition_expression {
        if !hash_conditions.is_empty() {
            return Err(illegal(
                "Illegal query expression: Either the hash key conditions or the key condition \
                 expression must be specified but not both."
                    .to_owned(),
            ));
        }
        if !range_conditions.is_empty() {
            return Err(illegal(
                "Illegal query expression: The range key conditions can only be specified when \
                 the key condition expression is not specified."
                    .to_owned(),
            ));
        }
        return Ok(ResolvedKeyConditions {
            index_name: expr.index_name.clone(),
            key_conditions: HashMap::new(),
            key_condition_expression: Some(expression.clone()),
        });
    }

    if hash_conditions.is_empty() {
        return Err(illegal(
            "Illegal query expression: No hash key condition is found in the query".to_owned(),
        ));
    }
    if range_conditions.len() > 1 {
        return Err(illegal(format!(
            "Illegal query expression: Conditions on multiple range keys ({}) are found in the \
             query. Only one range key condition is accepted.",
            join(range_conditions.iter().map(|(name, _)| name))
        )));
    }

    let range = range_conditions.first();
    let primary_hash = model.hash_key().attribute_name();
    let mut has_primary_range = false;
    let mut lsis_on_range = BTreeSet::new();
    let mut gsis_on_range = BTreeSet::new();
    if let Some((name, _)) = range {
        let rk = model.field(name)?;
        has_primary_range = rk.key_type() == Some(KeyType::Range);
        lsis_on_range.extend(rk.meta().local_indexes().map(str::to_owned));
        gsis_on_range.extend(rk.meta().global_indexes(KeyType::Range).map(str::to_owned));
        if !has_primary_range && lsis_on_range.is_empty() && gsis_on_range.is_empty() {
            return Err(illegal(format!(
                "The query contains a condition on a range key ({name}) that is not declared as \
                 the range key of the table or of any index."
            ))
            .with_property(rk.name()));
        }
    }

    let user_index = expr.index_name.as_deref();
    let user_lsi = user_index.is_some_and(|index| {
        lsis_on_range.contains(index)
            || (range.is_none()
                && model
                    .local_secondary_indexes()
                    .iter()
                    .any(|lsi| lsi.index_name == index))
    });
    let user_gsi = user_index.is_some_and(|index| {
        gsis_on_range.contains(index)
            || (range.is_none()
                && model
                    .global_secondary_indexes()
                    .iter()
                    .any(|gsi| gsi.index_name == index))
    });
    if let Some(index) = user_index {
        if user_lsi && user_gsi {
            return Err(illegal(format!(
                "Invalid query: Index \"{index}\" is annotated as both a LSI and a GSI for attribute."
            )));
        }
    }

    let mut has_primary_hash = false;
    let mut gsis_on_hash: Vec<BTreeSet<String>> = Vec::with_capacity(hash_conditions.len());
    let mut chosen: Option<usize> = None;
    for (pos, (hk, _)) in hash_conditions.iter().enumerate() {
        let is_primary = hk.attribute_name() == primary_hash;
        has_primary_hash |= is_primary;
        let gsis: BTreeSet<String> = hk.meta().global_indexes(KeyType::Hash).map(str::to_owned).collect();
        if let Some(index) = user_index {
            let applicable = (user_lsi && is_primary) || (user_gsi && gsis.contains(index));
            if applicable {
                if let Some(prev) = chosen {
                    return Err(illegal(format!(
                        "Ambiguous query expression: More than one hash key EQ conditions ({}, {}) \
                         are applicable to the specified index ({index}). Please provide only one \
                         of them in the query expression.",
                        hash_conditions[prev].0.attribute_name(),
                        hk.attribute_name()
                    )));
                }
                chosen = Some(pos);
            }
        }
        gsis_on_hash.push(gsis);
    }

    let condition_of = |pos: usize| {
        let (field, condition) = &hash_conditions[pos];
        (field.attribute_name().to_owned(), condition.clone())
    };
    let with_range = |mut conditions: HashMap<String, Condition>| {
        if let Some((name, condition)) = range {
            conditions.insert(name.clone(), condition.clone());
        }
        conditions
    };

    // Explicit index.
    if let Some(index) = user_index {
        if range.is_some() && !user_lsi && !user_gsi {
            return Err(illegal(format!(
                "Illegal query expression: No range key condition is applicable to the specified \
                 index ({index})."
            )));
        }
        let Some(pos) = chosen else {
            return Err(illegal(format!(
                "Illegal query expression: No hash key condition is applicable to the specified \
                 index ({index})."
            )));
        };
        return Ok(ResolvedKeyConditions {
            index_name: Some(index.to_owned()),
            key_conditions: with_range(HashMap::from([condition_of(pos)])),
            key_condition_expression: None,
        });
    }

    // Inferred from the range condition.
    if let Some((range_name, _)) = range {
        if has_primary_hash && has_primary_range {
            let pos = hash_conditions
                .iter()
                .position(|(hk, _)| hk.attribute_name() == primary_hash)
                .unwrap_or_default();
            return Ok(ResolvedKeyConditions {
                index_name: None,
                key_conditions: with_range(HashMap::from([condition_of(pos)])),
                key_condition_expression: None,
            });
        }

        let mut found: Option<(usize, String)> = None;
        for (pos, (hk, _)) in hash_conditions.iter().enumerate() {
            let hash_name = hk.attribute_name();
            let mut candidate: Option<String> = None;
            if hash_name == primary_hash && lsis_on_range.len() == 1 {
                candidate = lsis_on_range.first().cloned();
            }
            let shared: Vec<&String> = gsis_on_hash[pos].intersection(&gsis_on_range).collect();
            if let [gsi] = shared.as_slice() {
                if let Some(lsi) = &candidate {
                    return Err(ambiguous(
                        model,
                        (hash_name, lsi.as_str()),
                        (hash_name, gsi.as_str()),
                        range_name,
                    ));
                }
                candidate = Some((*gsi).clone());
            }
            if let Some(index) = candidate {
                if let Some((prev, prev_index)) = &found {
                    return Err(ambiguous(
                        model,
                        (hash_conditions[*prev].0.attribute_name(), prev_index.as_str()),
                        (hash_name, index.as_str()),
                        range_name,
                    ));
                }
                found = Some((pos, index));
            }
        }
        let Some((pos, index)) = found else {
            return Err(illegal(
                "Illegal query expression: Cannot infer the index name from the query expression."
                    .to_owned(),
            ));
        };
        return Ok(ResolvedKeyConditions {
            index_name: Some(index),
            key_conditions: with_range(HashMap::from([condition_of(pos)])),
            key_condition_expression: None,
        });
    }

    // Hash conditions only.
    if hash_conditions.len() > 1 {
        if has_primary_hash {
            let pos = hash_conditions
                .iter()
                .position(|(hk, _)| hk.attribute_name() == primary_hash)
                .unwrap_or_default();
            return Ok(ResolvedKeyConditions {
                index_name: None,
                key_conditions: HashMap::from([condition_of(pos)]),
                key_condition_expression: None,
            });
        }
        let union: BTreeSet<&String> = gsis_on_hash.iter().flatten().collect();
        return match union.into_iter().collect::<Vec<_>>().as_slice() {
            [index] => {
                let pos = gsis_on_hash
                    .iter()
                    .position(|gsis| gsis.contains(*index))
                    .unwrap_or_default();
                Ok(ResolvedKeyConditions {
                    index_name: Some((*index).clone()),
                    key_conditions: HashMap::from([condition_of(pos)]),
                    key_condition_expression: None,
                })
            }
            [] => Err(illegal(
                "Illegal query expression: No GSI is found for the supplied hash key conditions."
                    .to_owned(),
            )),
            _ => Err(illegal(format!(
                "Ambiguous query expression: More than one index hash key EQ conditions ({}) are \
                 applicable to the query. Please provide only one of them in the query \
                 expression, or specify the appropriate index name.",
                join(hash_conditions.iter().map(|(hk, _)| hk.attribute_name()))
            ))),
        };
    }

    let (hk, _) = &hash_conditions[0];
    let index_name = if has_primary_hash {
        None
    } else {
        match gsis_on_hash[0].iter().collect::<Vec<_>>().as_slice() {
            [index] => Some((*index).clone()),
            [] => {
                return Err(illegal(format!(
                    "Illegal query expression: No GSI is found in the index hash key declaration \
                     for attribute \"{}\".",
                    hk.attribute_name()
                )));
            }
            many => {
                return Err(illegal(format!(
                    "Ambiguous query expression: More than one GSIs ({}) are applicable to the \
                     query. Please specify one of them in your query expression.",
                    join(many.iter())
                )));
            }
        }
    };
    Ok(ResolvedKeyConditions {
        index_name,
        key_conditions: HashMap::from([condition_of(0)]),
        key_condition_expression: None,
    })
}

fn ambiguous<T: Record>(
    model: &TableModel<T>,
    first: (&str, &str),
    second: (&str, &str),
    range: &str,
) -> MappingError {
    MappingError::new(
        model.owner(),
        format!(
            "Ambiguous query expression: Found multiple valid queries: (Hash: \"{}\", Range: \
             \"{range}\", Index: \"{}\") and (Hash: \"{}\", Range: \"{range}\", Index: \"{}\").",
            first.0, first.1, second.0, second.1
        ),
    )
}

/// Builds the wire request for a query.
pub(crate) fn query_input<T: Record>(
    model: &TableModel<T>,
    expr: &QueryExpression<T>,
    table_name: String,
    consistent_read: Option<bool>,
) -> Result<QueryInput, MappingError> {
    let resolved = resolve_key_conditions(model, expr)?;
    Ok(QueryInput {
        table_name,
        index_name: resolved.index_name,
        key_conditions: resolved.key_conditions,
        key_condition_expression: resolved.key_condition_expression,
        query_filter: expr.query_filter.clone(),
        conditional_operator: expr.conditional_operator,
        filter_expression: expr.filter_expression.clone(),
        projection_expression: expr.projection_expression.clone(),
        expression_attribute_names: expr.expression_attribute_names.clone(),
        expression_attribute_values: expr.expression_attribute_values.clone(),
        scan_index_forward: Some(expr.scan_index_forward),
        limit: expr.limit,
        exclusive_start_key: expr.exclusive_start_key.clone(),
        select: expr.select,
        consistent_read: expr.consistent_read.or(consistent_read),
        return_consumed_capacity: expr.return_consumed_capacity,
    })
}

/// Builds the wire request for a scan.
pub(crate) fn scan_input(
    expr: &ScanExpression,
    table_name: String,
    consistent_read: Option<bool>,
) -> ScanInput {
    ScanInput {
        table_name,
        index_name: expr.index_name.clone(),
        scan_filter: expr.scan_filter.clone(),
        conditional_operator: expr.conditional_operator,
        filter_expression: expr.filter_expression.clone(),
        projection_expression: expr.projection_expression.clone(),
        expression_attribute_names: expr.expression_attribute_names.clone(),
        expression_attribute_values: expr.expression_attribute_values.clone(),
        limit: expr.limit,
        exclusive_start_key: expr.exclusive_start_key.clone(),
        segment: expr.segment,
        total_segments: expr.total_segments,
        select: expr.select,
        consistent_read: expr.consistent_read.or(consistent_read),
        return_consumed_capacity: expr.return_consumed_capacity,
    }
}

/// One scan request per segment, each starting from the beginning.
pub(crate) fn parallel_scan_inputs(
    expr: &ScanExpression,
    table_name: &str,
    consistent_read: Option<bool>,
    total_segments: i32,
) -> Vec<ScanInput> {
    (0..total_segments)
        .map(|segment| ScanInput {
            segment: Some(segment),
            total_segments: Some(total_segments),
            exclusive_start_key: Item::new(),
            ..scan_input(expr, table_name.to_owned(), consistent_read)
        })
        .collect()
}
