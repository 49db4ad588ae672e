//! Save and delete planning: generated values, version assertions and the
//! attribute updates sent for each save behavior.

use std::collections::HashMap;

use dynamap_model::types::{
    AttributeValueUpdate, ConditionalOperator, ExpectedAttributeValue, ReturnValue,
};
use dynamap_model::input::{DeleteItemInput, PutItemInput, UpdateItemInput};
use dynamap_model::{AttributeValue, Item};
use typed_builder::TypedBuilder;

use crate::config::SaveBehavior;
use crate::error::{MapperError, MapperResult, MappingError};
use crate::field::{GenerateStrategy, Record};
use crate::table::{FieldModel, TableModel};
use crate::value::Value;

/// User conditions attached to a save or delete.
///
/// `expected` entries replace the mapper's own assertions on the same
/// attribute.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct SaveExpression {
    /// Legacy expected-value conditions.
    #[builder(default)]
    pub expected: HashMap<String, ExpectedAttributeValue>,
    /// How `expected` entries combine.
    #[builder(default, setter(strip_option))]
    pub conditional_operator: Option<ConditionalOperator>,
    /// Condition expression.
    #[builder(default, setter(strip_option, into))]
    pub condition_expression: Option<String>,
    /// Expression attribute name placeholders.
    #[builder(default)]
    pub expression_attribute_names: HashMap<String, String>,
    /// Expression attribute value placeholders.
    #[builder(default)]
    pub expression_attribute_values: HashMap<String, AttributeValue>,
}

/// Conditions attached to a delete.
pub type DeleteExpression = SaveExpression;

/// Whether a generated field still waits for its first value: null or the
/// value a default record carries. Fields without a generator never consult
/// this, so a zero or empty key is written as given.
pub(crate) fn is_unset<T>(field: &FieldModel<T>, record: &T, defaults: &T) -> bool {
    let value = field.get(record);
    value.is_null() || value == field.get(defaults)
}

/// Whether a value is generated for `field` on this save.
pub(crate) fn can_generate<T>(
    field: &FieldModel<T>,
    record: &T,
    defaults: &T,
    behavior: SaveBehavior,
    any_key_generatable: bool,
) -> bool {
    match field.meta().generate_strategy() {
        GenerateStrategy::Never => false,
        GenerateStrategy::Always => true,
        GenerateStrategy::OnInsertOnly => {
            if !is_unset(field, record, defaults) {
                return false;
            }
            field.key_type().is_some()
                || field.meta().indexed()
                || matches!(behavior, SaveBehavior::Clobber | SaveBehavior::Update)
                || any_key_generatable
        }
    }
}

/// Whether any key of `record` is generated on this save.
pub(crate) fn any_key_generatable<T: Record>(
    model: &TableModel<T>,
    record: &T,
    defaults: &T,
    behavior: SaveBehavior,
) -> bool {
    model
        .keys()
        .any(|key| can_generate(key, record, defaults, behavior, false))
}

/// The next generated value of `field`.
pub(crate) fn next_value<T>(
    owner: &str,
    field: &FieldModel<T>,
    record: &T,
    defaults: &T,
) -> Result<Value, MappingError> {
    let Some(auto) = field.meta().auto_generate else {
        return Err(MappingError::new(owner, "no generator declared").with_property(field.name()));
    };
    let seed = if is_unset(field, record, defaults) {
        Value::Null
    } else {
        field.get(record)
    };
    auto.generate(&seed)
        .map_err(|e| MappingError::from_value_error(owner, field.name(), &e))
}

fn is_empty_key(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::S(s) => s.is_empty(),
        AttributeValue::B(b) => b.is_empty(),
        _ => false,
    }
}

fn is_set(value: &AttributeValue) -> bool {
    matches!(
        value,
        AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)
    )
}

/// Everything a save sends, plus the generated values to apply afterwards.
#[derive(Debug, Default)]
pub(crate) struct SavePlan {
    pub(crate) force_put: bool,
    pub(crate) key: Item,
    pub(crate) updates: HashMap<String, AttributeValueUpdate>,
    pub(crate) assertions: HashMap<String, ExpectedAttributeValue>,
    pub(crate) generated: Vec<(usize, Value)>,
}

impl SavePlan {
    pub(crate) fn build<T: Record>(
        model: &TableModel<T>,
        record: &T,
        behavior: SaveBehavior,
    ) -> Result<Self, MappingError> {
        let owner = model.owner();
        let defaults = T::default();
        let any_key = any_key_generatable(model, record, &defaults, behavior);
        let mut plan = Self {
            force_put: behavior == SaveBehavior::Clobber || any_key,
            ..Self::default()
        };

        for (pos, key) in model.fields().iter().enumerate() {
            if key.key_type().is_none() {
                continue;
            }
            let value = if can_generate(key, record, &defaults, behavior, any_key) {
                plan.generate(owner, pos, key, record, &defaults, behavior)?
            } else {
                key.convert(record)?
            };
            let value = value.filter(|v| !is_empty_key(v)).ok_or_else(|| {
                MappingError::new(owner, "null or empty value for primary key")
                    .with_property(key.name())
            })?;
            if plan.force_put {
                plan.updates
                    .insert(key.attribute_name().to_owned(), AttributeValueUpdate::put(value));
            } else {
                plan.key.insert(key.attribute_name().to_owned(), value);
            }
        }

        for (pos, field) in model.fields().iter().enumerate() {
            if field.key_type().is_some() {
                continue;
            }
            let value = if can_generate(field, record, &defaults, behavior, any_key) {
                plan.generate(owner, pos, field, record, &defaults, behavior)?
            } else {
                if field.versioned() {
                    plan.assert_version(owner, field, record, &defaults, behavior)?;
                }
                field.convert(record)?
            };
            let name = field.attribute_name().to_owned();
            match value {
                Some(v) if behavior == SaveBehavior::AppendSet && is_set(&v) => {
                    plan.updates.insert(name, AttributeValueUpdate::add(v));
                }
                Some(v) => {
                    plan.updates.insert(name, AttributeValueUpdate::put(v));
                }
                None if plan.force_put => {}
                None => {
                    if !matches!(
                        behavior,
                        SaveBehavior::UpdateSkipNullAttributes | SaveBehavior::AppendSet
                    ) {
                        plan.updates.insert(name, AttributeValueUpdate::delete());
                    }
                }
            }
        }
        Ok(plan)
    }

    fn assert_version<T>(
        &mut self,
        owner: &str,
        field: &FieldModel<T>,
        record: &T,
        defaults: &T,
        behavior: SaveBehavior,
    ) -> Result<(), MappingError> {
        if behavior == SaveBehavior::Clobber {
            return Ok(());
        }
        let expected = if is_unset(field, record, defaults) {
            ExpectedAttributeValue::absent()
        } else {
            let current = field.convert(record)?.ok_or_else(|| {
                MappingError::new(owner, "version has no wire value").with_property(field.name())
            })?;
            ExpectedAttributeValue::equals(current)
        };
        self.assertions
            .insert(field.attribute_name().to_owned(), expected);
        Ok(())
    }

    fn generate<T>(
        &mut self,
        owner: &str,
        pos: usize,
        field: &FieldModel<T>,
        record: &T,
        defaults: &T,
        behavior: SaveBehavior,
    ) -> Result<Option<AttributeValue>, MappingError> {
        if field.versioned() {
            self.assert_version(owner, field, record, defaults, behavior)?;
        } else if (field.key_type().is_some() || field.meta().indexed())
            && behavior != SaveBehavior::Clobber
            && field.meta().generate_strategy() != GenerateStrategy::Always
            && !self.assertions.contains_key(field.attribute_name())
        {
            self.assertions
                .insert(field.attribute_name().to_owned(), ExpectedAttributeValue::absent());
        }
        let next = next_value(owner, field, record, defaults)?;
        let converted = field.convert_value(next.clone())?;
        self.generated.push((pos, next));
        Ok(converted)
    }

    /// The whole item for a put.
    pub(crate) fn item(&self) -> Item {
        self.key
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(
                self.updates
                    .iter()
                    .filter_map(|(k, u)| u.value.clone().map(|v| (k.clone(), v))),
            )
            .collect()
    }

    pub(crate) fn put_input(
        &self,
        table_name: String,
        expected: HashMap<String, ExpectedAttributeValue>,
        expr: &SaveExpression,
    ) -> PutItemInput {
        PutItemInput {
            table_name,
            item: self.item(),
            conditional_operator: expr.conditional_operator.filter(|_| !expected.is_empty()),
            expected,
            condition_expression: expr.condition_expression.clone(),
            expression_attribute_names: expr.expression_attribute_names.clone(),
            expression_attribute_values: expr.expression_attribute_values.clone(),
            ..PutItemInput::default()
        }
    }

    pub(crate) fn update_input(
        &self,
        table_name: String,
        expected: HashMap<String, ExpectedAttributeValue>,
        expr: &SaveExpression,
    ) -> UpdateItemInput {
        UpdateItemInput {
            table_name,
            key: self.key.clone(),
            attribute_updates: self.updates.clone(),
            conditional_operator: expr.conditional_operator.filter(|_| !expected.is_empty()),
            expected,
            condition_expression: expr.condition_expression.clone(),
            expression_attribute_names: expr.expression_attribute_names.clone(),
            expression_attribute_values: expr.expression_attribute_values.clone(),
            return_values: Some(ReturnValue::AllNew),
            ..UpdateItemInput::default()
        }
    }

    /// Writes the generated values into the record.
    pub(crate) fn apply<T: Record>(
        self,
        model: &TableModel<T>,
        record: &mut T,
    ) -> Result<(), MappingError> {
        for (pos, value) in self.generated {
            model.fields()[pos].set(record, value)?;
        }
        Ok(())
    }
}

/// Combines the mapper's assertions with user conditions.
///
/// A user condition on an attribute replaces the mapper's. Remaining mapper
/// assertions are always AND-ed, so they cannot be mixed with user
/// conditions joined by OR.
pub(crate) fn merge_expected(
    internal: HashMap<String, ExpectedAttributeValue>,
    expr: &SaveExpression,
) -> MapperResult<HashMap<String, ExpectedAttributeValue>> {
    let mut merged = internal;
    for name in expr.expected.keys() {
        merged.remove(name);
    }
    if expr.conditional_operator == Some(ConditionalOperator::Or) && !merged.is_empty() {
        let mut names: Vec<&str> = merged.keys().map(String::as_str).collect();
        names.sort_unstable();
        return Err(MapperError::InvalidRequest(format!(
            "unable to assert the value of the fields [{}], since the expected value conditions \
             cannot be combined with user-specified conditions joined by OR; use \
             SaveBehavior::Clobber to skip the assertion on these fields",
            names.join(", ")
        )));
    }
    if expr.condition_expression.is_some() && !merged.is_empty() {
        let mut names: Vec<&str> = merged.keys().map(String::as_str).collect();
        names.sort_unstable();
        return Err(MapperError::InvalidRequest(format!(
            "condition expressions cannot be combined with the expected value assertions on [{}]; \
             use SaveBehavior::Clobber to skip them",
            names.join(", ")
        )));
    }
    merged.extend(expr.expected.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(merged)
}

/// The delete request for `record`, asserting its version unless clobbering.
pub(crate) fn delete_input<T: Record>(
    model: &TableModel<T>,
    record: &T,
    table_name: String,
    behavior: SaveBehavior,
    expr: &DeleteExpression,
) -> MapperResult<DeleteItemInput> {
    let key = model.convert_key(record)?;
    let mut internal = HashMap::new();
    if behavior != SaveBehavior::Clobber {
        let defaults = T::default();
        for field in model.versions() {
            let expected = if is_unset(field, record, &defaults) {
                ExpectedAttributeValue::absent()
            } else {
                match field.convert(record)? {
                    Some(current) => ExpectedAttributeValue::equals(current),
                    None => ExpectedAttributeValue::absent(),
                }
            };
            internal.insert(field.attribute_name().to_owned(), expected);
        }
    }
    if expr.condition_expression.is_some() && !internal.is_empty() {
        return Err(MapperError::InvalidRequest(
            "Condition Expressions cannot be used if a versioned attribute is present".to_owned(),
        ));
    }
    let expected = merge_expected(internal, expr)?;
    Ok(DeleteItemInput {
        table_name,
        key,
        conditional_operator: expr.conditional_operator.filter(|_| !expected.is_empty()),
        expected,
        condition_expression: expr.condition_expression.clone(),
        expression_attribute_names: expr.expression_attribute_names.clone(),
        expression_attribute_values: expr.expression_attribute_values.clone(),
        ..DeleteItemInput::default()
    })
}
