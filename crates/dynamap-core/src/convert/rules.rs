//! Conversion rules and their per-schema ordering.

use std::any::TypeId;
use std::sync::Arc;

use dynamap_model::WireType;

use super::{CustomConverter, SchemaKind};
use crate::value::{TypeDescriptor, TypeKind};

/// One conversion rule. Scalar-list rules apply to every non-set type,
/// set-list rules to sets.
#[derive(Debug, Clone)]
pub(crate) enum Rule {
    Custom {
        type_id: TypeId,
        converter: Arc<dyn CustomConverter>,
    },
    CustomSet {
        element: TypeId,
        converter: Arc<dyn CustomConverter>,
    },
    Native,
    BoolAsNumber,
    NativeBool,
    StringScalar,
    NumberScalar,
    BinaryScalar,
    List,
    Map,
    Document,
    NativeBoolSet,
    StringSet,
    NumberSet,
    BinarySet,
    ObjectSet,
}

/// A rule with its schema-dependent enabled flag.
///
/// Disabled rules still take part in hinted resolution, which is how an
/// explicit wire type can select a representation the schema would not pick
/// on its own.
#[derive(Debug, Clone)]
pub(crate) struct RuleEntry {
    pub(crate) rule: Rule,
    pub(crate) enabled: bool,
}

impl RuleEntry {
    pub(crate) fn enabled(rule: Rule) -> Self {
        Self { rule, enabled: true }
    }

    fn new(rule: Rule, enabled: bool) -> Self {
        Self { rule, enabled }
    }
}

pub(crate) fn standard_scalar_rules(kind: SchemaKind) -> Vec<RuleEntry> {
    let v1 = kind == SchemaKind::V1;
    let v2 = kind == SchemaKind::V2;
    vec![
        RuleEntry::new(Rule::Native, !v1),
        RuleEntry::new(Rule::BoolAsNumber, !v2),
        RuleEntry::new(Rule::NativeBool, v2),
        RuleEntry::new(Rule::StringScalar, true),
        RuleEntry::new(Rule::NumberScalar, true),
        RuleEntry::new(Rule::BinaryScalar, true),
        RuleEntry::new(Rule::List, !v1),
        RuleEntry::new(Rule::Map, !v1),
        RuleEntry::new(Rule::Document, !v1),
    ]
}

pub(crate) fn standard_set_rules(kind: SchemaKind) -> Vec<RuleEntry> {
    let v2 = kind == SchemaKind::V2;
    vec![
        RuleEntry::new(Rule::NativeBoolSet, v2),
        RuleEntry::new(Rule::StringSet, true),
        RuleEntry::new(Rule::NumberSet, true),
        RuleEntry::new(Rule::BinarySet, true),
        RuleEntry::new(Rule::ObjectSet, v2),
    ]
}

fn set_element(desc: &TypeDescriptor) -> Option<&TypeDescriptor> {
    match &desc.kind {
        TypeKind::Set(Some(element)) => Some(element),
        _ => None,
    }
}

fn is_kind(desc: Option<&TypeDescriptor>, pred: impl Fn(&TypeKind) -> bool) -> bool {
    desc.is_some_and(|d| pred(&d.kind))
}

impl Rule {
    /// Wire type produced, `None` for raw attribute values.
    pub(crate) fn wire_type(&self) -> Option<WireType> {
        match self {
            Self::Custom { converter, .. } | Self::CustomSet { converter, .. } => {
                Some(converter.wire_type())
            }
            Self::Native => None,
            Self::BoolAsNumber | Self::NumberScalar => Some(WireType::N),
            Self::NativeBool => Some(WireType::Bool),
            Self::StringScalar => Some(WireType::S),
            Self::BinaryScalar => Some(WireType::B),
            Self::List | Self::NativeBoolSet | Self::ObjectSet => Some(WireType::L),
            Self::Map | Self::Document => Some(WireType::M),
            Self::StringSet => Some(WireType::Ss),
            Self::NumberSet => Some(WireType::Ns),
            Self::BinarySet => Some(WireType::Bs),
        }
    }

    /// Whether the rule is the natural representation of `desc`.
    pub(crate) fn supports(&self, desc: &TypeDescriptor) -> bool {
        let element = set_element(desc);
        match self {
            Self::Custom { type_id, .. } => desc.type_id == *type_id,
            Self::CustomSet { element: id, .. } => element.is_some_and(|e| e.type_id == *id),
            Self::Native => desc.kind == TypeKind::Native,
            Self::BoolAsNumber | Self::NativeBool => desc.kind == TypeKind::Bool,
            Self::StringScalar => desc.kind == TypeKind::String,
            Self::NumberScalar => desc.kind == TypeKind::Number,
            Self::BinaryScalar => desc.kind == TypeKind::Binary,
            Self::List => matches!(desc.kind, TypeKind::List(Some(_))),
            Self::Map => matches!(
                &desc.kind,
                TypeKind::Map { key: Some(key), value: Some(_) } if key.kind == TypeKind::String
            ),
            Self::Document => matches!(desc.kind, TypeKind::Document(_)),
            Self::NativeBoolSet => is_kind(element, |k| *k == TypeKind::Bool),
            Self::StringSet => is_kind(element, |k| *k == TypeKind::String),
            Self::NumberSet => is_kind(element, |k| matches!(k, TypeKind::Number | TypeKind::Bool)),
            Self::BinarySet => is_kind(element, |k| *k == TypeKind::Binary),
            Self::ObjectSet => element.is_some(),
        }
    }

    /// Whether the rule can store `desc` as the explicitly requested `hint`.
    ///
    /// Scalar rules accept any text-representable scalar so a number can be
    /// stored as `S` and a string holding digits as `N`.
    pub(crate) fn accepts_hint(&self, desc: &TypeDescriptor, hint: WireType) -> bool {
        if self.wire_type() != Some(hint) {
            return false;
        }
        let textual = |k: &TypeKind| matches!(k, TypeKind::Bool | TypeKind::Number | TypeKind::String);
        let element = set_element(desc);
        match self {
            Self::StringScalar | Self::NumberScalar => textual(&desc.kind),
            Self::StringSet | Self::NumberSet => is_kind(element, textual),
            _ => self.supports(desc),
        }
    }
}
