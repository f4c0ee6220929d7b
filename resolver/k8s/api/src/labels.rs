use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

/// A validated label selector.
///
/// An entirely empty selector matches every label set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSelector {
    #[error("unknown operator {operator:?} for label {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator:?} for label {key:?} requires values")]
    MissingValues { key: String, operator: String },

    #[error("operator {operator:?} for label {key:?} does not accept values")]
    UnexpectedValues { key: String, operator: String },
}

// === impl Selector ===

impl Selector {
    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn matches(&self, labels: &Map) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }

    /// Equality requirements, in key order.
    pub fn match_labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.match_labels
            .iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set-based requirements, in declaration order.
    pub fn match_expressions(&self) -> &[Expression] {
        self.match_expressions.as_deref().unwrap_or(&[])
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = InvalidSelector;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let match_expressions = selector
            .match_expressions
            .as_ref()
            .map(|exprs| {
                exprs
                    .iter()
                    .map(|req| {
                        let values: BTreeSet<String> =
                            req.values.iter().flatten().cloned().collect();
                        let operator = match req.operator.as_str() {
                            "In" => Operator::In,
                            "NotIn" => Operator::NotIn,
                            "Exists" => Operator::Exists,
                            "DoesNotExist" => Operator::DoesNotExist,
                            _ => {
                                return Err(InvalidSelector::UnknownOperator {
                                    key: req.key.clone(),
                                    operator: req.operator.clone(),
                                })
                            }
                        };
                        match operator {
                            Operator::In | Operator::NotIn if values.is_empty() => {
                                return Err(InvalidSelector::MissingValues {
                                    key: req.key.clone(),
                                    operator: req.operator.clone(),
                                })
                            }
                            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                                return Err(InvalidSelector::UnexpectedValues {
                                    key: req.key.clone(),
                                    operator: req.operator.clone(),
                                })
                            }
                            _ => {}
                        }
                        Ok(Expression {
                            key: req.key.clone(),
                            operator,
                            values,
                        })
                    })
                    .collect::<Result<Expressions, _>>()
            })
            .transpose()?;

        Ok(Self {
            match_labels: selector.match_labels.clone(),
            match_expressions,
        })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === impl Expression ===

impl Expression {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Values in sorted order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => match labels.get(&self.key) {
                Some(v) => self.values.contains(v),
                None => false,
            },
            Operator::NotIn => match labels.get(&self.key) {
                Some(v) => !self.values.contains(v),
                None => true,
            },
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use maplit::btreemap;
    use std::iter::FromIterator;

    #[test]
    fn matches() {
        let no_values: Vec<&str> = vec![];
        for (selector, labels, expected, msg) in &[
            (Selector::default(), Map::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("app", "api"))),
                btreemap! { "app".to_string() => "api".to_string() },
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("app", "api"))),
                btreemap! {
                    "app".to_string() => "api".to_string(),
                    "tier".to_string() => "backend".to_string(),
                },
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("app", "api"))),
                btreemap! { "app".to_string() => "worker".to_string() },
                false,
                "value mismatch",
            ),
            (
                Selector::from_iter(Some(Expression::new("app", Operator::In, vec!["api"]))),
                btreemap! { "app".to_string() => "api".to_string() },
                true,
                "expression in",
            ),
            (
                Selector::from_iter(Some(Expression::new("app", Operator::NotIn, vec!["api"]))),
                btreemap! { "app".to_string() => "api".to_string() },
                false,
                "expression not-in excludes",
            ),
            (
                Selector::from_iter(Some(Expression::new("app", Operator::NotIn, vec!["api"]))),
                Map::default(),
                true,
                "expression not-in matches absent key",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "app",
                    Operator::Exists,
                    no_values.clone(),
                ))),
                btreemap! { "app".to_string() => "anything".to_string() },
                true,
                "expression exists",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "app",
                    Operator::DoesNotExist,
                    no_values.clone(),
                ))),
                btreemap! { "app".to_string() => "anything".to_string() },
                false,
                "expression does-not-exist excludes",
            ),
        ] {
            assert_eq!(selector.matches(labels), *expected, "{}", msg);
        }
    }

    #[test]
    fn rejects_malformed_requirements() {
        let cases = vec![
            (
                LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "Foo".to_string(),
                    values: None,
                },
                InvalidSelector::UnknownOperator {
                    key: "app".to_string(),
                    operator: "Foo".to_string(),
                },
            ),
            (
                LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "In".to_string(),
                    values: None,
                },
                InvalidSelector::MissingValues {
                    key: "app".to_string(),
                    operator: "In".to_string(),
                },
            ),
            (
                LabelSelectorRequirement {
                    key: "app".to_string(),
                    operator: "Exists".to_string(),
                    values: Some(vec!["api".to_string()]),
                },
                InvalidSelector::UnexpectedValues {
                    key: "app".to_string(),
                    operator: "Exists".to_string(),
                },
            ),
        ];
        for (req, expected) in cases {
            let selector = LabelSelector {
                match_expressions: Some(vec![req]),
                match_labels: None,
            };
            assert_eq!(Selector::try_from(&selector).unwrap_err(), expected);
        }
    }
}
