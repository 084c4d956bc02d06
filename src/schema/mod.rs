//! Stratification schema and participant validation.
//!
//! Epistemic foundation:
//! - K_i: The schema is fixed at construction and never mutated
//! - K_i: Every variable has at least two distinct categories
//! - B_i: Incoming characteristics match the schema → Result

use crate::models::{Characteristics, SchemaError, ValidationError, VariableSpec};
use std::collections::{HashMap, HashSet};

/// Variable name reserved for the arm column of exported ledgers.
pub const RESERVED_VARIABLE: &str = "arm";

/// A stratification variable and its allowed categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    categories: Vec<String>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allowed categories in declaration order.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Position of `category` in this variable's category list.
    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }
}

/// Category indices for one participant, one per schema variable in
/// declaration order.
///
/// K_i: Only [`Schema::validate`] constructs a profile, so every index is
/// in range for its variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(Vec<usize>);

impl Profile {
    /// `(variable index, category index)` pairs.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().copied().enumerate()
    }
}

/// Immutable set of stratification variables.
#[derive(Debug, Clone)]
pub struct Schema {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema from `(variable, categories)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for an empty schema, an empty or reserved
    /// variable name, a repeated variable, fewer than two categories, or a
    /// repeated category label.
    pub fn new<I, N, C, S>(variables: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self {
            variables: Vec::new(),
            index: HashMap::new(),
        };

        for (name, categories) in variables {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(SchemaError::EmptyVariableName);
            }
            if name == RESERVED_VARIABLE {
                return Err(SchemaError::ReservedName(name));
            }
            if schema.index.contains_key(&name) {
                return Err(SchemaError::DuplicateVariable(name));
            }

            let categories: Vec<String> = categories.into_iter().map(Into::into).collect();
            if categories.len() < 2 {
                return Err(SchemaError::TooFewCategories {
                    variable: name,
                    count: categories.len(),
                });
            }
            let mut seen = HashSet::with_capacity(categories.len());
            for category in &categories {
                if !seen.insert(category.as_str()) {
                    return Err(SchemaError::DuplicateCategory {
                        variable: name,
                        category: category.clone(),
                    });
                }
            }

            schema.index.insert(name.clone(), schema.variables.len());
            schema.variables.push(Variable { name, categories });
        }

        if schema.variables.is_empty() {
            return Err(SchemaError::NoVariables);
        }
        Ok(schema)
    }

    /// Build a schema from configured variable specs.
    pub fn from_specs(specs: &[VariableSpec]) -> Result<Self, SchemaError> {
        Self::new(
            specs
                .iter()
                .map(|spec| (spec.name.clone(), spec.categories.clone())),
        )
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.variables[i])
    }

    /// Number of variables (always at least one).
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Check `characteristics` against the schema and resolve category
    /// indices.
    ///
    /// Missing variables are reported in declaration order before unknown
    /// ones. No side effects.
    pub fn validate(&self, characteristics: &Characteristics) -> Result<Profile, ValidationError> {
        let mut indices = Vec::with_capacity(self.variables.len());

        for var in &self.variables {
            let category = characteristics
                .get(&var.name)
                .ok_or_else(|| ValidationError::MissingVariable(var.name.clone()))?;
            let idx = var
                .category_index(category)
                .ok_or_else(|| ValidationError::InvalidCategory {
                    variable: var.name.clone(),
                    category: category.clone(),
                    allowed: var.categories.clone(),
                })?;
            indices.push(idx);
        }

        // Every declared variable was found, so a length mismatch means extras.
        if characteristics.len() != self.variables.len() {
            if let Some(unknown) = characteristics
                .keys()
                .find(|k| !self.index.contains_key(k.as_str()))
            {
                return Err(ValidationError::UnknownVariable(unknown.clone()));
            }
        }

        Ok(Profile(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(pairs: &[(&str, &str)]) -> Characteristics {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn schema() -> Schema {
        Schema::new([
            ("sex", vec!["male", "female"]),
            ("ethnicity", vec!["white", "black", "asian"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_bundled_config_builds_schema() {
        let config = crate::models::Config::from_toml(include_str!("../../minimiser.toml")).unwrap();
        config.validate().unwrap();
        let schema = Schema::from_specs(&config.variables).unwrap();
        assert_eq!(schema.len(), 4);
        assert_eq!(schema.variable("ethnicity").unwrap().categories().len(), 3);
    }

    #[test]
    fn test_preserves_declaration_order() {
        let schema = schema();
        let names: Vec<_> = schema.variables().iter().map(Variable::name).collect();
        assert_eq!(names, vec!["sex", "ethnicity"]);
        assert_eq!(schema.variable("ethnicity").unwrap().category_index("asian"), Some(2));
    }

    #[test]
    fn test_rejects_single_category() {
        let err = Schema::new([("sex", vec!["male"])]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::TooFewCategories {
                variable: "sex".into(),
                count: 1
            }
        );
    }

    #[test]
    fn test_rejects_duplicate_category() {
        let err = Schema::new([("sex", vec!["male", "male"])]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateCategory { .. }));
    }

    #[test]
    fn test_rejects_duplicate_variable() {
        let err = Schema::new([("sex", vec!["m", "f"]), ("sex", vec!["x", "y"])]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateVariable("sex".into()));
    }

    #[test]
    fn test_rejects_reserved_and_empty() {
        assert_eq!(
            Schema::new([("arm", vec!["a", "b"])]).unwrap_err(),
            SchemaError::ReservedName("arm".into())
        );
        assert_eq!(
            Schema::new(Vec::<(String, Vec<String>)>::new()).unwrap_err(),
            SchemaError::NoVariables
        );
        assert_eq!(
            Schema::new([(" ", vec!["a", "b"])]).unwrap_err(),
            SchemaError::EmptyVariableName
        );
    }

    #[test]
    fn test_validate_resolves_indices() {
        let profile = schema()
            .validate(&chars(&[("sex", "female"), ("ethnicity", "black")]))
            .unwrap();
        assert_eq!(profile.cells().collect::<Vec<_>>(), vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn test_validate_missing_variable() {
        let err = schema().validate(&chars(&[("sex", "male")])).unwrap_err();
        assert_eq!(err, ValidationError::MissingVariable("ethnicity".into()));
    }

    #[test]
    fn test_validate_unknown_variable() {
        let err = schema()
            .validate(&chars(&[
                ("sex", "male"),
                ("ethnicity", "white"),
                ("smoker", "yes"),
            ]))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownVariable("smoker".into()));
    }

    #[test]
    fn test_validate_invalid_category() {
        let err = schema()
            .validate(&chars(&[("sex", "unknown"), ("ethnicity", "white")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidCategory { ref variable, .. } if variable == "sex"
        ));
    }
}
