use crate::error::RegistryError;
use core_types::{AggregationFunction, CalculationDefinition, Column, FieldKind, Operand};
use std::collections::BTreeMap;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;

/// Checks a definition's structure against the schema allow-list and the set of
/// calculations already known. Cycle detection is done separately on the whole graph.
pub fn validate_definition(
    definition: &CalculationDefinition,
    known: &BTreeMap<String, CalculationDefinition>,
) -> Result<(), RegistryError> {
    let name = definition.name.as_str();
    validate_name(name)?;

    if let Some(description) = &definition.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(RegistryError::validation(
                name,
                format!("description exceeds {MAX_DESCRIPTION_LEN} characters"),
            ));
        }
    }

    let source = resolve_column(definition, &definition.source_field)?;
    let function = definition.aggregation_function;
    if function.requires_numeric() && !source.kind.is_numeric() {
        return Err(RegistryError::validation(
            name,
            format!("{function} requires a numeric source field, '{}' is text", source.name),
        ));
    }

    match (function.requires_weight(), &definition.weight_field) {
        (true, None) => {
            return Err(RegistryError::validation(name, "WEIGHTED_AVG requires a weight_field"));
        }
        (false, Some(_)) => {
            return Err(RegistryError::validation(
                name,
                format!("weight_field is only allowed for WEIGHTED_AVG, not {function}"),
            ));
        }
        (true, Some(weight)) => {
            let weight = resolve_column(definition, weight)?;
            if !weight.kind.is_numeric() {
                return Err(RegistryError::validation(
                    name,
                    format!("weight field '{}' must be numeric", weight.name),
                ));
            }
        }
        (false, None) => {}
    }

    let dependencies = definition.dependency_set();
    if dependencies.contains(name) {
        return Err(RegistryError::Cycle(vec![name.to_string(), name.to_string()]));
    }
    let unknown: Vec<&str> = dependencies
        .iter()
        .copied()
        .filter(|dependency| !known.contains_key(*dependency))
        .collect();
    if !unknown.is_empty() {
        return Err(RegistryError::validation(
            name,
            format!("unknown dependencies: {}", unknown.join(", ")),
        ));
    }

    if let Some(derived) = &definition.derived {
        for referenced in derived.referenced_calculations() {
            if !dependencies.contains(referenced) {
                return Err(RegistryError::validation(
                    name,
                    format!("derived formula references '{referenced}' which is not a declared dependency"),
                ));
            }
        }
        for operand in [&derived.left, &derived.right] {
            let numeric = match operand {
                Operand::Value => produces_number(function, source.kind),
                Operand::Calculation(referenced) => {
                    known.get(referenced).is_some_and(output_is_numeric)
                }
            };
            if !numeric {
                let operand = match operand {
                    Operand::Value => format!("{function}({})", source.name),
                    Operand::Calculation(referenced) => format!("'{referenced}'"),
                };
                return Err(RegistryError::validation(
                    name,
                    format!("derived formula operand {operand} is not numeric"),
                ));
            }
        }
    }

    Ok(())
}

/// COUNT is a number whatever it counts; MIN and MAX keep the kind of their field.
fn produces_number(function: AggregationFunction, source: FieldKind) -> bool {
    function == AggregationFunction::Count || source.is_numeric()
}

fn output_is_numeric(definition: &CalculationDefinition) -> bool {
    definition
        .source_model
        .column(&definition.source_field)
        .is_ok_and(|column| produces_number(definition.aggregation_function, column.kind))
}

fn resolve_column(definition: &CalculationDefinition, reference: &str) -> Result<Column, RegistryError> {
    definition
        .source_model
        .column(reference)
        .map_err(|e| RegistryError::validation(&definition.name, e.to_string()))
}

/// Names become quoted column aliases, so they are restricted to a conservative charset.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(RegistryError::validation(
            name,
            format!("name must be 1 to {MAX_NAME_LEN} characters"),
        ));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
    if !first_ok || !rest_ok {
        return Err(RegistryError::validation(
            name,
            "name may only contain letters, digits, '_', '-' and spaces, and must start with a letter or '_'",
        ));
    }
    Ok(())
}
