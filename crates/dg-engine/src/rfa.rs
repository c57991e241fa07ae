use serde_json::{json, Map, Value};

use dg_core::{
    validate_namespace, validate_object, validate_predicate, validate_subject,
    validate_timestamp, DgError,
};

const REQUIRED_FIELDS: [&str; 3] = ["namespace", "requester_namespace", "requester_id"];

/// Canonicalize an RFA: keys sorted (the map representation is ordered),
/// string values trimmed, nulls dropped.
pub fn canonicalize_rfa(rfa: &Value) -> Result<Map<String, Value>, DgError> {
    let Some(object) = rfa.as_object() else {
        return Err(DgError::schema_invalid("RFA must be a JSON object"));
    };
    let mut canonical = Map::new();
    for (key, value) in object {
        match value {
            Value::Null => {}
            Value::String(s) => {
                canonical.insert(key.clone(), Value::String(s.trim().to_string()));
            }
            other => {
                canonical.insert(key.clone(), other.clone());
            }
        }
    }
    Ok(canonical)
}

/// Schema check: the three required fields are present and are strings.
pub fn validate_rfa_schema(rfa: &Map<String, Value>) -> Result<(), DgError> {
    let missing: Vec<&str> =
        REQUIRED_FIELDS.iter().copied().filter(|f| !rfa.contains_key(*f)).collect();
    if !missing.is_empty() {
        return Err(DgError::schema_invalid(format!(
            "RFA is missing required fields: {}",
            missing.join(", ")
        ))
        .with_details(json!({
            "missing_fields": missing,
            "required_fields": REQUIRED_FIELDS,
            "provided_fields": rfa.keys().collect::<Vec<_>>(),
        })));
    }
    for field in REQUIRED_FIELDS {
        if !rfa[field].is_string() {
            return Err(DgError::schema_invalid(format!("RFA field '{field}' must be a string"))
                .with_details(json!({"field": field})));
        }
    }
    Ok(())
}

/// Field-format checks on the canonicalized RFA.
pub fn validate_rfa_fields(rfa: &Map<String, Value>) -> Result<(), DgError> {
    validate_namespace(str_field(rfa, "namespace"))?;
    validate_namespace(str_field(rfa, "requester_namespace"))?;
    if let Some(subject) = opt_str_field(rfa, "subject")? {
        validate_subject(subject)?;
    }
    if let Some(predicate) = opt_str_field(rfa, "predicate")? {
        validate_predicate(predicate)?;
    }
    if let Some(object) = opt_str_field(rfa, "object")? {
        validate_object(object)?;
    }
    if let Some(ts) = opt_str_field(rfa, "at_valid_time")? {
        validate_timestamp(ts)?;
    }
    if let Some(ts) = opt_str_field(rfa, "as_of_system_time")? {
        validate_timestamp(ts)?;
    }
    Ok(())
}

fn str_field<'a>(rfa: &'a Map<String, Value>, field: &str) -> &'a str {
    rfa[field].as_str().expect("schema validation guarantees a string")
}

pub(crate) fn opt_str_field<'a>(
    rfa: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, DgError> {
    match rfa.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DgError::schema_invalid(format!("RFA field '{field}' must be a string"))
            .with_details(json!({"field": field}))),
    }
}
