//! Request validation from per-attribute rules.

use crate::config::{ModelDescriptor, ValidationRule};
use crate::error::{AppError, ValidationReason};
use crate::record::Record;
use regex::Regex;
use serde_json::Value;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full record. Required attributes must be present and non-null.
    pub fn validate(model: &ModelDescriptor, body: &Record) -> Result<(), AppError> {
        for attr in &model.attributes {
            let Some(rule) = &attr.validation else { continue };
            let val = body.get(&attr.name);
            if rule.required == Some(true) && val.map(Value::is_null).unwrap_or(true) {
                return Err(field_error(model, format!("{} is required", attr.name)));
            }
            if let Some(v) = val {
                validate_field(model, &attr.name, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required is not enforced for missing fields.
    pub fn validate_partial(model: &ModelDescriptor, body: &Record) -> Result<(), AppError> {
        for (col, v) in body {
            if let Some(rule) = model.attribute(col).and_then(|a| a.validation.as_ref()) {
                if rule.required == Some(true) && v.is_null() {
                    return Err(field_error(model, format!("{} is required", col)));
                }
                validate_field(model, col, v, rule)?;
            }
        }
        Ok(())
    }
}

fn field_error(model: &ModelDescriptor, message: String) -> AppError {
    AppError::validation(&model.name, ValidationReason::Field(message))
}

fn validate_field(model: &ModelDescriptor, col: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(model, col, v, format)?;
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        if s.chars().count() > max as usize {
            return Err(field_error(model, format!("{} must be at most {} characters", col, max)));
        }
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        if s.chars().count() < min as usize {
            return Err(field_error(model, format!("{} must be at least {} characters", col, min)));
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| field_error(model, format!("invalid pattern for {}", col)))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(field_error(model, format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(field_error(
                model,
                format!("{} must be one of: {:?}", col, allowed.iter().take(5).collect::<Vec<_>>()),
            ));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            return Err(field_error(model, format!("{} must be at least {}", col, min)));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            return Err(field_error(model, format!("{} must be at most {}", col, max)));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(model: &ModelDescriptor, col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    let ok = match format.to_lowercase().as_str() {
        "email" => s.len() >= 3 && s.contains('@'),
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(field_error(model, format!("{} must be a valid {}", col, format)))
    }
}
