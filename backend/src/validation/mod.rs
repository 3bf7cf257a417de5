//! JSON Schema validation of emitted documents.
//!
//! Two schemas are embedded at compile time from `schemas/`:
//! - `analysis-context.json`: the aggregate `{"sources": [...]}` file
//! - `source-details.json`: one `<request>_<id>_details` file
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use sourcecat::validation::{validate_context, is_valid_details};
//!
//! let context = json!({"sources": [{"source_id": 1, "ra": 150.0, "id": 0}]});
//! assert!(validate_context(&context).is_ok());
//! assert!(is_valid_details(&json!({"source_id": 1, "ra": 150.0})));
//! ```

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;

static CONTEXT_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    compile(include_str!("../../schemas/analysis-context.json"))
});

static DETAILS_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    compile(include_str!("../../schemas/source-details.json"))
});

fn compile(source: &str) -> Validator {
    let schema: Value = serde_json::from_str(source).expect("Invalid embedded schema");
    jsonschema::draft7::new(&schema).expect("Invalid embedded schema")
}

fn collect_errors(validator: &Validator, data: &Value) -> Result<(), Vec<String>> {
    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate an aggregate context document, including that ids run
/// `0, 1, 2, ...` in order.
pub fn validate_context(data: &Value) -> Result<(), Vec<String>> {
    collect_errors(&CONTEXT_VALIDATOR, data)?;

    let out_of_order: Vec<String> = data["sources"]
        .as_array()
        .into_iter()
        .flatten()
        .enumerate()
        .filter(|(i, source)| source["id"].as_u64() != Some(*i as u64))
        .map(|(i, source)| format!("sources[{}] has id {}, expected {}", i, source["id"], i))
        .collect();

    if out_of_order.is_empty() {
        Ok(())
    } else {
        Err(out_of_order)
    }
}

pub fn is_valid_context(data: &Value) -> bool {
    validate_context(data).is_ok()
}

/// Validate one detail document.
pub fn validate_details(data: &Value) -> Result<(), Vec<String>> {
    collect_errors(&DETAILS_VALIDATOR, data)
}

pub fn is_valid_details(data: &Value) -> bool {
    DETAILS_VALIDATOR.is_valid(data)
}
