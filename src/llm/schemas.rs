//! JSON schemas for every structured LLM call site
//!
//! Schemas live here, keyed by call site, instead of inline at each call.
//! The gateway validates every model output against the schema its caller
//! passes in and performs exactly one repair attempt before giving up.
//!
//! Adapter query schemas are built with [`query_schema`] so each one carries
//! the `not_applicable`/`reason` pair that lets a model decline a source
//! explicitly instead of returning junk parameters.

use serde_json::{json, Value};

/// Decomposition of a research question into initial sub-questions
pub fn decomposition() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sub_questions": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 },
                "minItems": 1
            },
            "approach": { "type": "string" }
        },
        "required": ["sub_questions"],
        "additionalProperties": false
    })
}

/// Ordered subset of sources for one task, each with a reason
pub fn source_selection() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selected": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source_id": { "type": "string", "minLength": 1 },
                        "reason": { "type": "string" }
                    },
                    "required": ["source_id", "reason"],
                    "additionalProperties": false
                },
                "minItems": 1
            }
        },
        "required": ["selected"],
        "additionalProperties": false
    })
}

/// 0-10 relevance score over a sample of task results
pub fn relevance_validation() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": { "type": "integer", "minimum": 0, "maximum": 10 },
            "reasoning": { "type": "string" }
        },
        "required": ["score", "reasoning"],
        "additionalProperties": false
    })
}

/// Rephrased sub-question for a retry
pub fn reformulated_query() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "minLength": 1 },
            "rationale": { "type": "string" }
        },
        "required": ["query"],
        "additionalProperties": false
    })
}

/// Follow-up sub-questions generated from a successful task's evidence
pub fn follow_ups() -> Value {
    json!({
        "type": "object",
        "properties": {
            "follow_ups": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string", "minLength": 1 },
                        "rationale": { "type": "string" }
                    },
                    "required": ["question"],
                    "additionalProperties": false
                },
                "maxItems": 3
            }
        },
        "required": ["follow_ups"],
        "additionalProperties": false
    })
}

/// Named entities extracted from task results, with the item indices each
/// entity appears in (used for co-occurrence counting)
pub fn entity_extraction() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "item_indices": {
                            "type": "array",
                            "items": { "type": "integer", "minimum": 0 }
                        }
                    },
                    "required": ["name", "item_indices"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

/// 0-10 relevance score of a single monitor hit against the keyword set
pub fn monitor_relevance() -> Value {
    relevance_validation()
}

/// Final report synthesis
pub fn synthesis() -> Value {
    json!({
        "type": "object",
        "properties": {
            "executive_summary": { "type": "string", "minLength": 1 },
            "key_findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "finding": { "type": "string" },
                        "citations": {
                            "type": "array",
                            "items": { "type": "string" },
                            "minItems": 1
                        }
                    },
                    "required": ["finding", "citations"],
                    "additionalProperties": false
                }
            },
            "detailed_analysis": { "type": "string" },
            "entity_summary": { "type": "string" },
            "gaps": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["executive_summary", "key_findings", "detailed_analysis"],
        "additionalProperties": false
    })
}

/// Wrap source-specific query properties with the shared not-applicable pair.
///
/// Every adapter schema produced here accepts either
/// `{"not_applicable": true, "reason": "..."}` or the source's own
/// parameters with `not_applicable` false or absent. Properties come in as
/// name/schema pairs so a non-object input cannot be expressed.
pub fn query_schema(properties: Vec<(&str, Value)>, required: &[&str]) -> Value {
    let mut props: serde_json::Map<String, Value> = properties
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema))
        .collect();
    props.insert("not_applicable".to_string(), json!({ "type": "boolean" }));
    props.insert("reason".to_string(), json!({ "type": "string" }));

    json!({
        "type": "object",
        "properties": props,
        "required": [],
        "additionalProperties": false,
        // When the model does not decline, the source's own required
        // parameters must be present.
        "if": {
            "not": {
                "properties": { "not_applicable": { "const": true } },
                "required": ["not_applicable"]
            }
        },
        "then": { "required": required },
        "else": { "required": ["not_applicable", "reason"] }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid_schema(schema: &Value) {
        jsonschema::validator_for(schema).expect("schema must compile");
    }

    #[test]
    fn test_all_call_site_schemas_compile() {
        for schema in [
            decomposition(),
            source_selection(),
            relevance_validation(),
            reformulated_query(),
            follow_ups(),
            entity_extraction(),
            monitor_relevance(),
            synthesis(),
        ] {
            assert_valid_schema(&schema);
        }
    }

    #[test]
    fn test_query_schema_accepts_params_and_decline() {
        let schema = query_schema(
            vec![("keywords", json!({ "type": "string" }))],
            &["keywords"],
        );
        let validator = jsonschema::validator_for(&schema).unwrap();

        assert!(validator.is_valid(&json!({ "keywords": "budget cuts" })));
        assert!(validator.is_valid(&json!({
            "not_applicable": true,
            "reason": "source indexes job postings, not contracts"
        })));
        // Declining without a reason is invalid
        assert!(!validator.is_valid(&json!({ "not_applicable": true })));
        // Not declining without the required param is invalid
        assert!(!validator.is_valid(&json!({ "not_applicable": false })));
        // Unknown fields are rejected
        assert!(!validator.is_valid(&json!({ "keywords": "x", "extra": 1 })));
    }

    #[test]
    fn test_relevance_schema_bounds() {
        let validator = jsonschema::validator_for(&relevance_validation()).unwrap();
        assert!(validator.is_valid(&json!({ "score": 7, "reasoning": "on topic" })));
        assert!(!validator.is_valid(&json!({ "score": 11, "reasoning": "x" })));
        assert!(!validator.is_valid(&json!({ "score": 7 })));
    }
}
