//! Structural validation of parsed flux documents.
//!
//! Works on the raw JSON value rather than the typed AST so that every
//! problem in a file can be reported at once with a precise path. A
//! document that passes validation is guaranteed to deserialise into
//! [`FluxDef`](crate::types::FluxDef).

use serde_json::Value;

use crate::errors::Violation;
use crate::types::HttpMethod;

/// Validate a parsed JSON document against the flux schema.
///
/// Returns `Ok(())` or every violation found, each carrying a dotted path
/// into the document. Unknown keys at the root or on a recognised node are
/// tolerated; unknown node types are not.
pub fn validate_flux(doc: &Value) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    let Some(root) = doc.as_object() else {
        return Err(vec![Violation::new("$", "flux definition must be an object")]);
    };

    match root.get("endpoint") {
        None => violations.push(Violation::new("endpoint", "missing required field")),
        Some(Value::String(s)) if !s.starts_with('/') => {
            violations.push(Violation::new(
                "endpoint",
                format!("must start with '/': {s}"),
            ));
        }
        Some(Value::String(_)) => {}
        Some(_) => violations.push(Violation::new("endpoint", "must be a string")),
    }

    match root.get("method") {
        None => violations.push(Violation::new("method", "missing required field")),
        Some(Value::String(s)) => {
            if !HttpMethod::ALL.iter().any(|m| m.as_str() == s) {
                violations.push(Violation::new(
                    "method",
                    format!("'{s}' is not one of GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD"),
                ));
            }
        }
        Some(_) => violations.push(Violation::new("method", "must be a string")),
    }

    match root.get("description") {
        None | Some(Value::String(_)) => {}
        Some(_) => violations.push(Violation::new("description", "must be a string")),
    }

    match root.get("flow") {
        None => violations.push(Violation::new("flow", "missing required field")),
        Some(Value::Array(nodes)) => validate_nodes("flow", nodes, &mut violations),
        Some(_) => violations.push(Violation::new("flow", "must be an array of flow nodes")),
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn validate_nodes(path: &str, nodes: &[Value], violations: &mut Vec<Violation>) {
    for (i, node) in nodes.iter().enumerate() {
        validate_node(&format!("{path}[{i}]"), node, violations);
    }
}

fn validate_node(path: &str, node: &Value, violations: &mut Vec<Violation>) {
    let Some(obj) = node.as_object() else {
        violations.push(Violation::new(path, "flow node must be an object"));
        return;
    };

    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        violations.push(Violation::new(
            format!("{path}.type"),
            "missing or non-string node type",
        ));
        return;
    };

    match kind {
        "action" => {
            require_string(path, obj, "name", violations);
            require_string(path, obj, "path", violations);
            if let Some(args) = obj.get("args") {
                if !args.is_object() {
                    violations.push(Violation::new(format!("{path}.args"), "must be an object"));
                }
            }
        }
        "condition" => {
            require_string(path, obj, "if", violations);
            require_nodes(path, obj, "then", violations);
            if obj.contains_key("else") {
                require_nodes(path, obj, "else", violations);
            }
        }
        "forEach" => {
            require_string(path, obj, "items", violations);
            require_string(path, obj, "as", violations);
            require_nodes(path, obj, "do", violations);
        }
        "parallel" => match obj.get("branches") {
            None => violations.push(Violation::new(
                format!("{path}.branches"),
                "missing required field",
            )),
            Some(Value::Array(branches)) => {
                for (i, branch) in branches.iter().enumerate() {
                    let branch_path = format!("{path}.branches[{i}]");
                    match branch {
                        Value::Array(nodes) => validate_nodes(&branch_path, nodes, violations),
                        _ => violations.push(Violation::new(
                            branch_path,
                            "each branch must be an array of flow nodes",
                        )),
                    }
                }
            }
            Some(_) => violations.push(Violation::new(
                format!("{path}.branches"),
                "must be an array of branches",
            )),
        },
        "try" => {
            require_nodes(path, obj, "try", violations);
            require_nodes(path, obj, "catch", violations);
            if let Some(v) = obj.get("errorVar") {
                if !v.is_string() {
                    violations.push(Violation::new(
                        format!("{path}.errorVar"),
                        "must be a string",
                    ));
                }
            }
        }
        "return" => {
            if !obj.contains_key("body") {
                violations.push(Violation::new(
                    format!("{path}.body"),
                    "missing required field",
                ));
            }
            if let Some(status) = obj.get("status") {
                match status.as_u64() {
                    Some(code) if (100..=599).contains(&code) => {}
                    _ => violations.push(Violation::new(
                        format!("{path}.status"),
                        "must be an HTTP status code",
                    )),
                }
            }
        }
        other => violations.push(Violation::new(
            format!("{path}.type"),
            format!("unknown node type '{other}'"),
        )),
    }
}

fn require_string(
    path: &str,
    obj: &serde_json::Map<String, Value>,
    field: &str,
    violations: &mut Vec<Violation>,
) {
    match obj.get(field) {
        Some(Value::String(_)) => {}
        Some(_) => violations.push(Violation::new(
            format!("{path}.{field}"),
            "must be a string",
        )),
        None => violations.push(Violation::new(
            format!("{path}.{field}"),
            "missing required field",
        )),
    }
}

fn require_nodes(
    path: &str,
    obj: &serde_json::Map<String, Value>,
    field: &str,
    violations: &mut Vec<Violation>,
) {
    match obj.get(field) {
        Some(Value::Array(nodes)) => {
            validate_nodes(&format!("{path}.{field}"), nodes, violations)
        }
        Some(_) => violations.push(Violation::new(
            format!("{path}.{field}"),
            "must be an array of flow nodes",
        )),
        None => violations.push(Violation::new(
            format!("{path}.{field}"),
            "missing required field",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A definition exercising all six node kinds; must always validate.
    pub(crate) fn known_good_flux() -> Value {
        json!({
            "endpoint": "/orders/:id",
            "method": "POST",
            "description": "exercise every node kind",
            "flow": [
                {"type": "action", "name": "order", "path": "orders/fetch",
                 "args": {"id": "${input.id}"}},
                {"type": "condition", "if": "${order.total} > 100",
                 "then": [{"type": "action", "name": "flag", "path": "orders/flag"}],
                 "else": []},
                {"type": "forEach", "items": "${order.items}", "as": "item",
                 "do": [{"type": "action", "name": "line", "path": "orders/line"}]},
                {"type": "parallel", "branches": [
                    [{"type": "action", "name": "a", "path": "audit/log"}],
                    [{"type": "action", "name": "b", "path": "notify/send"}]
                ]},
                {"type": "try",
                 "try": [{"type": "action", "name": "risky", "path": "orders/charge"}],
                 "catch": [{"type": "return", "status": 502, "body": "charge failed"}],
                 "errorVar": "err"},
                {"type": "return", "body": "${order}"}
            ]
        })
    }

    #[test]
    fn known_good_validates() {
        assert!(validate_flux(&known_good_flux()).is_ok());
    }

    #[test]
    fn non_object_root() {
        let errs = validate_flux(&json!([1, 2])).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "$");
    }

    #[test]
    fn missing_top_level_fields_all_reported() {
        let errs = validate_flux(&json!({})).unwrap_err();
        let paths: Vec<&str> = errs.iter().map(|v| v.path.as_str()).collect();
        assert!(paths.contains(&"endpoint"));
        assert!(paths.contains(&"method"));
        assert!(paths.contains(&"flow"));
    }

    #[test]
    fn bad_method_rejected() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "FETCH", "flow": []
        }))
        .unwrap_err();
        assert!(errs.iter().any(|v| v.path == "method"));
    }

    #[test]
    fn action_missing_path_reported_with_node_path() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{"type": "action", "name": "x"}]
        }))
        .unwrap_err();
        assert!(errs.iter().any(|v| v.path == "flow[0].path"));
    }

    #[test]
    fn nested_violations_carry_full_path() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{
                "type": "condition", "if": "${a}",
                "then": [{"type": "forEach", "items": "${xs}", "as": "x",
                          "do": [{"type": "action", "name": "n"}]}]
            }]
        }))
        .unwrap_err();
        assert!(errs
            .iter()
            .any(|v| v.path == "flow[0].then[0].do[0].path"));
    }

    #[test]
    fn parallel_branch_must_be_array() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{"type": "parallel", "branches": [{"type": "return", "body": 1}]}]
        }))
        .unwrap_err();
        assert!(errs.iter().any(|v| v.path == "flow[0].branches[0]"));
    }

    #[test]
    fn unknown_node_type_reported() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{"type": "teleport"}]
        }))
        .unwrap_err();
        assert!(errs
            .iter()
            .any(|v| v.path == "flow[0].type" && v.message.contains("teleport")));
    }

    #[test]
    fn return_requires_body() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{"type": "return", "status": 204}]
        }))
        .unwrap_err();
        assert!(errs.iter().any(|v| v.path == "flow[0].body"));
    }

    #[test]
    fn return_status_range_checked() {
        let errs = validate_flux(&json!({
            "endpoint": "/x", "method": "GET",
            "flow": [{"type": "return", "status": 9000, "body": null}]
        }))
        .unwrap_err();
        assert!(errs.iter().any(|v| v.path == "flow[0].status"));
    }

    #[test]
    fn extra_root_keys_tolerated() {
        assert!(validate_flux(&json!({
            "endpoint": "/x", "method": "GET", "flow": [],
            "owner": "team-checkout"
        }))
        .is_ok());
    }

    #[test]
    fn all_errors_collected_not_fail_fast() {
        let errs = validate_flux(&json!({
            "endpoint": "no-slash", "method": "FETCH",
            "flow": [
                {"type": "action", "name": "x"},
                {"type": "forEach", "items": "${xs}"}
            ]
        }))
        .unwrap_err();
        assert!(errs.len() >= 5, "expected 5+ violations, got {errs:?}");
    }

    #[test]
    fn validated_document_deserializes() {
        let doc = known_good_flux();
        validate_flux(&doc).unwrap();
        let def: crate::types::FluxDef = serde_json::from_value(doc).unwrap();
        assert_eq!(def.flow.len(), 6);
    }
}
