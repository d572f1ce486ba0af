//! Import helpers for simplifying resource import implementations

use crate::resource::{ImportResourceStateRequest, ImportResourceStateResponse, ImportedResource};
use crate::types::{AttributePath, Diagnostic, DynamicValue};

/// Sets the import ID to a specific attribute in an otherwise empty state
///
/// This is useful for resources whose import ID is the remote identifier:
/// the follow-up read fills in everything else.
///
/// Example: ID "cgw-0a1b2c" -> state.id = "cgw-0a1b2c"
pub fn import_state_passthrough_id(
    attr_path: AttributePath,
    request: &ImportResourceStateRequest,
) -> ImportResourceStateResponse {
    let mut response = ImportResourceStateResponse {
        imported_resources: vec![],
        diagnostics: vec![],
    };

    if request.id.trim().is_empty() {
        response.diagnostics.push(
            Diagnostic::error("Invalid import ID", "The import ID must not be empty")
                .with_attribute(attr_path),
        );
        return response;
    }

    let mut state = DynamicValue::object();
    if let Err(e) = state.set_string(&attr_path, request.id.clone()) {
        response.diagnostics.push(
            Diagnostic::error(
                "Failed to set import ID",
                format!("Could not set {} to {:?}: {}", attr_path, request.id, e),
            )
            .with_attribute(attr_path),
        );
        return response;
    }

    response.imported_resources.push(ImportedResource {
        type_name: request.type_name.clone(),
        state,
    });
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_sets_id() {
        let request = ImportResourceStateRequest {
            type_name: "aws_customer_gateway".to_string(),
            id: "cgw-0123".to_string(),
        };

        let response = import_state_passthrough_id(AttributePath::new("id"), &request);

        assert!(response.diagnostics.is_empty());
        assert_eq!(response.imported_resources.len(), 1);
        assert_eq!(
            response.imported_resources[0]
                .state
                .get_string(&AttributePath::new("id"))
                .unwrap(),
            "cgw-0123"
        );
    }

    #[test]
    fn passthrough_rejects_blank_id() {
        let request = ImportResourceStateRequest {
            type_name: "aws_customer_gateway".to_string(),
            id: "  ".to_string(),
        };

        let response = import_state_passthrough_id(AttributePath::new("id"), &request);

        assert!(response.imported_resources.is_empty());
        assert_eq!(response.diagnostics[0].summary, "Invalid import ID");
    }
}
