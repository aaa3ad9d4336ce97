//! JSON Schemas for the logical (camelCase) request and response shapes.
//!
//! Schemas describe what application code sends and receives, after the
//! naming bridge has run. They are compiled once when the registry is built.

use jsonschema::{Draft, Validator};
use serde_json::{Value, json};

use crate::naming::ResourceType;

/// A compiled JSON Schema together with its source document.
pub struct Schema {
    source: Value,
    validator: Validator,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("source", &self.source).finish_non_exhaustive()
    }
}

impl Schema {
    /// Compiles a draft 2020-12 schema.
    ///
    /// # Errors
    ///
    /// Returns the compiler's message if `source` is not a valid schema.
    pub fn compile(source: Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&source)
            .map_err(|e| e.to_string())?;
        Ok(Self { source, validator })
    }

    /// Validates a value, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns one diagnostic per violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let diagnostics: Vec<String> =
            self.validator.iter_errors(value).map(|err| err.to_string()).collect();
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(diagnostics)
        }
    }

    #[must_use]
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Whether the schema accepts "no body".
    #[must_use]
    pub fn accepts_null(&self) -> bool {
        self.validator.is_valid(&Value::Null)
    }
}

// ── Shared fragments ───────────────────────────────────────────────

/// Accepts no body at all.
#[must_use]
pub fn no_body() -> Value {
    json!({ "type": "null" })
}

/// Delete acknowledgements: nothing, or whatever object the backend echoes.
#[must_use]
pub fn acknowledgement() -> Value {
    json!({ "type": ["object", "null"] })
}

fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

fn nullable_number() -> Value {
    json!({ "type": ["number", "null"] })
}

fn pagination() -> Value {
    json!({
        "type": "object",
        "required": ["page", "limit", "total", "pages"],
        "properties": {
            "page": { "type": "integer", "minimum": 0 },
            "limit": { "type": "integer", "minimum": 0 },
            "total": { "type": "integer", "minimum": 0 },
            "pages": { "type": "integer", "minimum": 0 }
        }
    })
}

// ── Resources ──────────────────────────────────────────────────────

fn properties(resource: ResourceType) -> Value {
    let s = nullable_string();
    let n = nullable_number();
    match resource {
        ResourceType::Leads => json!({
            "firstName": s, "lastName": { "type": "string", "minLength": 1 },
            "email": s, "phone": s, "mobile": s, "company": s, "status": s,
            "leadSource": s, "description": s, "assignedUserId": s,
            "createdAt": s, "updatedAt": s
        }),
        ResourceType::Contacts => json!({
            "firstName": s, "lastName": { "type": "string", "minLength": 1 },
            "email": s, "phone": s, "mobile": s, "title": s, "accountId": s,
            "assignedUserId": s, "createdAt": s, "updatedAt": s
        }),
        ResourceType::Accounts => json!({
            "name": { "type": "string", "minLength": 1 },
            "industry": s, "website": s, "phone": s, "annualRevenue": s,
            "assignedUserId": s, "createdAt": s, "updatedAt": s
        }),
        ResourceType::Opportunities => json!({
            "name": { "type": "string", "minLength": 1 },
            "amount": { "type": "number", "minimum": 0 },
            "salesStage": { "type": "string" },
            "probability": n, "closeDate": { "type": "string" },
            "accountId": s, "assignedUserId": s, "createdAt": s, "updatedAt": s
        }),
    }
}

fn required(resource: ResourceType) -> Value {
    match resource {
        ResourceType::Leads | ResourceType::Contacts => json!(["lastName"]),
        ResourceType::Accounts => json!(["name"]),
        ResourceType::Opportunities => json!(["name", "amount", "salesStage", "closeDate"]),
    }
}

/// Body of `<resource>.create`.
#[must_use]
pub fn create(resource: ResourceType) -> Value {
    json!({
        "type": "object",
        "required": required(resource),
        "properties": properties(resource)
    })
}

/// Body of `<resource>.update`: any subset of fields, at least one.
#[must_use]
pub fn update(resource: ResourceType) -> Value {
    json!({
        "type": "object",
        "minProperties": 1,
        "properties": properties(resource)
    })
}

/// One record as returned by the backend.
#[must_use]
pub fn record(resource: ResourceType) -> Value {
    let mut required = required(resource);
    if let Some(fields) = required.as_array_mut() {
        fields.insert(0, json!("id"));
    }
    let mut properties = properties(resource);
    if let Some(fields) = properties.as_object_mut() {
        fields.insert("id".into(), json!({ "type": "string", "minLength": 1 }));
    }
    json!({
        "type": "object",
        "required": required,
        "properties": properties
    })
}

/// `{data: [record], pagination}`.
#[must_use]
pub fn paginated(item: Value) -> Value {
    json!({
        "type": "object",
        "required": ["data", "pagination"],
        "properties": {
            "data": { "type": "array", "items": item },
            "pagination": pagination()
        }
    })
}

/// `{data: [record], ..}` without pagination.
#[must_use]
pub fn unpaginated(item: Value) -> Value {
    json!({
        "type": "object",
        "required": ["data"],
        "properties": { "data": { "type": "array", "items": item } }
    })
}

// ── Custom endpoints ───────────────────────────────────────────────

#[must_use]
pub fn lead_conversion_request() -> Value {
    json!({
        "type": ["object", "null"],
        "properties": {
            "createAccount": { "type": "boolean" },
            "createOpportunity": { "type": "boolean" },
            "opportunityName": { "type": "string", "minLength": 1 },
            "opportunityAmount": { "type": "number", "minimum": 0 }
        },
        "dependentRequired": { "opportunityAmount": ["opportunityName"] }
    })
}

#[must_use]
pub fn lead_conversion() -> Value {
    json!({
        "type": "object",
        "required": ["contactId"],
        "properties": {
            "contactId": { "type": "string", "minLength": 1 },
            "accountId": nullable_string(),
            "opportunityId": nullable_string()
        }
    })
}

#[must_use]
pub fn pipeline() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["salesStage", "count", "amount"],
            "properties": {
                "salesStage": { "type": "string" },
                "count": { "type": "integer", "minimum": 0 },
                "amount": { "type": "number" }
            }
        }
    })
}

#[must_use]
pub fn dashboard_stats() -> Value {
    let count = json!({ "type": "integer", "minimum": 0 });
    json!({
        "type": "object",
        "required": [
            "totalLeads",
            "totalContacts",
            "totalAccounts",
            "openOpportunities",
            "pipelineValue"
        ],
        "properties": {
            "totalLeads": count,
            "totalContacts": count,
            "totalAccounts": count,
            "openOpportunities": count,
            "pipelineValue": { "type": "number" }
        }
    })
}

#[must_use]
pub fn activity() -> Value {
    json!({
        "type": "object",
        "required": ["id", "name"],
        "properties": {
            "id": { "type": "string" },
            "name": { "type": "string" },
            "status": nullable_string(),
            "dueDate": nullable_string(),
            "parentType": nullable_string(),
            "parentId": nullable_string()
        }
    })
}

#[must_use]
pub fn current_user() -> Value {
    json!({
        "type": "object",
        "required": ["id", "userName"],
        "properties": {
            "id": { "type": "string" },
            "userName": { "type": "string" },
            "email": nullable_string()
        }
    })
}
