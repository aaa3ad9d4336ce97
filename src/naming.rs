//! Naming bridge between logical objects and backend wire documents.
//!
//! Application code speaks camelCase objects (`{"firstName": "John"}`). The
//! backend speaks snake_case attributes, either wrapped in a resource document
//! (`{"data": {"type": "Leads", "id": "..", "attributes": {..}}}`) or in the
//! lighter `success/data/error` and `data/pagination` envelopes used by custom
//! endpoints. Which envelope applies is declared per contract.
//!
//! Renaming is best-effort: fields without a mapping pass through untouched in
//! both directions, so attributes added on either side are never dropped.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

/// Declared (logical, wire) field pairs.
///
/// Both columns must be unique. Fields whose names already agree (`status`,
/// `title`, `name`, ...) are deliberately absent.
pub const FIELD_MAPPING: &[(&str, &str)] = &[
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("email", "email1"),
    ("phone", "phone_work"),
    ("mobile", "phone_mobile"),
    ("company", "account_name"),
    ("leadSource", "lead_source"),
    ("accountId", "account_id"),
    ("assignedUserId", "assigned_user_id"),
    ("annualRevenue", "annual_revenue"),
    ("salesStage", "sales_stage"),
    ("closeDate", "date_closed"),
    ("createdAt", "date_entered"),
    ("updatedAt", "date_modified"),
    ("contactId", "contact_id"),
    ("opportunityId", "opportunity_id"),
    ("opportunityName", "opportunity_name"),
    ("opportunityAmount", "opportunity_amount"),
    ("createAccount", "create_account"),
    ("createOpportunity", "create_opportunity"),
    ("totalLeads", "total_leads"),
    ("totalContacts", "total_contacts"),
    ("totalAccounts", "total_accounts"),
    ("openOpportunities", "open_opportunities"),
    ("pipelineValue", "pipeline_value"),
    ("dueDate", "date_due"),
    ("parentType", "parent_type"),
    ("parentId", "parent_id"),
    ("userName", "user_name"),
];

static TO_WIRE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| FIELD_MAPPING.iter().copied().collect());

static FROM_WIRE: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| FIELD_MAPPING.iter().map(|&(l, w)| (w, l)).collect());

/// Backend resource types reachable through resource documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Leads,
    Contacts,
    Accounts,
    Opportunities,
}

impl ResourceType {
    pub const ALL: [Self; 4] = [Self::Leads, Self::Contacts, Self::Accounts, Self::Opportunities];

    /// The `type` string the backend expects in documents.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Leads => "Leads",
            Self::Contacts => "Contacts",
            Self::Accounts => "Accounts",
            Self::Opportunities => "Opportunities",
        }
    }

    /// The entity name used by application code.
    #[must_use]
    pub fn logical_name(self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Contacts => "contacts",
            Self::Accounts => "accounts",
            Self::Opportunities => "opportunities",
        }
    }

    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.wire_name() == name)
    }
}

/// How a request body is shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEnvelope {
    /// Flat object of wire-named fields.
    Simple,
    /// `{"data": {"type", "id"?, "attributes"}}`.
    Document {
        resource: ResourceType,
        /// Emit `id` (updates of an existing record).
        include_id: bool,
    },
}

/// How a response body is shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEnvelope {
    /// Plain JSON (or no body at all).
    Bare,
    /// `{"success", "data"?, "error"?}`.
    Single,
    /// `{"data": [..], "pagination": {..}}`.
    List,
    /// `{"data": {"type", "id", "attributes"}, "included"?}`.
    Document,
    /// `{"data": [{"type", "id", "attributes"}], "meta"?, "links"?}`.
    DocumentList,
}

/// Why a wire payload could not be unwrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwrapError {
    /// The payload does not have the declared envelope shape.
    Malformed(String),
    /// A single envelope reported `success: false`.
    Rejected(String),
}

/// Renames the keys of one object to wire names.
#[must_use]
pub fn rename_to_wire(fields: &Map<String, Value>) -> Map<String, Value> {
    rename(fields, &TO_WIRE)
}

/// Renames the keys of one object back to logical names.
#[must_use]
pub fn rename_from_wire(fields: &Map<String, Value>) -> Map<String, Value> {
    rename(fields, &FROM_WIRE)
}

fn rename(
    fields: &Map<String, Value>,
    table: &HashMap<&'static str, &'static str>,
) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let key = table.get(key.as_str()).map_or_else(|| key.clone(), |k| (*k).to_owned());
            (key, value.clone())
        })
        .collect()
}

/// Renames an object, or every object inside an array. Other values pass through.
fn rename_value_from_wire(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(rename_from_wire(map)),
        Value::Array(items) => Value::Array(items.iter().map(rename_value_from_wire).collect()),
        other => other.clone(),
    }
}

/// Converts a logical body into its wire shape.
///
/// For resource documents the `id` is taken from `id` when given (the path
/// parameter), falling back to an `id` field of the body; it is emitted only
/// when the envelope asks for it and never appears inside `attributes`.
#[must_use]
pub fn to_wire(logical: &Value, envelope: RequestEnvelope, id: Option<&str>) -> Value {
    let Value::Object(fields) = logical else {
        return logical.clone();
    };

    match envelope {
        RequestEnvelope::Simple => Value::Object(rename_to_wire(fields)),
        RequestEnvelope::Document {
            resource,
            include_id,
        } => {
            let mut fields = fields.clone();
            let body_id = fields.remove("id");

            let mut document = Map::new();
            document.insert("type".into(), Value::String(resource.wire_name().into()));
            if include_id {
                let id = id.map(|s| Value::String(s.to_owned())).or(body_id);
                if let Some(id) = id {
                    document.insert("id".into(), id);
                }
            }
            document.insert("attributes".into(), Value::Object(rename_to_wire(&fields)));

            let mut wrapped = Map::new();
            wrapped.insert("data".into(), Value::Object(document));
            Value::Object(wrapped)
        }
    }
}

/// Unwraps a wire payload and renames it back to logical names.
///
/// # Errors
///
/// Returns [`UnwrapError::Malformed`] when the payload does not have the
/// declared envelope shape, or [`UnwrapError::Rejected`] when a single
/// envelope reports `success: false`.
pub fn from_wire(wire: &Value, envelope: ResponseEnvelope) -> Result<Value, UnwrapError> {
    match envelope {
        ResponseEnvelope::Bare => Ok(rename_value_from_wire(wire)),
        ResponseEnvelope::Single => unwrap_single(wire),
        ResponseEnvelope::List => unwrap_list(wire, |item| Ok(rename_value_from_wire(item))),
        ResponseEnvelope::Document => match top_level(wire)?.get("data") {
            None => Err(UnwrapError::Malformed("document without `data`".into())),
            Some(Value::Null) => Ok(Value::Null),
            Some(document) => flatten_document(document),
        },
        ResponseEnvelope::DocumentList => unwrap_list(wire, flatten_document),
    }
}

fn top_level(wire: &Value) -> Result<&Map<String, Value>, UnwrapError> {
    wire.as_object().ok_or_else(|| {
        UnwrapError::Malformed(format!("expected an object envelope, got {}", kind(wire)))
    })
}

fn unwrap_single(wire: &Value) -> Result<Value, UnwrapError> {
    let envelope = top_level(wire)?;

    if envelope.get("success").and_then(Value::as_bool) == Some(false) {
        let message = envelope
            .get("error")
            .and_then(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .or_else(|| e.get("code").and_then(Value::as_str))
            })
            .unwrap_or("request was not successful");
        return Err(UnwrapError::Rejected(message.to_owned()));
    }

    Ok(envelope.get("data").map_or(Value::Null, rename_value_from_wire))
}

/// Unwraps `{"data": [..], ..}`, converting each item and carrying every other
/// top-level key (`pagination`, `meta`, `links`) through unchanged.
fn unwrap_list(
    wire: &Value,
    item: impl Fn(&Value) -> Result<Value, UnwrapError>,
) -> Result<Value, UnwrapError> {
    let envelope = top_level(wire)?;
    let Some(Value::Array(items)) = envelope.get("data") else {
        return Err(UnwrapError::Malformed("list envelope without a `data` array".into()));
    };

    let items = items.iter().map(item).collect::<Result<Vec<_>, _>>()?;

    let mut out = Map::new();
    out.insert("data".into(), Value::Array(items));
    for (key, value) in envelope {
        if key != "data" {
            out.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::Object(out))
}

/// `{"type", "id", "attributes"}` -> `{"id", ..logical attributes}`.
fn flatten_document(document: &Value) -> Result<Value, UnwrapError> {
    let Value::Object(document) = document else {
        return Err(UnwrapError::Malformed(format!(
            "expected a resource document, got {}",
            kind(document)
        )));
    };

    let mut flat = Map::new();
    if let Some(id) = document.get("id") {
        flat.insert("id".into(), id.clone());
    }
    match document.get("attributes") {
        Some(Value::Object(attributes)) => {
            for (key, value) in rename_from_wire(attributes) {
                flat.entry(key).or_insert(value);
            }
        }
        None | Some(Value::Null) => {}
        Some(other) => {
            return Err(UnwrapError::Malformed(format!(
                "document attributes must be an object, got {}",
                kind(other)
            )));
        }
    }
    Ok(Value::Object(flat))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
