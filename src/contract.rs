//! Endpoint contract registry.
//!
//! Every backend operation the application may call is declared here once:
//! method, path template, request/response schemas and envelope kinds. The
//! set of keys is closed ([`EndpointKey`]); string lookups of anything else
//! fail with [`Error::UnknownEndpoint`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::Error;
use crate::naming::{RequestEnvelope, ResourceType, ResponseEnvelope};
use crate::schema::{self, Schema};

/// HTTP methods used by contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! endpoint_keys {
    ($($variant:ident => $name:literal,)+) => {
        /// Every endpoint the client knows how to call.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EndpointKey {
            $($variant,)+
        }

        impl EndpointKey {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

endpoint_keys! {
    LeadsList => "leads.list",
    LeadsGet => "leads.get",
    LeadsCreate => "leads.create",
    LeadsUpdate => "leads.update",
    LeadsDelete => "leads.delete",
    LeadsConvert => "leads.convert",
    ContactsList => "contacts.list",
    ContactsGet => "contacts.get",
    ContactsCreate => "contacts.create",
    ContactsUpdate => "contacts.update",
    ContactsDelete => "contacts.delete",
    AccountsList => "accounts.list",
    AccountsGet => "accounts.get",
    AccountsCreate => "accounts.create",
    AccountsUpdate => "accounts.update",
    AccountsDelete => "accounts.delete",
    AccountContacts => "accounts.contacts",
    OpportunitiesList => "opportunities.list",
    OpportunitiesGet => "opportunities.get",
    OpportunitiesCreate => "opportunities.create",
    OpportunitiesUpdate => "opportunities.update",
    OpportunitiesDelete => "opportunities.delete",
    OpportunitiesPipeline => "opportunities.pipeline",
    ActivitiesList => "activities.list",
    DashboardStats => "dashboard.stats",
    CurrentUser => "session.me",
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownEndpoint(s.to_owned()))
    }
}

/// Static declaration of one backend operation.
#[derive(Debug)]
#[non_exhaustive]
pub struct EndpointContract {
    pub key: EndpointKey,
    pub method: Method,
    /// Path with `:name` placeholders, e.g. `/leads/:id/convert`.
    pub path_template: &'static str,
    pub request_schema: Schema,
    pub response_schema: Schema,
    pub request_envelope: RequestEnvelope,
    pub response_envelope: ResponseEnvelope,
}

impl EndpointContract {
    /// Placeholder names in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &'static str> {
        self.path_template
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
    }
}

/// Uncompiled contract row.
struct Declaration {
    key: EndpointKey,
    method: Method,
    path_template: &'static str,
    request: Value,
    response: Value,
    request_envelope: RequestEnvelope,
    response_envelope: ResponseEnvelope,
}

/// Lookup table from endpoint key to compiled contract.
#[derive(Debug)]
pub struct ContractRegistry {
    contracts: HashMap<EndpointKey, EndpointContract>,
}

impl ContractRegistry {
    /// Builds the registry of built-in endpoints, compiling every schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if a schema fails to compile, or if the
    /// declarations do not cover [`EndpointKey::ALL`] exactly once.
    pub fn builtin() -> Result<Self, Error> {
        let mut contracts = HashMap::new();
        for declaration in declarations() {
            let key = declaration.key;
            let contract = compile(declaration)?;
            if contracts.insert(key, contract).is_some() {
                return Err(Error::Schema {
                    endpoint: key.as_str(),
                    detail: "declared twice".into(),
                });
            }
        }

        let registry = Self { contracts };
        registry.self_check()?;
        Ok(registry)
    }

    /// Looks up a contract by its string key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] if no contract has this key.
    pub fn lookup(&self, key: &str) -> Result<&EndpointContract, Error> {
        let key: EndpointKey = key.parse()?;
        self.contracts
            .get(&key)
            .ok_or_else(|| Error::UnknownEndpoint(key.as_str().to_owned()))
    }

    /// Looks up a contract by typed key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] only if the registry was built
    /// without this key, which [`ContractRegistry::builtin`] rules out.
    pub fn get(&self, key: EndpointKey) -> Result<&EndpointContract, Error> {
        self.contracts
            .get(&key)
            .ok_or_else(|| Error::UnknownEndpoint(key.as_str().to_owned()))
    }

    /// All contracts, in [`EndpointKey::ALL`] order.
    pub fn contracts(&self) -> impl Iterator<Item = &EndpointContract> {
        EndpointKey::ALL.iter().filter_map(|key| self.contracts.get(key))
    }

    /// Startup self-check: every key is declared with a usable path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] naming the first offending endpoint.
    pub fn self_check(&self) -> Result<(), Error> {
        for key in EndpointKey::ALL {
            let contract = self.get(*key).map_err(|_| Error::Schema {
                endpoint: key.as_str(),
                detail: "no contract declared".into(),
            })?;
            let path = contract.path_template;
            if !path.starts_with('/') || path.contains("//") {
                return Err(Error::Schema {
                    endpoint: key.as_str(),
                    detail: format!("malformed path template `{path}`"),
                });
            }
            if contract.placeholders().any(str::is_empty) {
                return Err(Error::Schema {
                    endpoint: key.as_str(),
                    detail: format!("unnamed placeholder in `{path}`"),
                });
            }
        }
        Ok(())
    }
}

fn compile(declaration: Declaration) -> Result<EndpointContract, Error> {
    let endpoint = declaration.key.as_str();
    let request_schema = Schema::compile(declaration.request)
        .map_err(|detail| Error::Schema { endpoint, detail })?;
    let response_schema = Schema::compile(declaration.response)
        .map_err(|detail| Error::Schema { endpoint, detail })?;
    Ok(EndpointContract {
        key: declaration.key,
        method: declaration.method,
        path_template: declaration.path_template,
        request_schema,
        response_schema,
        request_envelope: declaration.request_envelope,
        response_envelope: declaration.response_envelope,
    })
}

// ── Declarations ───────────────────────────────────────────────────

struct CrudKeys {
    list: EndpointKey,
    get: EndpointKey,
    create: EndpointKey,
    update: EndpointKey,
    delete: EndpointKey,
}

struct CrudPaths {
    list: &'static str,
    item: &'static str,
    collection: &'static str,
}

fn crud(resource: ResourceType, keys: CrudKeys, paths: CrudPaths) -> [Declaration; 5] {
    let document = |include_id| RequestEnvelope::Document {
        resource,
        include_id,
    };
    [
        Declaration {
            key: keys.list,
            method: Method::Get,
            path_template: paths.list,
            request: schema::no_body(),
            response: schema::paginated(schema::record(resource)),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::List,
        },
        Declaration {
            key: keys.get,
            method: Method::Get,
            path_template: paths.item,
            request: schema::no_body(),
            response: schema::record(resource),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Document,
        },
        Declaration {
            key: keys.create,
            method: Method::Post,
            path_template: paths.collection,
            request: schema::create(resource),
            response: schema::record(resource),
            request_envelope: document(false),
            response_envelope: ResponseEnvelope::Document,
        },
        Declaration {
            key: keys.update,
            method: Method::Patch,
            path_template: paths.item,
            request: schema::update(resource),
            response: schema::record(resource),
            request_envelope: document(true),
            response_envelope: ResponseEnvelope::Document,
        },
        Declaration {
            key: keys.delete,
            method: Method::Delete,
            path_template: paths.item,
            request: schema::no_body(),
            response: schema::acknowledgement(),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Single,
        },
    ]
}

fn declarations() -> Vec<Declaration> {
    use EndpointKey as K;

    let mut all = Vec::with_capacity(EndpointKey::ALL.len());
    all.extend(crud(
        ResourceType::Leads,
        CrudKeys {
            list: K::LeadsList,
            get: K::LeadsGet,
            create: K::LeadsCreate,
            update: K::LeadsUpdate,
            delete: K::LeadsDelete,
        },
        CrudPaths {
            list: "/leads",
            item: "/module/Leads/:id",
            collection: "/module/Leads",
        },
    ));
    all.extend(crud(
        ResourceType::Contacts,
        CrudKeys {
            list: K::ContactsList,
            get: K::ContactsGet,
            create: K::ContactsCreate,
            update: K::ContactsUpdate,
            delete: K::ContactsDelete,
        },
        CrudPaths {
            list: "/contacts",
            item: "/module/Contacts/:id",
            collection: "/module/Contacts",
        },
    ));
    all.extend(crud(
        ResourceType::Accounts,
        CrudKeys {
            list: K::AccountsList,
            get: K::AccountsGet,
            create: K::AccountsCreate,
            update: K::AccountsUpdate,
            delete: K::AccountsDelete,
        },
        CrudPaths {
            list: "/accounts",
            item: "/module/Accounts/:id",
            collection: "/module/Accounts",
        },
    ));
    all.extend(crud(
        ResourceType::Opportunities,
        CrudKeys {
            list: K::OpportunitiesList,
            get: K::OpportunitiesGet,
            create: K::OpportunitiesCreate,
            update: K::OpportunitiesUpdate,
            delete: K::OpportunitiesDelete,
        },
        CrudPaths {
            list: "/opportunities",
            item: "/module/Opportunities/:id",
            collection: "/module/Opportunities",
        },
    ));

    all.extend([
        Declaration {
            key: K::LeadsConvert,
            method: Method::Post,
            path_template: "/leads/:id/convert",
            request: schema::lead_conversion_request(),
            response: schema::lead_conversion(),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Single,
        },
        Declaration {
            key: K::AccountContacts,
            method: Method::Get,
            path_template: "/module/Accounts/:id/relationships/contacts",
            request: schema::no_body(),
            response: schema::unpaginated(schema::record(ResourceType::Contacts)),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::DocumentList,
        },
        Declaration {
            key: K::OpportunitiesPipeline,
            method: Method::Get,
            path_template: "/opportunities/pipeline",
            request: schema::no_body(),
            response: schema::pipeline(),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Single,
        },
        Declaration {
            key: K::ActivitiesList,
            method: Method::Get,
            path_template: "/activities",
            request: schema::no_body(),
            response: schema::paginated(schema::activity()),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::List,
        },
        Declaration {
            key: K::DashboardStats,
            method: Method::Get,
            path_template: "/dashboard/stats",
            request: schema::no_body(),
            response: schema::dashboard_stats(),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Single,
        },
        Declaration {
            key: K::CurrentUser,
            method: Method::Get,
            path_template: "/me",
            request: schema::no_body(),
            response: schema::current_user(),
            request_envelope: RequestEnvelope::Simple,
            response_envelope: ResponseEnvelope::Bare,
        },
    ]);
    all
}
