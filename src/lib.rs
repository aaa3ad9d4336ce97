#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod naming;
pub mod schema;
pub mod transport;
pub mod types;

// Re-exports for convenient access
pub use auth::{
    AuthEvent, AuthManager, AuthSession, Credentials, FileSessionStore, MemorySessionStore,
    SessionStore,
};
pub use client::{GatewayClient, Params};
pub use config::GatewayConfig;
pub use contract::{ContractRegistry, EndpointContract, EndpointKey, Method};
pub use error::Error;
pub use naming::{RequestEnvelope, ResourceType, ResponseEnvelope};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
pub use types::{
    Account, Contact, DashboardStats, Lead, LeadConversion, ListPage, Opportunity, Pagination,
    PipelineStage, RecordId,
};
