//! Resolvers the schema layer binds to fields.
//!
//! - `query`: query-root lookups by identifier, unique key and path query
//! - `links`: forward (`linkTo`) and reverse (`linkFrom`) link fields

pub mod links;
pub mod query;

pub use links::{
    link_from_query, resolve_link_from, resolve_ref, resolve_ref_list, LinkFrom,
    LinkFromParseError,
};
pub use query::{QueryHandler, UUID_NAMESPACE};
