//! Queries as submitted to the driver.

use crate::client::ProtocolClient;
use crate::error::ClientResult;
use crate::future::Deferred;
use crate::protocol::types::Oid;
use crate::result::QueryResult;

/// A request the protocol client knows how to send.
///
/// Parameters are sent in text format; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Simple query; may hold several statements.
    Query { sql: String },
    /// One statement with `$n` parameters, via the unnamed statement.
    QueryParams {
        sql: String,
        params: Vec<Option<String>>,
    },
    /// Create a named prepared statement. Zero OIDs let the server infer.
    Prepare {
        name: String,
        sql: String,
        param_types: Vec<Oid>,
    },
    /// Execute a prepared statement.
    QueryPrepared {
        name: String,
        params: Vec<Option<String>>,
    },
    /// Parameter and result column types of a prepared statement.
    DescribePrepared { name: String },
    /// Result columns of an open portal.
    DescribePortal { name: String },
}

impl Operation {
    /// Name of the client primitive this maps to.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query { .. } => "send_query",
            Operation::QueryParams { .. } => "send_query_params",
            Operation::Prepare { .. } => "send_prepare",
            Operation::QueryPrepared { .. } => "send_query_prepared",
            Operation::DescribePrepared { .. } => "send_describe_prepared",
            Operation::DescribePortal { .. } => "send_describe_portal",
        }
    }

    /// Hand the request to the client.
    pub fn send<C: ProtocolClient>(&self, client: &mut C) -> ClientResult<()> {
        match self {
            Operation::Query { sql } => client.send_query(sql),
            Operation::QueryParams { sql, params } => client.send_query_params(sql, params),
            Operation::Prepare {
                name,
                sql,
                param_types,
            } => client.send_prepare(name, sql, param_types),
            Operation::QueryPrepared { name, params } => client.send_query_prepared(name, params),
            Operation::DescribePrepared { name } => client.send_describe_prepared(name),
            Operation::DescribePortal { name } => client.send_describe_portal(name),
        }
    }
}

/// An operation paired with the [`Deferred`] its caller holds.
#[derive(Debug)]
pub struct Query {
    pub operation: Operation,
    pub deferred: Deferred<QueryResult>,
}

impl Query {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            deferred: Deferred::new(),
        }
    }
}
