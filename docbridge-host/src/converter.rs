//! Async facade over a [`Session`]
//!
//! A `Converter` can be cloned and shared across tasks. Runs against the
//! same converter are serialized on a mutex, and the blocking module call
//! runs on tokio's blocking pool. For parallel conversions, build one
//! converter per module instance.

use crate::error::BridgeError;
use crate::module::ConversionModule;
use crate::session::Session;
use docbridge_api::{
    ConvertRequest, LegacyOutput, QueryRequest, QueryResponse, Resource, RunResult,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A shareable handle that runs conversions one at a time
pub struct Converter<M> {
    session: Arc<Mutex<Session<M>>>,
}

impl<M> Clone for Converter<M> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<M> Converter<M>
where
    M: ConversionModule + Send + 'static,
{
    pub fn new(session: Session<M>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Create a converter around a module with default session settings
    pub fn from_module(module: M) -> Self {
        Self::new(Session::new(module))
    }

    /// Run a conversion
    pub async fn convert(&self, request: ConvertRequest) -> Result<RunResult, BridgeError> {
        let mut session = Arc::clone(&self.session).lock_owned().await;
        tokio::task::spawn_blocking(move || session.convert(&request)).await?
    }

    /// Run an informational query
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BridgeError> {
        let mut session = Arc::clone(&self.session).lock_owned().await;
        tokio::task::spawn_blocking(move || session.query(&request)).await?
    }

    /// Run a conversion through the legacy argument-string interface
    pub async fn legacy(
        &self,
        args: String,
        stdin: String,
        resources: Vec<Resource>,
    ) -> Result<LegacyOutput, BridgeError> {
        let mut session = Arc::clone(&self.session).lock_owned().await;
        tokio::task::spawn_blocking(move || session.legacy(&args, &stdin, &resources)).await?
    }
}
