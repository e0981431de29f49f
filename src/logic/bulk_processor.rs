use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::logic::bulk_executor::BulkExecutor;
use crate::logic::bulk_stream::BulkResponseSink;
use crate::logic::quota::{BulkPermit, BulkQuota};
use crate::model::{
    BulkOperationError, BulkOperationRequest, BulkOperationResponse, BulkRequest,
    DescriptorRegistry, ScimError,
};
use crate::store::traits::ResourceBackend;

/// A parsed bulk request together with the transport details the processor
/// needs for admission and for building locations.
#[derive(Debug, Clone)]
pub struct BulkEnvelope {
    pub fail_on_errors: Option<i64>,
    pub operations: Vec<BulkOperationRequest>,
    pub content_length: Option<u64>,
    pub base_uri: String,
}

impl BulkEnvelope {
    pub fn from_request(request: BulkRequest, content_length: Option<u64>, base_uri: &str) -> Self {
        Self {
            fail_on_errors: request.fail_on_errors,
            operations: request.operations,
            content_length,
            base_uri: base_uri.to_string(),
        }
    }
}

/// Error counter for `failOnErrors`. A threshold of zero or less, or no
/// threshold at all, never stops processing.
#[derive(Debug, Clone, Copy)]
pub struct FailFast {
    threshold: Option<u64>,
    error_count: u64,
}

impl FailFast {
    pub fn new(fail_on_errors: Option<i64>) -> Self {
        Self {
            threshold: fail_on_errors.filter(|n| *n > 0).map(|n| n as u64),
            error_count: 0,
        }
    }

    pub fn record(&mut self, response: &BulkOperationResponse) {
        if !response.is_success() {
            self.error_count += 1;
        }
    }

    pub fn should_stop(&self) -> bool {
        matches!(self.threshold, Some(threshold) if self.error_count >= threshold)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub terminated_early: bool,
}

/// Admits bulk requests against the shared quota and runs them against a
/// resource backend.
pub struct BulkProcessor<B: ?Sized> {
    backend: Arc<B>,
    registry: Arc<DescriptorRegistry>,
    quota: Arc<BulkQuota>,
}

impl<B: ?Sized> Clone for BulkProcessor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            quota: Arc::clone(&self.quota),
        }
    }
}

impl<B: ResourceBackend + ?Sized> BulkProcessor<B> {
    pub fn new(backend: Arc<B>, registry: Arc<DescriptorRegistry>, quota: Arc<BulkQuota>) -> Self {
        Self {
            backend,
            registry,
            quota,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    pub fn quota(&self) -> &Arc<BulkQuota> {
        &self.quota
    }

    /// Request-level checks, in order: concurrency permit, declared content
    /// length, operation count. No operation runs unless all three pass.
    pub fn admit(&self, envelope: &BulkEnvelope) -> Result<BulkPermit, ScimError> {
        let permit = self.quota.try_acquire()?;
        self.quota.check_content_length(envelope.content_length)?;
        self.quota.check_operation_count(envelope.operations.len())?;
        Ok(permit)
    }

    /// Admit and run a bulk request, holding the permit until the last
    /// record has been handed to the sink.
    pub async fn process<S>(&self, envelope: BulkEnvelope, sink: &mut S) -> Result<BulkSummary, ScimError>
    where
        S: BulkResponseSink + ?Sized,
    {
        let _permit = self.admit(&envelope)?;
        self.run(envelope, sink).await
    }

    /// Run already admitted operations in order, emitting one record per
    /// processed operation. A sink failure aborts the batch; a panicking
    /// operation is reported as a 500 record and the batch continues.
    pub async fn run<S>(&self, envelope: BulkEnvelope, sink: &mut S) -> Result<BulkSummary, ScimError>
    where
        S: BulkResponseSink + ?Sized,
    {
        log::info!(
            "Processing bulk request with {} operations (failOnErrors: {:?})",
            envelope.operations.len(),
            envelope.fail_on_errors
        );

        let mut executor = BulkExecutor::new(&*self.backend, &self.registry, &envelope.base_uri);
        let mut fail_fast = FailFast::new(envelope.fail_on_errors);
        let mut summary = BulkSummary {
            total: envelope.operations.len(),
            ..BulkSummary::default()
        };

        for operation in &envelope.operations {
            if fail_fast.should_stop() {
                log::info!(
                    "Stopping bulk request after {} errors, {} of {} operations processed",
                    fail_fast.error_count(),
                    summary.processed,
                    summary.total
                );
                summary.terminated_early = true;
                break;
            }

            let outcome = AssertUnwindSafe(executor.execute(operation))
                .catch_unwind()
                .await;
            let response = match outcome {
                Ok(response) => response,
                Err(_) => {
                    log::error!(
                        "Bulk operation {} of {} panicked",
                        summary.processed + 1,
                        summary.total
                    );
                    executor.fail(BulkOperationError::new(
                        operation.method.clone(),
                        operation.bulk_id.clone(),
                        ScimError::ServerError(
                            "The bulk operation failed with an internal error".to_string(),
                        ),
                    ))
                }
            };
            fail_fast.record(&response);
            summary.processed += 1;
            if !response.is_success() {
                summary.failed += 1;
            }
            sink.emit(response).await?;
        }

        log::debug!("Bulk request finished: {:?}", summary);
        Ok(summary)
    }
}
