pub mod bulk_executor;
pub mod bulk_id;
pub mod bulk_processor;
pub mod bulk_stream;
pub mod bulk_validate;
pub mod bulk_xml;
pub mod quota;

pub use bulk_executor::BulkExecutor;
pub use bulk_id::BulkIdResolver;
pub use bulk_processor::{BulkEnvelope, BulkProcessor, BulkSummary, FailFast};
pub use bulk_stream::{BulkResponseEncoder, BulkResponseSink};
pub use bulk_validate::{split_path, BulkPath, BulkValidator, ValidatedOperation};
pub use bulk_xml::parse_bulk_request;
pub use quota::{
    read_limited, AdjustableSemaphore, BulkPermit, BulkQuota, BulkQuotaSnapshot, UNBOUNDED_PERMITS,
};
