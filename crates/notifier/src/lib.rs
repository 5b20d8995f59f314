//! Asynchronous notification dispatch.
//!
//! Submission persists a record and enqueues its id; dispatch workers lease
//! ids from the queue, claim the record with a conditional update, call the
//! deliverer, and either finish the record or re-enqueue it with exponential
//! backoff.

pub mod clock;
pub mod deliver;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod retry;
pub mod settings;
pub mod store;
pub mod submission;
pub mod worker_pool;

pub use clock::{Clock, ManualClock, SystemClock};
pub use deliver::{Deliverer, LogDeliverer, WebhookDeliverer};
pub use dispatcher::{DispatchOutcome, Dispatcher, SkipReason};
pub use error::{DeliveryError, DispatchError, QueueError, StoreError, SubmitError};
pub use queue::{DispatchQueue, Lease, MemoryDispatchQueue, RedisDispatchQueue};
pub use retry::RetryPolicy;
pub use settings::DispatchSettings;
pub use store::{MemoryNotificationStore, NotificationStore, PgNotificationStore};
pub use submission::SubmissionService;
pub use worker_pool::{DispatchStats, WorkerPool};
