pub mod bucket;
pub mod event;

pub use bucket::bucket_minute;
pub use event::{AdEvent, EnrichedAdEvent, EventType, ValidationError};
