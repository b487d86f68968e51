//! Docview Scheduler Library
//!
//! Page decode scheduling for a document viewer: one worker per open
//! document, at most one live request per page, cooperative cancellation,
//! and a render cache consulted before the decoder is touched.
//!
//! # Example
//!
//! ```
//! use docview_scheduler::DecodeTaskRegistry;
//!
//! let registry = DecodeTaskRegistry::new();
//!
//! let first = registry.submit(3, "render at 800px");
//! let second = registry.submit(3, "render at 1200px");
//!
//! // The second request replaced the first.
//! assert_eq!(second.superseded, Some(first.task));
//! assert_eq!(registry.live_task(3), Some(second.task));
//!
//! // Page scrolled away.
//! registry.remove(3);
//! assert!(registry.is_empty());
//! ```

mod cancel;
mod registry;
mod scheduler;
mod worker;

pub use cancel::CancellationToken;
pub use registry::{DecodeTaskRegistry, QueueTicket, Submission, TaskHandle, TaskId};
pub use scheduler::{DecodeScheduler, RenderedPage, ScheduleError, SchedulerConfig, SchedulerStats};
