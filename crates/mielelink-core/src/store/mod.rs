// ── Device cache ──
//
// Per-device records with push-based change notification, the reconciler
// that feeds them, and the projection onto presentation nodes.

mod cache;
mod collection;
pub mod projection;
mod record;

pub(crate) use cache::reconcile_task;
pub use cache::DeviceCache;
pub use collection::DeviceStore;
pub use record::{DeviceRecord, ProgramList};
