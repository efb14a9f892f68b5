//! Host side of the integrator: buffers, scheduling, device queues and the
//! render orchestrator.

pub mod adaptive_sampling;
pub mod callbacks;
pub mod device_queue;
pub mod path_trace;
pub mod render_buffers;
pub mod work_scheduler;

pub use adaptive_sampling::AdaptiveSampling;
pub use callbacks::{CallbackSet, NoCallbacks, RenderCallbacks};
pub use device_queue::{DeviceQueue, QueueStats};
pub use path_trace::{PathTrace, RenderOutcome, RenderStatus, UpdateStatus};
pub use render_buffers::{BufferParams, PassType, RenderBuffers, RenderBuffersSnapshot};
pub use work_scheduler::{tile_calculate_best_size, TileSize, WorkScheduler, WorkTile};
