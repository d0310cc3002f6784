/*!
 * Cache engine
 *
 * The central coordinator: owns the pool state machine
 * (DOWNLOADING → READY), the watermark accounting, and the single lock
 * that serializes consumption, maintenance writes, secret rotation and
 * wipes over the shared on-disk pool.
 */

mod engine;

pub use engine::CacheEngine;
pub use engine::DEFAULT_SEGMENT_BYTES;
