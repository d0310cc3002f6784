/*!
 * Secret-gated store for pool segments and metadata
 *
 * Everything the cache puts on disk is sealed with AES-256-GCM under a key
 * derived from the caller-supplied device secret. Each location directory
 * holds sealed segment files plus one sealed manifest recording, per
 * segment, its id, length, consumption offset, checksum and creation time.
 */

mod store;

pub use store::SecretStore;
pub use store::SegmentMeta;
pub use store::SegmentUpdate;
