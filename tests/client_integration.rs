//! End-to-end tests for the key generation client
//!
//! These drive the full stack: client initialization, background pool
//! maintenance, key derivation, secret rotation, wipe, and persistence
//! across a simulated process restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tempfile::TempDir;

use randpool::prelude::*;
use randpool::{EntropySource, SourceFactory, SymmetricKeyData};

const SECRET: &[u8] = b"integration-device-secret";

/// Deterministic byte stream shared across client instances so consumed
/// ranges can be checked against the stream itself.
#[derive(Default)]
struct CounterSource {
    next: AtomicU64,
}

impl EntropySource for CounterSource {
    fn fetch(&self, n_bytes: usize) -> CacheResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n_bytes);
        while out.len() < n_bytes {
            let value = self.next.fetch_add(1, Ordering::SeqCst);
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.truncate(n_bytes);
        Ok(out)
    }

    fn name(&self) -> &str {
        "counter"
    }
}

fn counter_factory(source: Arc<CounterSource>) -> SourceFactory {
    Box::new(move |_token| Ok(Arc::clone(&source) as Arc<dyn EntropySource>))
}

fn counter_client(source: Arc<CounterSource>) -> LocalKeyClient {
    LocalKeyClient::create_with(
        counter_factory(source),
        Arc::new(randpool::DefaultKeyPairProvider),
    )
}

fn config(dir: &TempDir, max: u64, min: u64) -> CacheConfig {
    CacheConfig {
        device_secret: SECRET.to_vec(),
        locations: vec![
            LocationConfig::new("a", dir.path().join("a"), max),
            LocationConfig::new("b", dir.path().join("b"), max),
        ],
        max_cached_bytes: max,
        min_cached_bytes: min,
        maintenance_interval: Duration::from_millis(10),
        segment_ttl: None,
    }
}

fn wait_ready(client: &LocalKeyClient) {
    for _ in 0..1000 {
        if client.check_cache_status().unwrap().state == CacheState::Ready {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("cache never reached ready");
}

#[test]
fn test_initialize_fill_and_generate() {
    let dir = TempDir::new().unwrap();
    let client = LocalKeyClient::create();
    client.initialize_async("token", config(&dir, 8192, 1024)).unwrap();
    wait_ready(&client);

    let status = client.check_cache_status().unwrap();
    assert!(status.remaining_capacity >= 1024);
    assert!(status.total_downloaded_random >= status.remaining_capacity);

    let aes = client.gen_symmetric_key(SymmetricKeyMode::Aes256).unwrap();
    assert_eq!(aes.key.len(), 32);

    let pair = client.gen_asymmetric_keys(AsymmetricKeyMode::Ecdh).unwrap();
    assert_eq!(pair.private_key.len(), 32);
    assert_eq!(pair.public_key.len(), 32);

    client.shutdown().unwrap();
}

#[test]
fn test_otp_keys_reassemble_source_stream() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(CounterSource::default());
    let client = counter_client(Arc::clone(&source));
    client.initialize_async("token", config(&dir, 2048, 2048)).unwrap();
    wait_ready(&client);
    // Freeze the pool so refills cannot interleave new stream bytes.
    client.shutdown().unwrap();

    let client = counter_client(Arc::clone(&source));
    client.initialize_async("token", config(&dir, 2048, 2048)).unwrap();
    wait_ready(&client);

    // Consecutive OTP keys are consecutive, non-overlapping stream ranges.
    let first = client
        .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 256)
        .unwrap();
    let second = client
        .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 256)
        .unwrap();

    let replay = CounterSource::default();
    let stream = replay.fetch(512).unwrap();
    assert_eq!(first.key, stream[..256]);
    assert_eq!(second.key, stream[256..]);

    client.shutdown().unwrap();
}

#[test]
fn test_consumption_survives_restart() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(CounterSource::default());

    let consumed_before;
    {
        let client = counter_client(Arc::clone(&source));
        client.initialize_async("token", config(&dir, 2048, 512)).unwrap();
        wait_ready(&client);
        consumed_before = client
            .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 128)
            .unwrap();
        client.shutdown().unwrap();
    }

    // A new client over the same directories resumes the sealed pool and
    // must not hand the same range out again.
    let client = counter_client(Arc::clone(&source));
    client.initialize_async("token", config(&dir, 2048, 512)).unwrap();
    wait_ready(&client);

    let consumed_after = client
        .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 128)
        .unwrap();
    assert_ne!(consumed_before.key, consumed_after.key);

    let replay = CounterSource::default();
    let stream = replay.fetch(256).unwrap();
    assert_eq!(consumed_before.key, stream[..128]);
    assert_eq!(consumed_after.key, stream[128..]);

    client.shutdown().unwrap();
}

#[test]
fn test_wipe_resets_and_refills() {
    let dir = TempDir::new().unwrap();
    let client = LocalKeyClient::create();
    client.initialize_async("token", config(&dir, 4096, 512)).unwrap();
    wait_ready(&client);

    client.wipe().unwrap();
    let status = client.check_cache_status().unwrap();
    assert_eq!(status.state, CacheState::Downloading);
    assert_eq!(status.remaining_capacity, 0);

    // The scheduler keeps ticking, so the pool comes back on its own.
    wait_ready(&client);
    assert!(client.gen_symmetric_key(SymmetricKeyMode::Aes256).is_ok());

    client.shutdown().unwrap();
}

#[test]
fn test_secret_rotation_preserves_pool() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(CounterSource::default());
    let client = counter_client(Arc::clone(&source));
    client.initialize_async("token", config(&dir, 2048, 2048)).unwrap();
    wait_ready(&client);

    let remaining = client.check_cache_status().unwrap().remaining_capacity;
    client.update_device_secret(SECRET, b"rotated-secret").unwrap();
    assert_eq!(
        client.check_cache_status().unwrap().remaining_capacity,
        remaining
    );
    client.shutdown().unwrap();

    // The old secret no longer opens the pool.
    let client = counter_client(Arc::clone(&source));
    let err = client
        .initialize_async("token", config(&dir, 2048, 2048))
        .unwrap_err();
    assert!(matches!(err, CacheError::DeviceSecretFailed(_)));

    // The new secret resumes it with the same unconsumed bytes.
    let mut rotated = config(&dir, 2048, 2048);
    rotated.device_secret = b"rotated-secret".to_vec();
    let client = counter_client(Arc::clone(&source));
    client.initialize_async("token", rotated).unwrap();
    wait_ready(&client);

    let key = client
        .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 64)
        .unwrap();
    let replay = CounterSource::default();
    assert_eq!(key.key, replay.fetch(64).unwrap());

    client.shutdown().unwrap();
}

#[test]
fn test_rotation_with_wrong_old_secret_rejected() {
    let dir = TempDir::new().unwrap();
    let client = LocalKeyClient::create();
    client.initialize_async("token", config(&dir, 2048, 512)).unwrap();
    wait_ready(&client);

    let err = client
        .update_device_secret(b"wrong-secret", b"new-secret")
        .unwrap_err();
    assert!(matches!(err, CacheError::DeviceSecretFailed(_)));

    // The pool is still usable under the original secret.
    assert!(client.gen_symmetric_key(SymmetricKeyMode::Aes256).is_ok());
    client.shutdown().unwrap();
}

#[test]
fn test_concurrent_generation_yields_disjoint_keys() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(CounterSource::default());
    let client = Arc::new(counter_client(Arc::clone(&source)));
    client.initialize_async("token", config(&dir, 16384, 16384)).unwrap();
    wait_ready(&client);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || {
                (0..4)
                    .map(|_| {
                        client
                            .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, 64)
                            .unwrap()
                    })
                    .collect::<Vec<SymmetricKeyData>>()
            })
        })
        .collect();

    let mut keys: Vec<Vec<u8>> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .map(|k| k.key.clone())
        .collect();

    // Each 64-byte key is an aligned slice of the counter stream, so the
    // leading u64 orders the slices; reassembly proves global disjointness.
    keys.sort_by_key(|k| u64::from_le_bytes(k[..8].try_into().unwrap()));
    let reassembled: Vec<u8> = keys.concat();

    let replay = CounterSource::default();
    let stream = replay.fetch(8 * 4 * 64).unwrap();
    assert_eq!(reassembled, stream);

    client.shutdown().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any sequence of OTP sizes drains the stream in order with no gaps
    /// and no reuse.
    #[test]
    fn prop_otp_sequence_is_prefix_of_stream(sizes in prop::collection::vec(8u64..200, 1..8)) {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(CounterSource::default());
        let client = counter_client(Arc::clone(&source));
        client.initialize_async("token", config(&dir, 4096, 4096)).unwrap();
        wait_ready(&client);

        let mut collected = Vec::new();
        for size in &sizes {
            let key = client
                .gen_symmetric_key_with_size(SymmetricKeyMode::Otp, *size)
                .unwrap();
            collected.extend_from_slice(&key.key);
        }

        let replay = CounterSource::default();
        let stream = replay.fetch(collected.len()).unwrap();
        prop_assert_eq!(collected, stream);

        client.shutdown().unwrap();
    }
}
