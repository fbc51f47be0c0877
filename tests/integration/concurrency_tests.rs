//! Concurrency integration tests.
//!
//! Tests verify:
//! - Readers wait for an in-flight write and then hit the cache
//! - Concurrent misses for one tile decode once (single-flight)
//! - Without single-flight every reader still gets correct pixels
//! - A stuck write is bounded by the wait timeout

use std::sync::Arc;
use std::time::Duration;

use tile_decode_cache::cache::codec;
use tile_decode_cache::{PixelType, Roi, TileRequest, TypedBuffer};

use super::test_utils::{create_coordinator, window, MockEngine};

// =============================================================================
// Pending Writes
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_waits_for_in_flight_write() {
    let engine = MockEngine::new(8, 8);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);
    let coordinator = Arc::new(coordinator);

    let request = TileRequest::new("scene.jp2", PixelType::Int32).with_roi(Roi::new(2, 2, 2, 2));
    let path = coordinator.path_for(&request);

    // Simulate a write that has been scheduled but not finished
    let guard = coordinator.pending_writes().begin_write(&path);

    let reader = {
        let coordinator = Arc::clone(&coordinator);
        let request = request.clone();
        tokio::spawn(async move { coordinator.read(&request).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished(), "reader must block while the write is pending");

    codec::write(&path, 8, 8, &engine.expected(0, 0), PixelType::Int32).unwrap();
    guard.release();

    let response = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader should finish once the write is released")
        .unwrap()
        .unwrap();

    assert!(response.cache_hit);
    assert_eq!(
        response.raster.data,
        TypedBuffer::I32(window(&engine.expected(0, 0), 8, 2, 2, 2, 2))
    );
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stuck_write_bounded_by_timeout() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| {
        c.with_write_wait_timeout(Some(Duration::from_millis(100)))
    });

    let request = TileRequest::new("scene.jp2", PixelType::Int32);
    let path = coordinator.path_for(&request);
    let _stuck = coordinator.pending_writes().begin_write(&path);

    let response = coordinator.read(&request).await.unwrap();

    assert!(!response.cache_hit);
    assert_eq!(response.raster.data, TypedBuffer::I32(engine.expected(0, 0)));
    assert_eq!(engine.call_count(), 1);
    assert!(coordinator.stats().wait_timeouts >= 1);
    // The stuck writer owns the path; nothing else is written there
    assert!(!path.exists());
}

// =============================================================================
// Single-Flight Decoding
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_decode_once() {
    let engine = MockEngine::new(32, 32).with_delay(Duration::from_millis(50));
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);
    let coordinator = Arc::new(coordinator);
    let full = engine.expected(0, 0);

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        let request = TileRequest::new("scene.jp2", PixelType::Int32)
            .with_roi(Roi::new(i * 4, i * 2, 4, 4));
        handles.push(tokio::spawn(async move {
            (i, coordinator.read(&request).await)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        let response = result.unwrap();
        let (x, y) = (i as u32 * 4, i as u32 * 2);
        assert_eq!(
            response.raster.data,
            TypedBuffer::I32(window(&full, 32, x, y, 4, 4)),
            "reader {} got wrong pixels",
            i
        );
    }

    assert_eq!(engine.call_count(), 1);
    let stats = coordinator.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
    assert_eq!(stats.writes_completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_without_single_flight() {
    let engine = MockEngine::new(16, 16).with_delay(Duration::from_millis(20));
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c.with_single_flight(false));
    let coordinator = Arc::new(coordinator);
    let full = engine.expected(0, 0);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let request = TileRequest::new("scene.jp2", PixelType::Int32);
                coordinator.read(&request).await
            })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.raster.data, TypedBuffer::I32(full.clone()));
    }

    assert!(engine.call_count() >= 1);
    let request = TileRequest::new("scene.jp2", PixelType::Int32);
    let persisted = codec::read_full(&coordinator.path_for(&request), PixelType::Int32).unwrap();
    assert_eq!(persisted.data, TypedBuffer::I32(full));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_across_tiles() {
    let engine = MockEngine::new(8, 8)
        .with_bands(4)
        .with_delay(Duration::from_millis(10));
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c.with_write_workers(2));
    let coordinator = Arc::new(coordinator);

    let handles: Vec<_> = (0..16u32)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let band = i % 4;
                let request = TileRequest::new("scene.jp2", PixelType::Int32).with_band(band);
                (band, coordinator.read(&request).await)
            })
        })
        .collect();

    for handle in handles {
        let (band, result) = handle.await.unwrap();
        let response = result.unwrap();
        assert_eq!(response.raster.data, TypedBuffer::I32(engine.expected(band, 0)));
    }

    let stats = coordinator.stats();
    assert_eq!(stats.hits + stats.misses, 16);
    assert!(coordinator.pending_writes().is_empty());
}
