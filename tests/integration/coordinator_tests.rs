//! Coordinator integration tests.
//!
//! Tests verify:
//! - Misses serve decoded pixels and persist the full band
//! - Hits read regions from disk without decoding
//! - Region clipping and zero fill
//! - Error handling (failed decode, missing band, negative region, corrupt file)

use tile_decode_cache::cache::codec;
use tile_decode_cache::{PixelType, Roi, TileError, TileRequest, TypedBuffer};

use super::test_utils::{create_coordinator, window, MockEngine};

// =============================================================================
// Miss and Hit
// =============================================================================

#[tokio::test]
async fn test_miss_serves_roi_and_persists_full_band() {
    let engine = MockEngine::new(16, 8);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let request = TileRequest::new("/data/scene_B04.jp2", PixelType::Int32)
        .with_roi(Roi::new(4, 2, 3, 2));
    let response = coordinator.read(&request).await.unwrap();

    assert!(!response.cache_hit);
    assert_eq!((response.raster.width, response.raster.height), (3, 2));
    let full = engine.expected(0, 0);
    assert_eq!(
        response.raster.data,
        TypedBuffer::I32(window(&full, 16, 4, 2, 3, 2))
    );

    // AwaitDurable: the full band is on disk when the read returns
    let persisted = codec::read_full(&response.path, PixelType::Int32).unwrap();
    assert_eq!((persisted.width, persisted.height), (16, 8));
    assert_eq!(persisted.data, TypedBuffer::I32(full));
}

#[tokio::test]
async fn test_hit_reads_other_regions_without_decoding() {
    let engine = MockEngine::new(16, 8);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);
    let full = engine.expected(0, 0);

    let first = TileRequest::new("scene.jp2", PixelType::Int32).with_roi(Roi::new(0, 0, 2, 2));
    coordinator.read(&first).await.unwrap();

    let second = TileRequest::new("scene.jp2", PixelType::Int32).with_roi(Roi::new(10, 5, 4, 3));
    let response = coordinator.read(&second).await.unwrap();
    assert!(response.cache_hit);
    assert_eq!(
        response.raster.data,
        TypedBuffer::I32(window(&full, 16, 10, 5, 4, 3))
    );

    let whole = TileRequest::new("scene.jp2", PixelType::Int32);
    let response = coordinator.read(&whole).await.unwrap();
    assert!(response.cache_hit);
    assert_eq!(response.raster.data, TypedBuffer::I32(full));

    assert_eq!(engine.call_count(), 1);
    let stats = coordinator.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn test_same_file_name_shares_cache_entry() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let a = TileRequest::new("/mnt/a/scene.jp2", PixelType::UInt16);
    let b = TileRequest::new("/mnt/b/scene.jp2", PixelType::UInt16);
    assert_eq!(coordinator.path_for(&a), coordinator.path_for(&b));

    coordinator.read(&a).await.unwrap();
    let response = coordinator.read(&b).await.unwrap();
    assert!(response.cache_hit);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn test_keys_separate_band_resolution_and_tile() {
    let engine = MockEngine::new(8, 8).with_bands(2);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let base = TileRequest::new("scene.jp2", PixelType::Int32);
    let requests = [
        base.clone(),
        base.clone().with_band(1),
        base.clone().with_resolution(1),
        base.clone().with_tile(3),
    ];

    for request in &requests {
        let response = coordinator.read(request).await.unwrap();
        assert!(!response.cache_hit);
    }
    assert_eq!(engine.call_count(), 4);
    assert_eq!(engine.tile_requests(), vec![None, None, None, Some(3)]);

    let band1 = coordinator.read(&requests[1]).await.unwrap();
    assert!(band1.cache_hit);
    assert_eq!(band1.raster.data, TypedBuffer::I32(engine.expected(1, 0)));

    let reduced = coordinator.read(&requests[2]).await.unwrap();
    assert!(reduced.cache_hit);
    assert_eq!((reduced.raster.width, reduced.raster.height), (4, 4));
}

#[tokio::test]
async fn test_max_tile_index_not_served_whole_image_entry() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let whole = TileRequest::new("scene.jp2", PixelType::Int32);
    let last_tile = whole.clone().with_tile(u32::MAX);
    assert_ne!(coordinator.path_for(&whole), coordinator.path_for(&last_tile));

    coordinator.read(&whole).await.unwrap();
    let response = coordinator.read(&last_tile).await.unwrap();
    assert!(!response.cache_hit);
    assert_eq!(engine.tile_requests(), vec![None, Some(u32::MAX)]);
}

#[tokio::test]
async fn test_layer_does_not_change_cache_entry() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Byte).with_layer(2);
    coordinator.read(&request).await.unwrap();

    let response = coordinator.read(&request.clone().with_layer(0)).await.unwrap();
    assert!(response.cache_hit);
    assert_eq!(engine.call_count(), 1);
}

// =============================================================================
// Region Handling
// =============================================================================

#[tokio::test]
async fn test_roi_outside_image_is_zero_filled() {
    let engine = MockEngine::new(8, 8);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let request =
        TileRequest::new("scene.jp2", PixelType::UInt16).with_roi(Roi::new(20, 20, 3, 3));

    let miss = coordinator.read(&request).await.unwrap();
    assert_eq!(miss.raster.data, TypedBuffer::U16(vec![0; 9]));

    let hit = coordinator.read(&request).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(hit.raster.data, TypedBuffer::U16(vec![0; 9]));
}

#[tokio::test]
async fn test_partial_overlap_matches_on_miss_and_hit() {
    let engine = MockEngine::new(8, 8);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Int32).with_roi(Roi::new(6, -1, 4, 3));

    let miss = coordinator.read(&request).await.unwrap();
    let hit = coordinator.read(&request).await.unwrap();
    assert!(!miss.cache_hit);
    assert!(hit.cache_hit);
    assert_eq!(miss.raster, hit.raster);

    // Row -1 is outside; rows 0 and 1 hold columns 6 and 7
    assert_eq!(
        miss.raster.data,
        TypedBuffer::I32(vec![0, 0, 0, 0, 6, 7, 0, 0, 14, 15, 0, 0])
    );
}

#[tokio::test]
async fn test_empty_roi() {
    let engine = MockEngine::new(8, 8);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Int16).with_roi(Roi::new(2, 2, 0, 5));
    let response = coordinator.read(&request).await.unwrap();
    assert!(response.raster.data.is_empty());
}

#[tokio::test]
async fn test_negative_roi_rejected() {
    let engine = MockEngine::new(8, 8);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Int16).with_roi(Roi::new(0, 0, -1, 4));
    let err = coordinator.read(&request).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_pixel_type_narrowing_on_both_paths() {
    let engine = MockEngine::new(20, 20);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    // Pixel (0, 15) holds 300, which narrows to 44 as a byte
    let request = TileRequest::new("scene.jp2", PixelType::Byte).with_roi(Roi::new(0, 15, 1, 1));
    let miss = coordinator.read(&request).await.unwrap();
    let hit = coordinator.read(&request).await.unwrap();
    assert_eq!(miss.raster.data, TypedBuffer::U8(vec![44]));
    assert_eq!(hit.raster.data, TypedBuffer::U8(vec![44]));
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_failed_decode_writes_nothing() {
    let engine = MockEngine::new(8, 8).failing();
    let (dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let request = TileRequest::new("broken.jp2", PixelType::Int32);
    let err = coordinator.read(&request).await.unwrap_err();
    match err {
        TileError::DecodeFailed { source_file, .. } => {
            assert_eq!(source_file, std::path::PathBuf::from("broken.jp2"));
        }
        other => panic!("Expected DecodeFailed, got {:?}", other),
    }

    coordinator.shutdown().await;
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(coordinator.pending_writes().is_empty());

    // The failure is not cached; the next read decodes again
    let _ = coordinator.read(&request).await;
    assert_eq!(engine.call_count(), 2);
}

#[tokio::test]
async fn test_band_out_of_range() {
    let engine = MockEngine::new(4, 4).with_bands(3);
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Int32).with_band(3);
    let err = coordinator.read(&request).await.unwrap_err();
    assert!(matches!(
        err,
        TileError::BandOutOfRange {
            band: 3,
            band_count: 3
        }
    ));
    assert!(!coordinator.path_for(&request).exists());
}

#[tokio::test]
async fn test_corrupt_file_is_replaced() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::Int32);
    let path = coordinator.path_for(&request);
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let response = coordinator.read(&request).await.unwrap();
    assert!(!response.cache_hit);
    assert_eq!(response.raster.data, TypedBuffer::I32(engine.expected(0, 0)));
    assert_eq!(coordinator.stats().corrupt_recovered, 1);

    let persisted = codec::read_full(&path, PixelType::Int32).unwrap();
    assert_eq!(persisted.data, TypedBuffer::I32(engine.expected(0, 0)));
}

#[tokio::test]
async fn test_truncated_body_is_replaced() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let request = TileRequest::new("scene.jp2", PixelType::UInt16);
    let path = coordinator.path_for(&request);
    let mut bytes = codec::encode(4, 4, &engine.expected(0, 0), PixelType::UInt16).to_vec();
    bytes.truncate(bytes.len() - 5);
    std::fs::write(&path, &bytes).unwrap();

    let response = coordinator.read(&request).await.unwrap();
    assert!(!response.cache_hit);
    assert_eq!(engine.call_count(), 1);
    assert!(codec::read_full(&path, PixelType::UInt16).is_ok());
}

#[tokio::test]
async fn test_corrupt_file_surfaced_without_recovery() {
    let engine = MockEngine::new(4, 4);
    let (_dir, coordinator) = create_coordinator(engine.clone(), |c| c.with_recover_corrupt(false));

    let request = TileRequest::new("scene.jp2", PixelType::Int32);
    std::fs::write(coordinator.path_for(&request), [9u8; 4]).unwrap();

    let err = coordinator.read(&request).await.unwrap_err();
    assert!(err.is_corrupt_cache());
    assert_eq!(engine.call_count(), 0);
}

// =============================================================================
// Source Description
// =============================================================================

#[tokio::test]
async fn test_describe_reports_geometry_without_caching() {
    let engine = MockEngine::new(16, 8).with_bands(3);
    let (dir, coordinator) = create_coordinator(engine.clone(), |c| c);

    let info = coordinator
        .describe(std::path::Path::new("scene.jp2"), 1)
        .await
        .unwrap();
    assert_eq!((info.band_count, info.width, info.height), (3, 8, 4));

    assert_eq!(engine.call_count(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_describe_failure_is_decode_failed() {
    let engine = MockEngine::new(4, 4).failing();
    let (_dir, coordinator) = create_coordinator(engine, |c| c);

    let err = coordinator
        .describe(std::path::Path::new("broken.jp2"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, TileError::DecodeFailed { .. }));
}
