//! Tile Decode Cache - command-line front end.
//!
//! Reads tiles through the cache, inspects cache files and manages cache
//! directories.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_decode_cache::{
    cache::codec,
    config::{CacheDirArgs, Cli, Command, InspectArgs, KeyArgs, ReadArgs},
    key_to_path, purge_dir, PixelType,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Read(args) => run_read(args).await,
        Command::Inspect(args) => run_inspect(args),
        Command::Key(args) => run_key(args),
        Command::Purge(args) => run_purge(args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_decode_cache=debug"
    } else {
        "tile_decode_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print a serializable value as pretty JSON.
fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Read Command
// =============================================================================

#[cfg(feature = "openjpeg")]
async fn run_read(args: ReadArgs) -> ExitCode {
    use tile_decode_cache::{OpenJpegEngine, TileCacheCoordinator, TileRequest};

    let config = args.cache_config();
    let coordinator = match TileCacheCoordinator::new(OpenJpegEngine::new(), config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pixel_type = PixelType::from(args.pixel_type);
    let mut request = TileRequest::new(&args.tile.source, pixel_type)
        .with_band(args.tile.band)
        .with_resolution(args.tile.resolution)
        .with_layer(args.layer);
    if let Some(tile) = args.tile.tile {
        request = request.with_tile(tile);
    }
    if let Some(roi) = args.roi {
        request = request.with_roi(roi);
    }

    let result = coordinator.read(&request).await;
    coordinator.shutdown().await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            error!("Read failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref output) = args.output {
        if let Err(e) = tokio::fs::write(output, response.raster.data.to_le_bytes()).await {
            error!("Failed to write {}: {}", output.display(), e);
            return ExitCode::FAILURE;
        }
        info!("Wrote {} pixel(s) to {}", response.raster.data.len(), output.display());
    }

    if args.json {
        return print_json(&serde_json::json!({
            "cache_file": response.path,
            "cache_hit": response.cache_hit,
            "width": response.raster.width,
            "height": response.raster.height,
            "pixel_type": response.raster.pixel_type(),
            "stats": coordinator.stats(),
        }));
    }

    println!(
        "{}x{} {} ({})",
        response.raster.width,
        response.raster.height,
        response.raster.pixel_type(),
        if response.cache_hit { "cache hit" } else { "decoded" }
    );
    println!("cache file: {}", response.path.display());

    ExitCode::SUCCESS
}

#[cfg(not(feature = "openjpeg"))]
async fn run_read(_args: ReadArgs) -> ExitCode {
    error!("This build has no decode engine; rebuild with the `openjpeg` feature");
    ExitCode::FAILURE
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(args: InspectArgs) -> ExitCode {
    let header = match codec::read_header(&args.path) {
        Ok(header) => header,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let pixel_type = match args.pixel_type.map(PixelType::from) {
        Some(pixel_type) => Some(pixel_type),
        None => header
            .inferred_element_width()
            .and_then(|width| PixelType::ALL.into_iter().find(|pt| pt.element_width() == width)),
    };
    let complete = pixel_type.map(|pt| header.is_complete_for(pt));

    // Values are only decoded when the caller names the type
    let value_range = match args.pixel_type.map(PixelType::from) {
        Some(pt) if header.is_complete_for(pt) => match codec::read_full(&args.path, pt) {
            Ok(raster) => raster.data.value_range(),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        _ => None,
    };

    if args.json {
        return print_json(&serde_json::json!({
            "path": args.path,
            "header": header,
            "pixel_type": pixel_type,
            "complete": complete,
            "value_range": value_range,
        }));
    }

    println!("Cache file: {}", args.path.display());
    println!("  Dimensions: {}x{}", header.width, header.height);
    println!("  File size:  {} bytes", header.file_len);
    match pixel_type {
        Some(pt) => println!("  Pixel type: {} ({} byte(s) per pixel)", pt, pt.element_width()),
        None => println!("  Pixel type: unknown (body length does not match any element width)"),
    }
    if let Some((min, max)) = value_range {
        println!("  Values:     {} to {}", min, max);
    }

    if let Some(reason) = pixel_type.and_then(|pt| header.body_mismatch(pt)) {
        println!("  Warning: {}", reason);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Key Command
// =============================================================================

fn run_key(args: KeyArgs) -> ExitCode {
    let path = key_to_path(
        &args.cache.cache_dir,
        &args.tile.source,
        args.tile.tile,
        args.tile.resolution,
        args.tile.band,
    );
    println!("{}", path.display());
    ExitCode::SUCCESS
}

// =============================================================================
// Purge Command
// =============================================================================

async fn run_purge(args: CacheDirArgs) -> ExitCode {
    match purge_dir(&args.cache_dir).await {
        Ok(removed) => {
            println!(
                "Removed {} cache file(s) from {}",
                removed,
                args.cache_dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Purge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
