// src/main.rs v5
//! FieldTrip Cache - save map tiles for offline use from the command line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fieldtrip_cache::{
    cache::{CacheController, CanvasPersistence, FileStore, FileTransferPersistence, HttpTileFetcher, TilePersistence},
    config::{CacheConfig, PersistenceKind},
    display::TerminalDisplay,
    map::{StaticMapView, TileServiceCapabilities},
    tiles::{GeographicExtent, LonLat},
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, ValueEnum)]
enum PersistenceArg {
    /// Re-encode tiles in memory (lost on exit)
    Canvas,
    /// Write tiles to the cache directory
    FileTransfer,
}

impl From<PersistenceArg> for PersistenceKind {
    fn from(arg: PersistenceArg) -> Self {
        match arg {
            PersistenceArg::Canvas => PersistenceKind::Canvas,
            PersistenceArg::FileTransfer => PersistenceKind::FileTransfer,
        }
    }
}

#[derive(Parser)]
#[command(name = "fieldtrip-cache")]
#[command(about = "Save map tiles for offline use", long_about = None)]
struct Args {
    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tile server, e.g. http://fieldtripgb.edina.ac.uk
    #[arg(long, global = true)]
    server: Option<String>,

    /// Tile layer name
    #[arg(long, global = true)]
    layer: Option<String>,

    /// Where downloaded tiles are stored
    #[arg(long, value_enum, global = true)]
    persistence: Option<PersistenceArg>,

    /// Concurrent tile downloads
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Write the effective settings back to the config file
    #[arg(long, global = true)]
    save_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate tiles and download size for an extent
    Estimate {
        /// Extent as left,bottom,right,top
        #[arg(long, allow_hyphen_values = true)]
        extent: String,
        #[arg(long, default_value = "0")]
        zoom_min: u8,
        #[arg(long, default_value = "10")]
        zoom_max: u8,
    },
    /// Download and save the tiles covering an extent
    Save {
        name: String,
        /// Extent as left,bottom,right,top
        #[arg(long, allow_hyphen_values = true)]
        extent: String,
        #[arg(long, default_value = "0")]
        zoom_min: u8,
        #[arg(long, default_value = "10")]
        zoom_max: u8,
        /// Map centre as lon,lat (default: centre of the extent)
        #[arg(long, allow_hyphen_values = true)]
        centre: Option<String>,
        /// Zoom level recorded with the saved map
        #[arg(long)]
        zoom: Option<u8>,
    },
    /// List saved maps
    List,
    /// Show one saved map
    Show { name: String },
    /// Rename a saved map
    Rename { old_name: String, new_name: String },
    /// Delete a saved map and its tiles
    Delete { name: String },
    /// Delete every saved map and all cached tiles
    Clear,
    /// Fetch and print the tile service capabilities
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let display = TerminalDisplay::new();
    let mut stdout = io::stdout();

    match args.command {
        Command::Estimate { extent, zoom_min, zoom_max } => {
            let extent: GeographicExtent = extent.parse()?;
            let caps = load_capabilities(&config).await?;
            let cache = build_controller(&config, caps, Some(extent), None, None)?;
            display.render_save_stats(&mut stdout, &cache.save_stats(zoom_min, zoom_max))?;
        }
        Command::Save {
            name,
            extent,
            zoom_min,
            zoom_max,
            centre,
            zoom,
        } => {
            if !config.persistence.is_durable() {
                bail!(
                    "{} persistence keeps tiles in memory only; use --persistence file-transfer to save maps",
                    config.persistence
                );
            }
            let extent: GeographicExtent = extent.parse()?;
            let centre = centre.map(|c| c.parse::<LonLat>()).transpose()?;
            let caps = load_capabilities(&config).await?;
            let cache = build_controller(&config, caps, Some(extent), centre, zoom)?;

            let stats = cache.save_stats(zoom_min, zoom_max);
            display.render_save_stats(&mut stdout, &stats)?;

            let handle = cache
                .save_map(&name, zoom_min, zoom_max)
                .with_context(|| format!("Can't save {}", name))?;
            display.run_progress(&handle).await?;

            let report = handle.wait().await?;
            display.render_report(&mut stdout, &report)?;
        }
        Command::List => {
            let cache = offline_controller(&config)?;
            display.render_saved_maps(&mut stdout, &cache.get_saved_maps())?;
        }
        Command::Show { name } => {
            let cache = offline_controller(&config)?;
            match cache.get_saved_map_details(&name) {
                Some(entry) => display.render_map_details(&mut stdout, &name, &entry)?,
                None => bail!("No saved map called {}", name),
            }
        }
        Command::Rename { old_name, new_name } => {
            let cache = offline_controller(&config)?;
            if !cache.rename_saved_map(&old_name, &new_name) {
                bail!("Can't rename {} to {}", old_name, new_name);
            }
            println!("Renamed {} to {}", old_name, new_name);
        }
        Command::Delete { name } => {
            let cache = offline_controller(&config)?;
            cache.delete_saved_map_details(&name).await?;
            println!("Deleted {}", name);
        }
        Command::Clear => {
            let cache = offline_controller(&config)?;
            cache.clear_cache().await?;
            println!("Cache cleared");
        }
        Command::Capabilities => {
            let caps = load_capabilities(&config).await?;
            println!("Stack: {}", caps.stack);
            println!("Tile size: {}x{}", caps.tile_width_px, caps.tile_height_px);
            for (zoom, upp) in &caps.units_per_pixel_by_zoom {
                println!("  zoom {:>2}: {} units/pixel", zoom, upp);
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => CacheConfig::get_config_path()?,
    };
    let mut config = CacheConfig::load_from(&path)?;

    if let Some(server) = &args.server {
        config.update_server(server.clone(), args.layer.clone());
    } else if let Some(layer) = &args.layer {
        config.layer_name = layer.clone();
    }
    if let Some(persistence) = &args.persistence {
        config.update_persistence(persistence.clone().into());
    }
    if let Some(threads) = args.threads {
        config.download_threads = threads;
    }
    config.validate()?;

    if args.save_config {
        config.save_to(&path)?;
        log::info!("Saved settings to {}", path.display());
    }
    Ok(config)
}

async fn load_capabilities(config: &CacheConfig) -> Result<TileServiceCapabilities> {
    let fetcher = HttpTileFetcher::new(Duration::from_secs(config.capabilities_timeout_secs))?;
    Ok(TileServiceCapabilities::fetch_or_default(
        fetcher.client(),
        &config.base_map_full_url(),
        config.stack,
        Duration::from_secs(config.capabilities_timeout_secs),
    )
    .await)
}

fn build_persistence(config: &CacheConfig, caps: &TileServiceCapabilities) -> Result<Arc<dyn TilePersistence>> {
    Ok(match config.persistence {
        PersistenceKind::Canvas => Arc::new(CanvasPersistence::new(caps.tile_width_px, caps.tile_height_px)),
        PersistenceKind::FileTransfer => Arc::new(FileTransferPersistence::new(config.cache_dir())?),
    })
}

fn build_controller(
    config: &CacheConfig,
    caps: TileServiceCapabilities,
    extent: Option<GeographicExtent>,
    centre: Option<LonLat>,
    zoom: Option<u8>,
) -> Result<CacheController> {
    let persistence = build_persistence(config, &caps)?;

    let mut view = StaticMapView::new(caps, config.base_map_full_url(), config.file_type.clone());
    if let Some(extent) = extent {
        view = view.with_extent(extent);
    }
    if let Some(centre) = centre {
        view = view.with_centre(centre);
    }
    if let Some(zoom) = zoom {
        view = view.with_zoom(zoom);
    }

    let mut fetcher = HttpTileFetcher::new(Duration::from_secs(config.tile_timeout_secs))?;
    if let Some(user_id) = &config.user_id {
        fetcher = fetcher.with_logging_params(&config.app_version, user_id);
    }

    let store = FileStore::open(config.store_path())?;

    Ok(CacheController::new(Arc::new(view), Arc::new(store), persistence, Arc::new(fetcher))
        .with_download_threads(config.download_threads))
}

/// Controller for catalog commands that never touch the network.
fn offline_controller(config: &CacheConfig) -> Result<CacheController> {
    build_controller(config, TileServiceCapabilities::defaults(config.stack), None, None, None)
}
