//! # Streaming Demo
//!
//! Runs a headless frame loop that streams generated resources through the
//! resource manager:
//! - textures fall back to a placeholder while they load
//! - materials are updated on the main thread
//! - every few frames part of the source data changes and is hot-reloaded
//!
//! With `--asset-dir` the default loader reads files from that directory and
//! changed files are reloaded as they are saved.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use redlilium_core::profiling::{frame_mark, profile_scope, set_thread_name};
use redlilium_resources::{
    AcquireMode, AcquireResult, CreateResource, MemoryResourceLoader, MemoryUsage, Resource,
    ResourceHandle, ResourceLoadDesc, ResourceManager, ResourceManagerConfig, ResourceState,
    ResourceWatcher, Unload,
};
use redlilium_tasks::{Scheduler, SchedulerConfig};
use serde::Deserialize;

/// Streams generated resources through a frame loop.
#[derive(Parser, Debug)]
#[command(name = "streaming_demo", version)]
struct Args {
    /// TOML file with `[scheduler]` and `[resources]` tables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames to run.
    #[arg(long, default_value = "240")]
    frames: u64,

    /// Generated textures.
    #[arg(long, default_value = "400")]
    textures: usize,

    /// Textures acquired per frame.
    #[arg(long, default_value = "48")]
    visible: usize,

    /// Change part of the source data every N frames (0 disables).
    #[arg(long, default_value = "60")]
    reload_every: u64,

    /// Simulated frame time in milliseconds.
    #[arg(long, default_value = "8")]
    frame_ms: u64,

    /// Overrides `[scheduler] file_access_workers`.
    #[arg(long)]
    file_workers: Option<usize>,

    /// Overrides `[scheduler] short_task_workers`.
    #[arg(long)]
    short_workers: Option<usize>,

    /// Load from this directory instead of generated data, and watch it.
    #[arg(long)]
    asset_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    scheduler: SchedulerConfig,
    resources: ResourceManagerConfig,
}

// ---------------------------------------------------------------------------
// Resource types
// ---------------------------------------------------------------------------

const TEXTURE_MAGIC: &[u8] = b"TEX0";

/// Raw texel data behind a four byte header.
#[derive(Default)]
struct Texture {
    texels: Vec<u8>,
    checksum: u32,
}

impl Resource for Texture {
    fn create(_id: &str) -> Self {
        Texture::default()
    }

    fn update_content(&mut self, data: &[u8]) -> ResourceLoadDesc {
        let Some(texels) = data.strip_prefix(TEXTURE_MAGIC) else {
            return ResourceLoadDesc::missing();
        };
        self.texels = texels.to_vec();
        self.checksum = texels
            .iter()
            .fold(0u32, |sum, &b| sum.rotate_left(5) ^ u32::from(b));
        ResourceLoadDesc::loaded()
    }

    fn unload_data(&mut self, _what: Unload) -> ResourceLoadDesc {
        self.texels = Vec::new();
        self.checksum = 0;
        ResourceLoadDesc::unloaded()
    }

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            cpu: 0,
            gpu: self.texels.len() as u64,
        }
    }
}

impl CreateResource for Texture {
    type Descriptor = Vec<u8>;

    fn create_from_descriptor(&mut self, texels: Vec<u8>) -> ResourceLoadDesc {
        let mut data = TEXTURE_MAGIC.to_vec();
        data.extend(texels);
        self.update_content(&data)
    }
}

/// Names the texture it samples. Updated on the main thread like GPU state
/// would be.
#[derive(Default)]
struct Material {
    texture: String,
}

impl Resource for Material {
    const UPDATE_ON_MAIN_THREAD: bool = true;

    fn create(_id: &str) -> Self {
        Material::default()
    }

    fn update_content(&mut self, data: &[u8]) -> ResourceLoadDesc {
        match std::str::from_utf8(data)
            .ok()
            .and_then(|text| text.strip_prefix("texture="))
        {
            Some(texture) => {
                self.texture = texture.trim().to_owned();
                ResourceLoadDesc::loaded()
            }
            None => ResourceLoadDesc::missing(),
        }
    }

    fn unload_data(&mut self, _what: Unload) -> ResourceLoadDesc {
        self.texture.clear();
        ResourceLoadDesc::unloaded()
    }

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            cpu: self.texture.capacity() as u64,
            gpu: 0,
        }
    }
}

fn texture_id(index: usize) -> String {
    format!("textures/{index:04}.tex")
}

fn material_id(index: usize) -> String {
    format!("materials/{index:03}.mat")
}

fn texture_bytes(index: usize, revision: u64) -> Vec<u8> {
    let size = 256 + (index % 16) * 1024;
    let mut bytes = TEXTURE_MAGIC.to_vec();
    bytes.extend((0..size).map(|i| (i as u64 ^ index as u64 ^ revision) as u8));
    bytes
}

fn generate_sources(loader: &MemoryResourceLoader, textures: usize, materials: usize) {
    for index in 0..textures {
        loader.insert(texture_id(index), texture_bytes(index, 0));
    }
    for index in 0..materials {
        loader.insert(
            material_id(index),
            format!("texture={}", texture_id(index % textures.max(1))),
        );
    }
    loader.insert("textures/broken.tex", b"not a texture".to_vec());
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FrameStats {
    final_content: u64,
    fallbacks: u64,
    missing: u64,
}

fn load_config(args: &Args) -> DemoConfig {
    let mut config = match &args.config {
        Some(path) => match redlilium_core::config::load_toml::<DemoConfig>(path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{err}, using defaults");
                DemoConfig::default()
            }
        },
        None => DemoConfig::default(),
    };
    if let Some(workers) = args.file_workers {
        config.scheduler.file_access_workers = workers;
    }
    if args.short_workers.is_some() {
        config.scheduler.short_task_workers = args.short_workers;
    }
    if let Some(dir) = &args.asset_dir {
        config.resources.asset_root = Some(dir.clone());
    }
    config
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    set_thread_name!("Main Thread");
    redlilium_core::init();

    let args = Args::parse();
    let config = load_config(&args);
    log::info!("Starting streaming demo: {args:?}");

    let scheduler = Scheduler::new(config.scheduler);
    let manager = ResourceManager::new(scheduler.clone(), config.resources);

    let sources = MemoryResourceLoader::new();
    let watcher = match &args.asset_dir {
        Some(dir) => ResourceWatcher::new(dir),
        None => {
            manager.set_default_loader(sources.clone());
            None
        }
    };
    let texture_count = args.textures.max(1);
    let material_count = (texture_count / 8).max(1);
    generate_sources(&sources, texture_count, material_count);

    let placeholder = manager.create_resource::<Texture>("textures/placeholder", vec![128; 64]);
    let textures: Vec<ResourceHandle<Texture>> = (0..texture_count)
        .map(|index| {
            let handle = manager.load_resource::<Texture>(&texture_id(index));
            manager.set_loading_fallback(&handle, placeholder.clone());
            handle
        })
        .collect();
    let materials: Vec<ResourceHandle<Material>> = (0..material_count)
        .map(|index| manager.load_resource::<Material>(&material_id(index)))
        .collect();
    let broken = manager.load_resource::<Texture>("textures/broken.tex");
    manager.preload_resource(&broken);

    let mut stats = FrameStats::default();
    let started = Instant::now();
    for frame in 0..args.frames {
        frame_mark!();
        profile_scope!("frame");
        manager.per_frame_update();

        if let Some(watcher) = &watcher {
            watcher.reload_changed(&manager);
        }

        let first = (frame as usize * 3) % texture_count;
        for offset in 0..args.visible.min(texture_count) {
            let handle = &textures[(first + offset) % texture_count];
            match manager.acquire(handle, AcquireMode::AllowLoadingFallback) {
                Ok(texture) => match texture.result() {
                    AcquireResult::Final => stats.final_content += 1,
                    AcquireResult::LoadingFallback => stats.fallbacks += 1,
                },
                Err(err) => {
                    stats.missing += 1;
                    log::debug!("{err}");
                }
            }
        }

        // Materials never block the frame: use them once loaded.
        for material in &materials {
            if manager.get_loading_state(material) == ResourceState::Loaded {
                if let Ok(material) = manager.acquire(material, AcquireMode::PointerOnly) {
                    std::hint::black_box(material.texture.len());
                }
            } else {
                manager.preload_resource(material);
            }
        }

        if args.reload_every > 0 && frame > 0 && frame % args.reload_every == 0 {
            let revision = frame / args.reload_every;
            for index in (0..texture_count).step_by(7) {
                sources.insert(texture_id(index), texture_bytes(index, revision));
            }
            let reloaded = manager.reload_all_resources(false);
            log::info!("Frame {frame}: source data changed, {reloaded} resources reloaded");
        }

        if frame % 30 == 0 {
            log::info!(
                "Frame {frame}: {} queued, {} resources, {stats:?}",
                manager.loading_queue_len(),
                manager.resource_count(),
            );
        }

        scheduler.finish_frame_tasks();
        std::thread::sleep(Duration::from_millis(args.frame_ms));
    }

    for texture in &textures {
        manager.force_load_resource_now(texture);
    }
    let gpu_bytes: u64 = textures
        .iter()
        .filter_map(|texture| texture.record())
        .map(|record| record.memory_usage().gpu)
        .sum();
    let checksum = textures
        .iter()
        .filter_map(|texture| manager.acquire(texture, AcquireMode::PointerOnly).ok())
        .fold(0u32, |sum, texture| sum ^ texture.checksum);
    log::info!(
        "Ran {} frames in {:.2?}: {stats:?}, {} KiB of texels (checksum {checksum:08x}), \
         broken texture is {:?}",
        args.frames,
        started.elapsed(),
        gpu_bytes / 1024,
        broken.state()
    );

    drop(textures);
    drop(materials);
    drop(broken);
    drop(placeholder);
    manager.shutdown();
    scheduler.shutdown();
}
