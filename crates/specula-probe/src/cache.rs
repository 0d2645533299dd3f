//! The reflection probe filter cache.

use specula_core::{CacheFormat, ProbeSource, TextureHandle, TextureId};
use specula_gpu::{CommandRecorder, ConvolutionFilter, CubeArrayDesc, GpuDevice};

use crate::bake::{bake, check_shape, BakeState, BakeTarget, Normalization, ScratchResources};
use crate::budget::{approx_cache_size_bytes, scratch_size_bytes};
use crate::config::ProbeCacheConfig;
use crate::error::{ProbeCacheError, Result};
use crate::slice_cache::{CubemapSliceCache, SliceAllocator};
use crate::stats::CacheStats;

/// Debug region wrapping each bake.
pub const BAKE_REGION: &str = "ConvolveReflectionProbe";

/// Fixed-capacity array of filtered reflection probes.
///
/// Call [`new_frame`](Self::new_frame) once per frame, then
/// [`fetch_slice`](Self::fetch_slice) for every visible probe. Stale or
/// never-baked slices are re-baked while recording the fetch, so the returned
/// slice index is valid for sampling once the recorded commands execute.
pub struct ProbeFilterCache<D, F, A = CubemapSliceCache>
where
    D: GpuDevice,
    F: ConvolutionFilter,
    A: SliceAllocator,
{
    device: D,
    filter: F,
    allocator: A,
    config: ProbeCacheConfig,
    bake_states: Vec<BakeState>,
    scratch: Option<ScratchResources>,
    stats: CacheStats,
}

impl<D, F> ProbeFilterCache<D, F>
where
    D: GpuDevice,
    F: ConvolutionFilter,
{
    /// Create a cache backed by a [`CubemapSliceCache`].
    pub fn create(device: D, filter: F, config: ProbeCacheConfig) -> Result<Self> {
        config.validate()?;
        let allocator = CubemapSliceCache::new(config.capacity);
        Self::with_allocator(device, filter, allocator, config)
    }
}

impl<D, F, A> ProbeFilterCache<D, F, A>
where
    D: GpuDevice,
    F: ConvolutionFilter,
    A: SliceAllocator,
{
    /// Create a cache over a caller-supplied slice allocator.
    ///
    /// The allocator's capacity must equal `config.capacity`. Its backing
    /// store is allocated here; scratch targets wait for the first `new_frame`.
    pub fn with_allocator(
        mut device: D,
        filter: F,
        mut allocator: A,
        config: ProbeCacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        if allocator.capacity() != config.capacity {
            return Err(ProbeCacheError::InvalidConfig(format!(
                "slice allocator holds {} slices but the cache is configured for {}",
                allocator.capacity(),
                config.capacity
            )));
        }

        allocator.allocate(&mut device, &backing_desc(&config))?;

        tracing::info!(
            "Created reflection probe cache: {} slices of {}px {:?} (~{:.1} MiB)",
            config.capacity,
            config.probe_size,
            config.format,
            approx_cache_size_bytes(
                config.capacity,
                config.probe_size,
                config.format,
                config.use_mipmaps
            ) as f64
                / (1024.0 * 1024.0)
        );
        if config.format.is_block_compressed() {
            tracing::debug!("Probe cache stores through the block encoder");
        }

        Ok(Self {
            device,
            filter,
            allocator,
            config,
            bake_states: vec![BakeState::Convolving; config.capacity as usize],
            scratch: None,
            stats: CacheStats::default(),
        })
    }

    /// Prepare for a new frame.
    ///
    /// Recreates anything `release` tore down, then advances the allocator's
    /// LRU epoch. Recreating resources resets every slice to `Convolving`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn new_frame(&mut self) -> Result<()> {
        if self.allocator.backing_store().is_none() {
            self.allocator
                .allocate(&mut self.device, &backing_desc(&self.config))?;
            tracing::debug!("Reallocated probe cache backing store");
        }

        if self.scratch.is_none() {
            self.scratch = Some(ScratchResources::create(
                &mut self.device,
                self.config.probe_size,
            )?);
            self.bake_states.fill(BakeState::Convolving);
            tracing::debug!(
                "Created probe scratch targets (~{} KiB)",
                scratch_size_bytes(self.config.probe_size) / 1024
            );
        }

        self.allocator.advance_frame();
        self.stats.frame_bakes = 0;
        Ok(())
    }

    /// Resolve the slice holding the filtered reflection of `source`.
    ///
    /// Bakes into the slice first when it is stale or was never completed.
    /// Shape mismatches are rejected before a slice is reserved, so a failed
    /// fetch leaves every bake state untouched, while a bake that fails
    /// midway leaves its slice `Convolving` for a retry on a later fetch.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn fetch_slice<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        source: &ProbeSource,
    ) -> Result<u32> {
        self.stats.fetches += 1;
        let result = self.resolve(recorder, source);
        if let Err(e) = &result {
            self.stats.failures += 1;
            match e {
                ProbeCacheError::ShapeMismatch { .. } => tracing::error!("{e}"),
                ProbeCacheError::CacheExhausted(_) => tracing::debug!("{e}"),
                _ => tracing::error!("Failed to fetch reflection probe {:?}: {e}", source.id()),
            }
        }
        result
    }

    /// [`fetch_slice`](Self::fetch_slice) with failures folded into `-1`.
    pub fn fetch_slice_index<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        source: &ProbeSource,
    ) -> i32 {
        self.fetch_slice(recorder, source)
            .ok()
            .and_then(|slice| i32::try_from(slice).ok())
            .unwrap_or(-1)
    }

    fn resolve<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        source: &ProbeSource,
    ) -> Result<u32> {
        let scratch = self.scratch.ok_or(ProbeCacheError::NotInitialized)?;
        check_shape(source)?;

        let reservation = self
            .allocator
            .reserve_slice(source)
            .ok_or(ProbeCacheError::CacheExhausted(source.id()))?;
        let slice = reservation.slice;
        if reservation.evicted.is_some() {
            self.stats.evictions += 1;
        }

        let capacity = self.config.capacity;
        let state = self.bake_states.get_mut(slice as usize).ok_or_else(|| {
            ProbeCacheError::InvalidConfig(format!(
                "slice allocator returned slice {slice} outside capacity {capacity}"
            ))
        })?;
        if !reservation.needs_update && *state == BakeState::Ready {
            self.stats.hits += 1;
            return Ok(slice);
        }
        *state = BakeState::Convolving;

        tracing::debug!(
            realtime = source.is_realtime(),
            "Baking reflection probe {:?} into slice {slice}",
            source.id()
        );
        let target = BakeTarget {
            probe_size: self.config.probe_size,
            format: self.config.format,
            backing_mips: self.config.backing_mip_levels(),
        };
        recorder.begin_region(BAKE_REGION);
        let baked = bake(
            recorder,
            &mut self.filter,
            &mut self.allocator,
            &scratch,
            &target,
            source,
            slice,
        );
        recorder.end_region();

        match baked? {
            Normalization::Conversion { .. } => self.stats.conversions += 1,
            Normalization::DirectCopy => self.stats.direct_copies += 1,
        }
        self.bake_states[slice as usize] = BakeState::Ready;
        self.stats.bakes += 1;
        self.stats.frame_bakes += 1;
        Ok(slice)
    }

    /// Release the backing store and scratch resources.
    ///
    /// Safe to call repeatedly. The next `new_frame` recreates everything.
    pub fn release(&mut self) {
        let had_backing = self.allocator.backing_store().is_some();
        if let Some(scratch) = self.scratch.take() {
            scratch.release(&mut self.device);
        }
        if had_backing {
            self.allocator.release(&mut self.device);
            tracing::info!(
                "Released reflection probe cache ({} slices)",
                self.config.capacity
            );
        }
        self.bake_states.fill(BakeState::Convolving);
    }

    /// The cube array every slice lives in.
    pub fn backing_store(&self) -> Option<TextureHandle> {
        self.allocator.backing_store()
    }

    /// Consecutive slices one probe occupies.
    pub fn env_slice_size(&self) -> u32 {
        1 + self.filter.extra_slices()
    }

    /// Slice currently owned by `id`, baked or not.
    pub fn slice_of(&self, id: TextureId) -> Option<u32> {
        self.allocator.slice_of(id)
    }

    pub fn bake_state(&self, slice: u32) -> Option<BakeState> {
        self.bake_states.get(slice as usize).copied()
    }

    pub fn bake_states(&self) -> &[BakeState] {
        &self.bake_states
    }

    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    pub fn probe_size(&self) -> u32 {
        self.config.probe_size
    }

    pub fn format(&self) -> CacheFormat {
        self.config.format
    }

    pub fn config(&self) -> &ProbeCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Approximate backing store size in bytes.
    pub fn approx_size_bytes(&self) -> u64 {
        approx_cache_size_bytes(
            self.config.capacity,
            self.config.probe_size,
            self.config.format,
            self.config.use_mipmaps,
        )
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<D, F, A> Drop for ProbeFilterCache<D, F, A>
where
    D: GpuDevice,
    F: ConvolutionFilter,
    A: SliceAllocator,
{
    fn drop(&mut self) {
        self.release();
    }
}

fn backing_desc(config: &ProbeCacheConfig) -> CubeArrayDesc {
    CubeArrayDesc {
        label: "probe-cache-backing",
        size: config.probe_size,
        format: config.format.texture_format(),
        mip_levels: config.backing_mip_levels(),
        cubes: config.capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specula_core::{TextureDimension, TextureFormat};
    use specula_gpu::BlockEncodeParams;
    use specula_test::{
        baked_cubemap, realtime_target, MockDevice, MockFilter, MockRecorder, MockTexture,
        ProbeFactory, RecordedCommand,
    };

    fn cache(capacity: u32) -> ProbeFilterCache<MockDevice, MockFilter> {
        ProbeFilterCache::create(
            MockDevice::new(),
            MockFilter::new(),
            ProbeCacheConfig::default().with_capacity(capacity),
        )
        .unwrap()
    }

    #[test]
    fn create_allocates_backing_store_only() {
        let cache = cache(4);
        let backing = cache.backing_store().unwrap();
        assert_eq!(cache.device().live_arrays(), 1);
        assert_eq!(cache.device().live_targets(), 0);
        assert_eq!(
            cache.device().textures.get(&backing),
            Some(&MockTexture::CubeArray(CubeArrayDesc {
                label: "probe-cache-backing",
                size: 128,
                format: TextureFormat::Rgba16Float,
                mip_levels: 8,
                cubes: 4,
            }))
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = ProbeFilterCache::create(
            MockDevice::new(),
            MockFilter::new(),
            ProbeCacheConfig::default().with_capacity(0),
        );
        assert!(matches!(result, Err(ProbeCacheError::InvalidConfig(_))));
    }

    #[test]
    fn allocator_capacity_must_match() {
        let result = ProbeFilterCache::with_allocator(
            MockDevice::new(),
            MockFilter::new(),
            CubemapSliceCache::new(3),
            ProbeCacheConfig::default().with_capacity(4),
        );
        assert!(matches!(result, Err(ProbeCacheError::InvalidConfig(_))));
    }

    #[test]
    fn fetch_requires_new_frame() {
        let mut cache = cache(2);
        let mut rec = MockRecorder::new();
        let probe = baked_cubemap(1, 128, TextureFormat::Rgba16Float);

        assert!(matches!(
            cache.fetch_slice(&mut rec, &probe),
            Err(ProbeCacheError::NotInitialized)
        ));
        assert!(rec.commands.is_empty());

        cache.new_frame().unwrap();
        assert_eq!(cache.device().live_targets(), 2);
        assert!(cache.fetch_slice(&mut rec, &probe).is_ok());
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn new_frame_is_idempotent_for_resources() {
        let mut cache = cache(2);
        cache.new_frame().unwrap();
        let created = cache.device().textures_created;
        cache.new_frame().unwrap();
        cache.new_frame().unwrap();
        assert_eq!(cache.device().textures_created, created);
        assert_eq!(cache.allocator().current_frame(), 3);
    }

    #[test]
    fn failed_scratch_creation_keeps_cache_uninitialized() {
        let mut cache = cache(2);
        cache.device_mut().fail_creation = true;
        assert!(cache.new_frame().is_err());
        assert_eq!(cache.device().live_targets(), 0);

        cache.device_mut().fail_creation = false;
        cache.new_frame().unwrap();
        assert_eq!(cache.device().live_targets(), 2);
    }

    #[test]
    fn env_slice_size_includes_filter_extras() {
        let mut filter = MockFilter::new();
        filter.extra_slices = 2;
        let with_extras = ProbeFilterCache::create(
            MockDevice::new(),
            filter,
            ProbeCacheConfig::default().with_capacity(2),
        )
        .unwrap();
        assert_eq!(with_extras.env_slice_size(), 3);
        assert_eq!(cache(2).env_slice_size(), 1);
    }

    #[test]
    fn fetch_slice_index_folds_errors() {
        let mut cache = cache(1);
        let mut rec = MockRecorder::new();
        assert_eq!(
            cache.fetch_slice_index(&mut rec, &baked_cubemap(1, 128, TextureFormat::Rgba16Float)),
            -1
        );
        cache.new_frame().unwrap();
        assert_eq!(
            cache.fetch_slice_index(&mut rec, &baked_cubemap(1, 128, TextureFormat::Rgba16Float)),
            0
        );
        assert_eq!(
            cache.fetch_slice_index(&mut rec, &baked_cubemap(2, 128, TextureFormat::Rgba16Float)),
            -1
        );
    }

    #[test]
    fn release_frees_everything() {
        let mut cache = cache(2);
        cache.new_frame().unwrap();
        let mut rec = MockRecorder::new();
        cache
            .fetch_slice(&mut rec, &baked_cubemap(1, 128, TextureFormat::Rgba16Float))
            .unwrap();

        cache.release();
        assert_eq!(cache.device().textures.len(), 0);
        assert!(cache.device().materials.is_empty());
        assert_eq!(cache.device().double_releases, 0);
    }

    type TestCache = ProbeFilterCache<MockDevice, MockFilter>;

    fn create(config: ProbeCacheConfig) -> TestCache {
        ProbeFilterCache::create(MockDevice::new(), MockFilter::new(), config).unwrap()
    }

    fn ready_cache(capacity: u32) -> TestCache {
        let mut cache = create(ProbeCacheConfig::default().with_capacity(capacity));
        cache.new_frame().unwrap();
        cache
    }

    fn probe(id: u64) -> ProbeSource {
        baked_cubemap(id, 128, TextureFormat::Rgba16Float)
    }

    fn is_filter_region(command: &RecordedCommand) -> bool {
        matches!(command, RecordedCommand::BeginRegion(label) if label == "mock-ggx")
    }

    #[test]
    fn create_starts_every_slice_convolving() {
        for (capacity, probe_size) in [(1, 16), (4, 128), (16, 256), (64, 512)] {
            let cache = create(
                ProbeCacheConfig::default()
                    .with_capacity(capacity)
                    .with_probe_size(probe_size),
            );
            assert_eq!(cache.bake_states().len(), capacity as usize);
            assert!(cache
                .bake_states()
                .iter()
                .all(|s| *s == BakeState::Convolving));
        }
    }

    #[test]
    fn refetch_in_same_frame_is_free() {
        let mut cache = ready_cache(4);
        let mut rec = MockRecorder::new();
        let a = probe(1);

        let first = cache.fetch_slice(&mut rec, &a).unwrap();
        let recorded = rec.commands.len();
        let second = cache.fetch_slice(&mut rec, &a).unwrap();

        assert_eq!(first, second);
        assert_eq!(rec.commands.len(), recorded);
        assert_eq!(cache.stats().bakes, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.bake_state(first), Some(BakeState::Ready));
    }

    #[test]
    fn probe_stays_cached_across_frames() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        let slice = cache.fetch_slice(&mut rec, &probe(1)).unwrap();

        for _ in 0..5 {
            cache.new_frame().unwrap();
            rec.take();
            assert_eq!(cache.fetch_slice(&mut rec, &probe(1)).unwrap(), slice);
            assert!(rec.commands.is_empty());
        }
    }

    #[test]
    fn evicted_probe_is_rebaked_elsewhere() {
        let mut cache = ready_cache(3);
        let mut rec = MockRecorder::new();
        let t = probe(1);

        let original = cache.fetch_slice(&mut rec, &t).unwrap();
        cache.new_frame().unwrap();
        cache.fetch_slice(&mut rec, &probe(2)).unwrap();
        cache.fetch_slice(&mut rec, &probe(3)).unwrap();
        cache.new_frame().unwrap();

        // Probe 1 is the least recently used and loses its slice
        assert_eq!(cache.fetch_slice(&mut rec, &probe(4)).unwrap(), original);
        assert_eq!(cache.slice_of(TextureId(1)), None);
        cache.new_frame().unwrap();

        rec.take();
        let again = cache.fetch_slice(&mut rec, &t).unwrap();
        assert_ne!(again, original);
        assert_eq!(rec.store_count(), 1);
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(cache.stats().bakes, 5);
    }

    #[test]
    fn non_cube_realtime_target_is_rejected_without_side_effects() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        cache.fetch_slice(&mut rec, &probe(1)).unwrap();
        let states = cache.bake_states().to_vec();
        rec.take();

        let flat = realtime_target(9, 128, TextureDimension::D2, 1);
        let result = cache.fetch_slice(&mut rec, &flat);

        assert!(matches!(
            result,
            Err(ProbeCacheError::ShapeMismatch {
                id: TextureId(9),
                dimension: TextureDimension::D2
            })
        ));
        assert!(result.as_ref().is_err_and(ProbeCacheError::is_recoverable));
        assert_eq!(cache.fetch_slice_index(&mut rec, &flat), -1);
        assert_eq!(cache.bake_states(), states.as_slice());
        assert_eq!(cache.slice_of(TextureId(9)), None);
        assert!(rec.commands.is_empty());
        assert_eq!(cache.stats().failures, 2);
    }

    #[test]
    fn cube_realtime_target_rebakes_on_every_update() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();

        let slice = cache
            .fetch_slice(&mut rec, &realtime_target(5, 128, TextureDimension::Cube, 1))
            .unwrap();
        assert_eq!(
            cache
                .fetch_slice(&mut rec, &realtime_target(5, 128, TextureDimension::Cube, 1))
                .unwrap(),
            slice
        );
        assert_eq!(cache.stats().bakes, 1);

        cache.new_frame().unwrap();
        assert_eq!(
            cache
                .fetch_slice(&mut rec, &realtime_target(5, 128, TextureDimension::Cube, 2))
                .unwrap(),
            slice
        );
        assert_eq!(cache.stats().bakes, 2);
    }

    #[test]
    fn matching_source_takes_direct_copy() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        let a = probe(1);

        let slice = cache.fetch_slice(&mut rec, &a).unwrap();

        assert_eq!(rec.blit_count(), 0);
        assert_eq!(rec.face_copy_count(), 6);
        assert!(rec.commands.iter().all(|c| match c {
            RecordedCommand::CopyFace { src, mip, .. } => *src == a.texture() && *mip == 0,
            _ => true,
        }));
        assert_eq!(
            rec.commands.last(),
            Some(&RecordedCommand::EndRegion),
            "bake is wrapped in its debug region"
        );
        assert_eq!(
            rec.commands.first(),
            Some(&RecordedCommand::BeginRegion(BAKE_REGION.to_string()))
        );
        let backing = cache.backing_store().unwrap();
        assert_eq!(
            rec.count(|c| matches!(
                c,
                RecordedCommand::CopyToSlice { dst_array, slice: s, mip_levels: 8, .. }
                    if *dst_array == backing && *s == slice
            )),
            1
        );
        assert_eq!(cache.stats().direct_copies, 1);
        assert_eq!(cache.stats().conversions, 0);
    }

    #[test]
    fn size_mismatch_blits_six_faces_before_mips() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();

        cache
            .fetch_slice(&mut rec, &baked_cubemap(1, 512, TextureFormat::Rgba16Float))
            .unwrap();

        assert_eq!(rec.blit_count(), 6);
        assert_eq!(rec.face_copy_count(), 0);
        let mips = rec
            .position(|c| matches!(c, RecordedCommand::GenerateMips { .. }))
            .unwrap();
        let last_blit = rec
            .commands
            .iter()
            .rposition(|c| matches!(c, RecordedCommand::DrawFullscreen { .. }))
            .unwrap();
        assert!(last_blit < mips);
        assert!(rec.commands.iter().all(|c| match c {
            RecordedCommand::DrawFullscreen { params, .. } => params.mip_level == 0,
            _ => true,
        }));
        assert_eq!(cache.stats().conversions, 1);
    }

    #[test]
    fn compressed_source_converts_even_at_matching_size() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();

        cache
            .fetch_slice(&mut rec, &baked_cubemap(1, 128, TextureFormat::Bc6hRgbUfloat))
            .unwrap();

        assert_eq!(rec.blit_count(), 6);
        assert_eq!(rec.face_copy_count(), 0);
    }

    #[test]
    fn pipeline_steps_are_recorded_in_order() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        cache
            .fetch_slice(&mut rec, &baked_cubemap(1, 64, TextureFormat::Rgba8Unorm))
            .unwrap();

        let (scratch_source, scratch_convolution) = cache.filter().calls[0];
        let mips = rec
            .position(|c| *c == RecordedCommand::GenerateMips { target: scratch_source })
            .unwrap();
        let filter = rec.position(is_filter_region).unwrap();
        let store = rec
            .position(|c| matches!(c, RecordedCommand::CopyToSlice { src, .. } if *src == scratch_convolution))
            .unwrap();

        assert!(mips < filter);
        assert!(filter < store);
        assert_ne!(scratch_source, scratch_convolution);
    }

    #[test]
    fn capacity_four_scenario() {
        let mut cache = create(
            ProbeCacheConfig::default()
                .with_capacity(4)
                .with_probe_size(128)
                .with_format(CacheFormat::Rgba16Float)
                .with_mipmaps(true),
        );
        cache.new_frame().unwrap();
        let mut rec = MockRecorder::new();
        let mut factory = ProbeFactory::new(128, TextureFormat::Rgba16Float);
        let probes = factory.baked(5);

        let a = cache.fetch_slice(&mut rec, &probes[0]).unwrap();
        assert!(a < 4);
        assert_eq!(cache.fetch_slice(&mut rec, &probes[0]).unwrap(), a);
        assert_eq!(cache.stats().bakes, 1);

        for p in &probes[1..4] {
            cache.fetch_slice(&mut rec, p).unwrap();
        }
        assert!(cache.bake_states().iter().all(|s| *s == BakeState::Ready));

        cache.new_frame().unwrap();
        rec.take();
        let e = cache.fetch_slice(&mut rec, &probes[4]).unwrap();

        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().bakes, 5);
        assert_eq!(rec.store_count(), 1);
        assert_eq!(e, a, "oldest slot goes first, ties to the lowest index");
        assert_eq!(cache.slice_of(probes[0].id()), None);
        assert!(cache.bake_states().iter().all(|s| *s == BakeState::Ready));
    }

    #[test]
    fn exhausted_within_a_frame() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        cache.fetch_slice(&mut rec, &probe(1)).unwrap();
        cache.fetch_slice(&mut rec, &probe(2)).unwrap();

        let result = cache.fetch_slice(&mut rec, &probe(3));
        assert!(matches!(
            result,
            Err(ProbeCacheError::CacheExhausted(TextureId(3)))
        ));
        assert!(cache.bake_states().iter().all(|s| *s == BakeState::Ready));
        assert_eq!(cache.stats().evictions, 0);

        cache.new_frame().unwrap();
        assert!(cache.fetch_slice(&mut rec, &probe(3)).is_ok());
    }

    #[test]
    fn block_compressed_store_encodes_into_slice() {
        let mut cache = create(
            ProbeCacheConfig::default()
                .with_capacity(2)
                .with_format(CacheFormat::Bc6hUfloat),
        );
        cache.new_frame().unwrap();
        let mut rec = MockRecorder::new();

        let slice = cache.fetch_slice(&mut rec, &probe(1)).unwrap();
        let (_, scratch_convolution) = cache.filter().calls[0];

        assert_eq!(
            rec.count(|c| matches!(c, RecordedCommand::CopyToSlice { .. })),
            0
        );
        assert_eq!(
            rec.commands
                .iter()
                .filter_map(|c| match c {
                    RecordedCommand::BlockEncode(params) => Some(*params),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            vec![BlockEncodeParams {
                source: scratch_convolution,
                face_size: 128,
                target_array: cache.backing_store().unwrap(),
                base_mip: 0,
                max_mips: 8,
                slice,
            }]
        );

        // The hash recorded after encoding makes the refetch a hit
        rec.take();
        cache.new_frame().unwrap();
        assert_eq!(cache.fetch_slice(&mut rec, &probe(1)).unwrap(), slice);
        assert!(rec.commands.is_empty());
    }

    #[test]
    fn failed_store_leaves_slice_convolving() {
        let mut cache = ready_cache(2);
        let mut failing =
            MockRecorder::new().fail_when(|c| matches!(c, RecordedCommand::CopyToSlice { .. }));

        let result = cache.fetch_slice(&mut failing, &probe(1));
        assert!(matches!(result, Err(ProbeCacheError::Gpu(_))));
        assert!(result.as_ref().is_err_and(|e| !e.is_recoverable()));

        let slice = cache.slice_of(TextureId(1)).unwrap();
        assert_eq!(cache.bake_state(slice), Some(BakeState::Convolving));
        assert_eq!(failing.commands.last(), Some(&RecordedCommand::EndRegion));

        let mut rec = MockRecorder::new();
        assert_eq!(cache.fetch_slice(&mut rec, &probe(1)).unwrap(), slice);
        assert_eq!(rec.store_count(), 1);
        assert_eq!(cache.bake_state(slice), Some(BakeState::Ready));
    }

    #[test]
    fn failed_filter_never_reaches_backing_store() {
        let mut filter = MockFilter::new();
        filter.fail = true;
        let mut cache = ProbeFilterCache::create(
            MockDevice::new(),
            filter,
            ProbeCacheConfig::default().with_capacity(2),
        )
        .unwrap();
        cache.new_frame().unwrap();
        let mut rec = MockRecorder::new();

        assert!(cache.fetch_slice(&mut rec, &probe(1)).is_err());
        assert_eq!(rec.store_count(), 0);
        assert!(cache
            .bake_states()
            .iter()
            .all(|s| *s == BakeState::Convolving));
    }

    #[test]
    fn release_is_idempotent_and_recoverable() {
        let mut cache = ready_cache(2);
        let mut rec = MockRecorder::new();
        cache.fetch_slice(&mut rec, &probe(1)).unwrap();

        cache.release();
        cache.release();
        assert!(cache.device().textures.is_empty());
        assert!(cache.device().materials.is_empty());
        assert_eq!(cache.device().double_releases, 0);
        assert_eq!(cache.backing_store(), None);
        assert_eq!(cache.bake_states().len(), 2);
        assert!(matches!(
            cache.fetch_slice(&mut rec, &probe(1)),
            Err(ProbeCacheError::NotInitialized)
        ));

        cache.new_frame().unwrap();
        assert!(cache.backing_store().is_some());
        assert_eq!(cache.device().live_targets(), 2);
        rec.take();
        cache.fetch_slice(&mut rec, &probe(1)).unwrap();
        assert_eq!(rec.store_count(), 1);
    }
}
