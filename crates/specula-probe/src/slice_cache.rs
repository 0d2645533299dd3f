//! Content-hash keyed cube slice cache with frame-epoch LRU eviction.

use hashbrown::HashMap;
use specula_core::{ContentHash, ProbeSource, TextureHandle, TextureId};
use specula_gpu::{CommandRecorder, CubeArrayDesc, GpuDevice, Result as GpuResult};

/// Outcome of reserving a slice for a probe texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceReservation {
    /// Slice index inside the backing store.
    pub slice: u32,
    /// The slice does not hold this texture's current content.
    pub needs_update: bool,
    /// Previous owner of the slice, when it was taken from another texture.
    pub evicted: Option<TextureId>,
}

/// Maps texture identities onto slices of a fixed-size cube array.
///
/// At most one slice belongs to a given identity at a time, and a slice index
/// stays with its identity until evicted in favor of another one.
pub trait SliceAllocator {
    /// Create the backing store.
    fn allocate<D: GpuDevice + ?Sized>(&mut self, device: &mut D, desc: &CubeArrayDesc) -> GpuResult<()>;

    /// Find or claim a slice for `source`, marking it used this frame.
    ///
    /// Returns `None` when no slice is free or evictable.
    fn reserve_slice(&mut self, source: &ProbeSource) -> Option<SliceReservation>;

    /// Current content fingerprint of `source`.
    fn texture_hash(&self, source: &ProbeSource) -> ContentHash;

    /// Tag `slice` as holding content with `hash`.
    fn set_slice_hash(&mut self, slice: u32, hash: ContentHash);

    /// Copy a filtered cubemap into `slice` and tag it with `hash`.
    fn update_slice<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        slice: u32,
        content: TextureHandle,
        hash: ContentHash,
    ) -> GpuResult<()>;

    /// Advance the LRU epoch.
    fn advance_frame(&mut self);

    /// The cube array holding every slice.
    fn backing_store(&self) -> Option<TextureHandle>;

    /// Destroy the backing store and forget every slice assignment.
    fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D);

    /// Number of slices.
    fn capacity(&self) -> u32;

    /// Slice currently owned by `id`.
    fn slice_of(&self, id: TextureId) -> Option<u32>;
}

/// Age of a slot that has never been reserved.
const NEVER_USED: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
struct SliceEntry {
    texture: Option<TextureId>,
    hash: ContentHash,
    /// Frames since last reservation; 0 means used this frame.
    age: u32,
}

impl SliceEntry {
    const EMPTY: Self = Self {
        texture: None,
        hash: ContentHash::NONE,
        age: NEVER_USED,
    };
}

/// Default [`SliceAllocator`].
///
/// Eviction picks the unused slot with the oldest reservation; never-used
/// slots go first and ties go to the lowest index. Slots reserved during the
/// current frame are never evicted.
pub struct CubemapSliceCache {
    slots: Vec<SliceEntry>,
    locator: HashMap<TextureId, u32>,
    backing: Option<TextureHandle>,
    mip_levels: u32,
    frame: u64,
    evictions: u64,
}

impl CubemapSliceCache {
    /// Create a cache with `capacity` slices and no backing store yet.
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: vec![SliceEntry::EMPTY; capacity as usize],
            locator: HashMap::with_capacity(capacity as usize),
            backing: None,
            mip_levels: 1,
            frame: 0,
            evictions: 0,
        }
    }

    /// Frames advanced so far.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Total identity replacements.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Number of slices owned by some texture.
    pub fn occupied(&self) -> usize {
        self.locator.len()
    }

    /// Hash tag of a slice.
    pub fn slice_hash(&self, slice: u32) -> Option<ContentHash> {
        self.slots.get(slice as usize).map(|s| s.hash)
    }

    fn eviction_candidate(&self) -> Option<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.age > 0)
            .max_by_key(|(i, s)| (s.age, std::cmp::Reverse(*i)))
            .map(|(i, _)| i as u32)
    }
}

impl SliceAllocator for CubemapSliceCache {
    fn allocate<D: GpuDevice + ?Sized>(&mut self, device: &mut D, desc: &CubeArrayDesc) -> GpuResult<()> {
        if let Some(old) = self.backing.take() {
            device.release_texture(old);
        }
        self.backing = Some(device.create_cube_array(desc)?);
        self.mip_levels = desc.mip_levels.max(1);
        Ok(())
    }

    fn reserve_slice(&mut self, source: &ProbeSource) -> Option<SliceReservation> {
        let id = source.id();

        if let Some(&slice) = self.locator.get(&id) {
            let entry = &mut self.slots[slice as usize];
            entry.age = 0;
            return Some(SliceReservation {
                slice,
                needs_update: entry.hash != source.content_hash(),
                evicted: None,
            });
        }

        let slice = self.eviction_candidate()?;
        let entry = &mut self.slots[slice as usize];
        let evicted = entry.texture.replace(id);
        entry.hash = ContentHash::NONE;
        entry.age = 0;
        if let Some(previous) = evicted {
            self.locator.remove(&previous);
            self.evictions += 1;
            tracing::debug!("Evicting probe {previous:?} from slice {slice} for {id:?}");
        } else {
            tracing::debug!("Assigning free slice {slice} to probe {id:?}");
        }
        self.locator.insert(id, slice);

        Some(SliceReservation {
            slice,
            needs_update: true,
            evicted,
        })
    }

    fn texture_hash(&self, source: &ProbeSource) -> ContentHash {
        source.content_hash()
    }

    fn set_slice_hash(&mut self, slice: u32, hash: ContentHash) {
        if let Some(entry) = self.slots.get_mut(slice as usize) {
            entry.hash = hash;
        }
    }

    fn update_slice<R: CommandRecorder + ?Sized>(
        &mut self,
        recorder: &mut R,
        slice: u32,
        content: TextureHandle,
        hash: ContentHash,
    ) -> GpuResult<()> {
        let backing = self.backing.ok_or_else(|| {
            specula_gpu::GpuError::InvalidState("slice cache has no backing store".to_string())
        })?;
        recorder.copy_to_slice(content, backing, slice, self.mip_levels)?;
        self.set_slice_hash(slice, hash);
        Ok(())
    }

    fn advance_frame(&mut self) {
        self.frame += 1;
        for slot in &mut self.slots {
            slot.age = slot.age.saturating_add(1);
        }
    }

    fn backing_store(&self) -> Option<TextureHandle> {
        self.backing
    }

    fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(backing) = self.backing.take() {
            device.release_texture(backing);
        }
        self.slots.fill(SliceEntry::EMPTY);
        self.locator.clear();
    }

    fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn slice_of(&self, id: TextureId) -> Option<u32> {
        self.locator.get(&id).copied()
    }
}
