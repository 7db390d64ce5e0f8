//! Context and Recorder: explicit owners of the cache family.
//!
//! A `Context` owns the caches shared by every recorder (the shader key
//! dictionary and the keyed resource cache) and hands `Arc` clones of them
//! to each `Recorder` it makes. Each recorder owns its own uniform and
//! texture block caches, since those handles are only meaningful within one
//! recording.

use crate::arena::DEFAULT_CHUNK_SIZE;
use crate::blocks::{
    TextureDataBlock, TextureDataCache, TextureId, UniformDataBlock, UniformDataCache,
};
use crate::dictionary::{DictionaryOptions, Entry, KeyedEntryDictionary};
use crate::error::InsertError;
use crate::handle::{Index, UniqueId};
use crate::resource_cache::UniquelyKeyedResourceCache;
use std::sync::Arc;
use std::time::Instant;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Clear,
    Src,
    #[default]
    SrcOver,
    DstOver,
    Multiply,
    Screen,
}

/// Fixed-function blend state recorded alongside a paint key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlendInfo {
    pub mode: BlendMode,
    pub writes_color: bool,
}

/// A shared GPU resource as the resource cache sees it: an identity and
/// its dimensions. The backing texture may not exist yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceHandle {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

pub type PaintKeyDictionary = KeyedEntryDictionary<BlendInfo>;
pub type SharedResourceCache = UniquelyKeyedResourceCache<String, ResourceHandle>;

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub dictionary: DictionaryOptions,
    /// Blocks per arena chunk in each recorder's block caches.
    pub block_chunk_size: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            dictionary: DictionaryOptions::default(),
            block_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

pub struct Context {
    dictionary: Arc<PaintKeyDictionary>,
    resources: Arc<SharedResourceCache>,
    block_chunk_size: usize,
}

impl Context {
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        tracing::debug!(
            arena_chunk_size = options.dictionary.arena_chunk_size,
            block_chunk_size = options.block_chunk_size,
            "creating cache context"
        );
        Self {
            dictionary: Arc::new(KeyedEntryDictionary::with_options(options.dictionary)),
            resources: Arc::new(UniquelyKeyedResourceCache::new()),
            block_chunk_size: options.block_chunk_size,
        }
    }

    pub fn dictionary(&self) -> &Arc<PaintKeyDictionary> {
        &self.dictionary
    }

    pub fn resources(&self) -> &Arc<SharedResourceCache> {
        &self.resources
    }

    pub fn make_recorder(&self) -> Recorder {
        Recorder {
            uniforms: UniformDataCache::with_chunk_size(self.block_chunk_size),
            textures: TextureDataCache::with_chunk_size(self.block_chunk_size),
            dictionary: Arc::clone(&self.dictionary),
            resources: Arc::clone(&self.resources),
        }
    }

    /// Release every shared resource the cache alone keeps alive.
    pub fn purge_unreferenced_resources(&self) {
        self.resources.drop_unique_refs();
    }

    /// Like `purge_unreferenced_resources`, limited to resources not used
    /// since `purge_time`.
    pub fn purge_resources_not_used_since(&self, purge_time: Instant) {
        self.resources.drop_unique_refs_older_than(purge_time);
    }

    /// Release the cache's reference to every shared resource.
    pub fn free_gpu_resources(&self) {
        self.resources.drop_all_refs();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-recording state. `Send`, so recorders can run on worker threads.
pub struct Recorder {
    uniforms: UniformDataCache,
    textures: TextureDataCache,
    dictionary: Arc<PaintKeyDictionary>,
    resources: Arc<SharedResourceCache>,
}

impl Recorder {
    pub fn record_uniforms(&mut self, block: UniformDataBlock) -> Result<Index, InsertError> {
        self.uniforms.insert(block)
    }

    pub fn record_textures(&mut self, block: TextureDataBlock) -> Result<Index, InsertError> {
        self.textures.insert(block)
    }

    pub fn uniform_block(&self, index: Index) -> &UniformDataBlock {
        self.uniforms.lookup(index)
    }

    pub fn texture_block(&self, index: Index) -> &TextureDataBlock {
        self.textures.lookup(index)
    }

    pub fn uniform_block_count(&self) -> usize {
        self.uniforms.count()
    }

    pub fn texture_block_count(&self) -> usize {
        self.textures.count()
    }

    /// Id of the serialized paint key, shared by every recorder of the
    /// owning context. `blend` is kept only if the key is new.
    pub fn paint_key_id(&self, key: &[u8], blend: BlendInfo) -> Result<UniqueId, InsertError> {
        self.dictionary
            .find_or_create_with(key, || blend)
            .map(Entry::unique_id)
    }

    pub fn paint_key(&self, id: UniqueId) -> Option<&Entry<BlendInfo>> {
        self.dictionary.lookup(id)
    }

    /// Shared resource for `key`, building it with `make` if no recorder
    /// has yet.
    pub fn shared_resource<F>(&self, key: &str, make: F) -> Arc<ResourceHandle>
    where
        F: FnOnce() -> ResourceHandle,
    {
        if let Some(view) = self.resources.find(key) {
            return view;
        }
        self.resources.add(key.to_owned(), Arc::new(make()))
    }
}
