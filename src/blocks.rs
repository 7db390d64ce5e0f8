//! The two block kinds recorded per draw: uniform payloads and texture
//! bindings. Both are plain values compared by content.

use crate::block_cache::GenericBlockCache;
use crate::shared_block_cache::SharedBlockCache;

pub type UniformDataCache = GenericBlockCache<UniformDataBlock>;
pub type TextureDataCache = GenericBlockCache<TextureDataBlock>;
/// Self-locking variants for block caches shared between recording threads.
pub type SharedUniformDataCache = SharedBlockCache<UniformDataBlock>;
pub type SharedTextureDataCache = SharedBlockCache<TextureDataBlock>;

/// Packed uniform bytes for one draw.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniformDataBlock {
    data: Box<[u8]>,
}

impl UniformDataBlock {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { data: bytes.into() }
    }

    /// Little-endian packing of `values`. `-0.0` and `0.0` stay distinct,
    /// as do NaNs with different bit patterns: equality is bytewise.
    pub fn from_f32s(values: &[f32]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for UniformDataBlock {
    fn from(v: Vec<u8>) -> Self {
        Self { data: v.into() }
    }
}

/// Backend-assigned identity of a texture proxy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    #[default]
    None,
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TileMode {
    #[default]
    Clamp,
    Repeat,
    Mirror,
    Decal,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub mipmap: MipmapMode,
    pub tile_x: TileMode,
    pub tile_y: TileMode,
}

/// Ordered texture/sampler bindings for one draw. Order is significant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureDataBlock {
    bindings: Vec<(TextureId, SamplerDesc)>,
}

impl TextureDataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, texture: TextureId, sampler: SamplerDesc) {
        self.bindings.push((texture, sampler));
    }

    pub fn bindings(&self) -> &[(TextureId, SamplerDesc)] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<(TextureId, SamplerDesc)> for TextureDataBlock {
    fn from_iter<I: IntoIterator<Item = (TextureId, SamplerDesc)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}
