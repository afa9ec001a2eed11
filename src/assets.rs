// Asset loading - SPIR-V binaries and the checker texture
//
// Both are read whole at startup. Any problem is an AssetError: the demo
// reports it and exits before entering the frame loop.

use crate::config::AssetConfig;
use crate::error::DemoError;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Width and height the demo's texture must have
pub const TEXTURE_EXTENT: (u32, u32) = (512, 512);

/// A SPIR-V module read from disk, re-packed into aligned 32-bit words
pub struct SpirvBinary {
    path: PathBuf,
    words: Vec<u32>,
    byte_len: usize,
}

impl SpirvBinary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DemoError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| DemoError::asset(path, e.to_string()))?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: impl AsRef<Path>, bytes: &[u8]) -> Result<Self, DemoError> {
        let path = path.as_ref();
        if bytes.is_empty() {
            return Err(DemoError::asset(path, "file is empty"));
        }

        // read_spv also fixes up byte-swapped modules
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| DemoError::asset(path, format!("not a SPIR-V binary: {}", e)))?;

        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(DemoError::asset(path, "missing SPIR-V magic number"));
        }

        log::debug!("Loaded SPIR-V {:?} ({} bytes)", path, bytes.len());

        Ok(Self {
            path: path.to_path_buf(),
            words,
            byte_len: bytes.len(),
        })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Size of the file this module was loaded from
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decoded RGBA8 pixels, tightly packed, rows top to bottom
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DemoError> {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|e| DemoError::asset(path, e.to_string()))?;
        let rgba = decoded.into_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded texture {:?}: {}x{}", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Load and insist on the extent the demo was authored for
    pub fn load_checker(path: impl AsRef<Path>) -> Result<Self, DemoError> {
        let path = path.as_ref();
        let texture = Self::load(path)?;
        if (texture.width, texture.height) != TEXTURE_EXTENT {
            return Err(DemoError::asset(
                path,
                format!(
                    "expected {}x{} texture, got {}x{}",
                    TEXTURE_EXTENT.0, TEXTURE_EXTENT.1, texture.width, texture.height
                ),
            ));
        }
        Ok(texture)
    }

    /// Nearest-neighbour lookup with repeat addressing, as the default
    /// sampler would see the texture at mip 0
    pub fn sample_nearest(&self, u: f32, v: f32) -> [u8; 4] {
        let u = u.rem_euclid(1.0);
        let v = v.rem_euclid(1.0);
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let offset = ((y * self.width + x) * 4) as usize;
        let mut texel = [0u8; 4];
        texel.copy_from_slice(&self.pixels[offset..offset + 4]);
        texel
    }
}

/// Everything the demo reads from disk, validated up front
pub struct DemoAssets {
    pub vertex_shader: SpirvBinary,
    pub fragment_shader: SpirvBinary,
    pub texture: TextureData,
}

impl DemoAssets {
    pub fn load(config: &AssetConfig) -> Result<Self, DemoError> {
        let assets = Self {
            vertex_shader: SpirvBinary::load(config.vertex_shader_path())?,
            fragment_shader: SpirvBinary::load(config.fragment_shader_path())?,
            texture: TextureData::load_checker(config.texture_path())?,
        };
        log::info!("Assets loaded from {:?}", config.root_dir());
        log::debug!(
            "Texture texels at (0.25, 0.25) {:?}, (0.375, 0.25) {:?}",
            assets.texture.sample_nearest(0.25, 0.25),
            assets.texture.sample_nearest(0.375, 0.25)
        );
        Ok(assets)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rhi-demo-{}-{}", std::process::id(), name))
    }

    fn minimal_spirv() -> Vec<u8> {
        // Header only: magic, version 1.0, generator, bound, schema
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn write_checker(path: &Path, width: u32, height: u32, cell: u32) {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn spirv_round_trip_reports_file_size() {
        let path = temp_path("roundtrip.spv");
        let bytes = minimal_spirv();
        std::fs::write(&path, &bytes).unwrap();

        let spirv = SpirvBinary::load(&path).unwrap();
        assert_eq!(spirv.byte_len(), bytes.len());
        assert_eq!(spirv.words().len() * 4, bytes.len());
        assert_eq!(spirv.words()[0], SPIRV_MAGIC);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn byte_swapped_spirv_is_accepted() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let spirv = SpirvBinary::from_bytes("swapped.spv", &bytes).unwrap();
        assert_eq!(spirv.words()[0], SPIRV_MAGIC);
    }

    #[test]
    fn missing_shader_is_an_asset_error() {
        let err = SpirvBinary::load(temp_path("nope.spv")).err().unwrap();
        assert!(matches!(err, DemoError::Asset { .. }));
    }

    #[test]
    fn empty_shader_is_an_asset_error() {
        let err = SpirvBinary::from_bytes("empty.spv", &[]).err().unwrap();
        match err {
            DemoError::Asset { reason, .. } => assert!(reason.contains("empty")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_or_foreign_bytes_are_rejected() {
        assert!(SpirvBinary::from_bytes("odd.spv", &[1, 2, 3]).is_err());
        assert!(SpirvBinary::from_bytes("text.spv", b"void main() {}  ").is_err());
    }

    #[test]
    fn checker_texture_samples_expected_colours() {
        let path = temp_path("checker512.png");
        write_checker(&path, 512, 512, 64);

        let texture = TextureData::load_checker(&path).unwrap();
        assert_eq!(texture.pixels.len(), 512 * 512 * 4);
        // (0.25, 0.25) lands in cell (2, 2)
        assert_eq!(texture.sample_nearest(0.25, 0.25), [255, 255, 255, 255]);
        // one cell over is the other colour
        assert_eq!(texture.sample_nearest(0.25 + 1.0 / 8.0, 0.25), [0, 0, 0, 255]);
        // repeat addressing
        assert_eq!(texture.sample_nearest(1.25, -0.75), [255, 255, 255, 255]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn wrong_texture_size_is_an_asset_error() {
        let path = temp_path("checker64.png");
        write_checker(&path, 64, 64, 8);

        let err = TextureData::load_checker(&path).err().unwrap();
        assert!(matches!(err, DemoError::Asset { .. }));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_vertex_shader_stops_startup() {
        let root = temp_path("assets-missing");
        std::fs::create_dir_all(root.join("Shader")).unwrap();
        std::fs::write(root.join("Shader/Demo2.frag.spv"), minimal_spirv()).unwrap();
        write_checker(&root.join("checker512.png"), 512, 512, 64);

        let config = AssetConfig {
            root: root.to_string_lossy().into_owned(),
            ..AssetConfig::default()
        };
        match DemoAssets::load(&config) {
            Err(DemoError::Asset { path, .. }) => assert!(path.ends_with("Shader/Demo1.vert.spv")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("loaded without a vertex shader"),
        }

        std::fs::write(root.join("Shader/Demo1.vert.spv"), minimal_spirv()).unwrap();
        let assets = DemoAssets::load(&config).unwrap();
        assert_eq!(assets.vertex_shader.byte_len(), 20);
        assert_eq!(assets.texture.width, 512);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn bundled_checker_is_usable() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("checker512.png");
        let texture = TextureData::load_checker(&path).unwrap();
        assert_eq!(texture.sample_nearest(0.25, 0.25), [255, 255, 255, 255]);
    }
}
