//! Logo catalog and lazy overlay texture loading.
//!
//! The catalog is a fixed table; selection happens by string key from the
//! settings. Unknown keys and load failures both fall back to the `"none"`
//! entry, and that correction is written back into the persisted settings
//! so it does not repeat every tick.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::{SharedSettings, SCHEMA_VERSION};

pub const NONE_KEY: &str = "none";

/// Static visual parameters for one logo choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogoDescriptor {
    pub key: &'static str,
    /// On-screen size in pixels. Zero for the `"none"` entry.
    pub size: [f32; 2],
    /// Margin between the logo and the viewport edge.
    pub border: f32,
    /// Signed blend factor: positive lightens toward the logo, negative
    /// darkens by it.
    pub blend: f32,
    /// Asset file stem under the assets directory, if any.
    pub asset: Option<&'static str>,
}

const CATALOG: &[LogoDescriptor] = &[
    LogoDescriptor {
        key: NONE_KEY,
        size: [0.0, 0.0],
        border: 0.0,
        blend: 0.0,
        asset: None,
    },
    LogoDescriptor {
        key: "logo-max-color",
        size: [128.0, 128.0],
        border: 20.0,
        blend: -0.8,
        asset: Some("logo-max-color"),
    },
    LogoDescriptor {
        key: "logo-max-white",
        size: [128.0, 128.0],
        border: 20.0,
        blend: 0.8,
        asset: Some("logo-max-white"),
    },
    LogoDescriptor {
        key: "logo-era-color",
        size: [64.0, 64.0],
        border: 20.0,
        blend: -0.5,
        asset: Some("logo-era-color"),
    },
    LogoDescriptor {
        key: "logo-ds-black",
        size: [64.0, 64.0],
        border: 20.0,
        blend: -0.7,
        asset: Some("logo-ds-black"),
    },
    LogoDescriptor {
        key: "logo-ds-orange",
        size: [64.0, 64.0],
        border: 20.0,
        blend: -0.5,
        asset: Some("logo-ds-orange"),
    },
    LogoDescriptor {
        key: "logo-ds-color",
        size: [64.0, 64.0],
        border: 20.0,
        blend: -0.5,
        asset: Some("logo-ds-color"),
    },
    LogoDescriptor {
        key: "logo-ds-white",
        size: [64.0, 64.0],
        border: 20.0,
        blend: 0.8,
        asset: Some("logo-ds-white"),
    },
];

/// Resolve a selection key, falling back to the `"none"` entry for
/// anything not in the catalog.
pub fn resolve(key: &str) -> &'static LogoDescriptor {
    CATALOG
        .iter()
        .find(|d| d.key == key)
        .unwrap_or(&CATALOG[0])
}

pub fn is_known(key: &str) -> bool {
    CATALOG.iter().any(|d| d.key == key)
}

/// Owns the currently loaded logo texture and reloads it lazily when the
/// selection changes.
pub struct LogoOverlay {
    assets_dir: PathBuf,
    current_key: Option<String>,
    descriptor: &'static LogoDescriptor,
    texture: Option<wgpu::Texture>,
}

impl LogoOverlay {
    pub fn new(assets_dir: PathBuf) -> Self {
        Self {
            assets_dir,
            current_key: None,
            descriptor: resolve(NONE_KEY),
            texture: None,
        }
    }

    pub fn descriptor(&self) -> &'static LogoDescriptor {
        self.descriptor
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.texture.as_ref()
    }

    /// Bring the overlay in sync with the selected key. Returns true when
    /// the loaded logo changed (the caller must rebuild its bind group).
    ///
    /// A stale key or a failed asset load falls back to `"none"` and
    /// rewrites the shared settings' logo field, persisting the fix.
    pub fn refresh(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        settings: &SharedSettings,
        prefs_path: &Path,
    ) -> bool {
        let selected = settings.read().expect("settings lock poisoned").logo.clone();
        if self.current_key.as_deref() == Some(selected.as_str()) {
            return false;
        }

        let mut effective = selected.clone();
        if !is_known(&effective) {
            log::warn!("unknown logo key {effective:?}, resetting to {NONE_KEY:?}");
            effective = NONE_KEY.to_string();
        }

        let descriptor = resolve(&effective);
        let texture = match descriptor.asset {
            Some(stem) => {
                let path = self.assets_dir.join(format!("{stem}.png"));
                match load_texture(device, queue, &path) {
                    Ok(texture) => Some(texture),
                    Err(err) => {
                        log::warn!("failed to load logo {}: {err}", path.display());
                        effective = NONE_KEY.to_string();
                        None
                    }
                }
            }
            None => None,
        };

        if effective != selected {
            self.heal_settings(settings, prefs_path, &effective);
        }

        self.descriptor = resolve(&effective);
        self.texture = texture;
        // After healing, the shared settings already hold the effective
        // key, so this comparison goes quiet again next tick.
        self.current_key = Some(effective);
        true
    }

    fn heal_settings(&self, settings: &SharedSettings, prefs_path: &Path, key: &str) {
        let mut guard = settings.write().expect("settings lock poisoned");
        guard.logo = key.to_string();
        guard.version = SCHEMA_VERSION;
        if let Err(err) = guard.save(prefs_path) {
            log::warn!("could not persist logo fallback: {err}");
        }
    }
}

/// Decode a PNG and upload it as an `Rgba8UnormSrgb` texture.
fn load_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    path: &Path,
) -> anyhow::Result<wgpu::Texture> {
    let decoder = png::Decoder::new(File::open(path)?);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    buf.truncate(info.buffer_size());

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 0xff])
            .collect(),
        other => anyhow::bail!("unsupported logo color type {other:?}"),
    };
    if info.bit_depth != png::BitDepth::Eight {
        anyhow::bail!("unsupported logo bit depth {:?}", info.bit_depth);
    }

    let size = wgpu::Extent3d {
        width: info.width,
        height: info.height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Logo"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &rgba,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * info.width),
            rows_per_image: Some(info.height),
        },
        size,
    );
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_entry_has_no_visual_footprint() {
        let none = resolve(NONE_KEY);
        assert_eq!(none.size, [0.0, 0.0]);
        assert_eq!(none.blend, 0.0);
        assert!(none.asset.is_none());
    }

    #[test]
    fn known_keys_resolve_to_themselves() {
        for key in ["logo-max-white", "logo-ds-black", "logo-era-color"] {
            assert_eq!(resolve(key).key, key);
            assert!(is_known(key));
        }
    }

    #[test]
    fn unknown_keys_fall_back_to_none() {
        let bogus = resolve("logo-bogus");
        assert_eq!(bogus.key, NONE_KEY);
        assert_eq!(bogus.size, [0.0, 0.0]);
        assert!(!is_known("logo-bogus"));
    }

    #[test]
    fn catalog_keys_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert_ne!(a.key, b.key);
            }
        }
    }
}
