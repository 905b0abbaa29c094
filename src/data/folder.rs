//! Image datasets read eagerly from directories.

use std::io::{Error as IoError, ErrorKind};
use std::path::Path;

use burn::data::dataset::Dataset;
use rayon::prelude::*;
use tracing::info;

use crate::data::{ImageItem, InpaintingItem};
use crate::error::Result;
use crate::io::{list_images, read_image};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_item(path: &Path, size: usize, channels: usize) -> Result<ImageItem> {
    Ok(ImageItem {
        name: file_name(path),
        pixels: read_image(path, size as u32, channels)?,
        channels,
        size,
    })
}

/// Every image directly inside a directory, resized to `size` x `size`.
pub struct ImageFolderDataset {
    items: Vec<ImageItem>,
}

impl ImageFolderDataset {
    pub fn load(dir: impl AsRef<Path>, size: usize, channels: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let paths = list_images(dir)?;

        let items = paths
            .par_iter()
            .map(|path| load_item(path, size, channels))
            .collect::<Result<Vec<_>>>()?;

        info!(dir = %dir.display(), images = items.len(), "loaded image folder");
        Ok(Self { items })
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Pairs `inputs/<name>` (masked) with `targets/<name>` (complete).
pub struct InpaintingDataset {
    items: Vec<InpaintingItem>,
}

impl InpaintingDataset {
    pub fn load(dir: impl AsRef<Path>, size: usize, channels: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let targets = list_images(&dir.join("targets"))?;

        let items = targets
            .par_iter()
            .map(|target| -> Result<InpaintingItem> {
                let input = dir.join("inputs").join(file_name(target));
                if !input.is_file() {
                    return Err(IoError::new(
                        ErrorKind::NotFound,
                        format!("no masked input for {}", target.display()),
                    )
                    .into());
                }

                Ok(InpaintingItem {
                    input: load_item(&input, size, channels)?,
                    target: load_item(target, size, channels)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(dir = %dir.display(), pairs = items.len(), "loaded inpainting pairs");
        Ok(Self { items })
    }
}

impl Dataset<InpaintingItem> for InpaintingDataset {
    fn get(&self, index: usize) -> Option<InpaintingItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::error::Error;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("imagemodel-folder-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, shade: u8) {
        RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade])).save(path).unwrap();
    }

    #[test]
    fn loads_and_resizes_folder() {
        let dir = scratch("images");
        write(&dir.join("b.png"), 255);
        write(&dir.join("a.png"), 0);
        fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let dataset = ImageFolderDataset::load(&dir, 4, 3).unwrap();
        assert_eq!(dataset.len(), 2);

        let first = dataset.get(0).unwrap();
        assert_eq!(first.name, "a.png");
        assert_eq!(first.pixels.len(), 3 * 4 * 4);
        assert!(dataset.get(1).unwrap().pixels.iter().all(|&value| value > 0.99));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn pairs_inputs_with_targets() {
        let dir = scratch("pairs");
        fs::create_dir_all(dir.join("inputs")).unwrap();
        fs::create_dir_all(dir.join("targets")).unwrap();
        write(&dir.join("inputs/x.png"), 0);
        write(&dir.join("targets/x.png"), 200);

        let dataset = InpaintingDataset::load(&dir, 8, 1).unwrap();
        let item = dataset.get(0).unwrap();
        assert_eq!(item.input.name, item.target.name);
        assert!(item.target.pixels[0] > item.input.pixels[0]);

        write(&dir.join("targets/y.png"), 10);
        assert!(matches!(InpaintingDataset::load(&dir, 8, 1), Err(Error::Io(_))));

        fs::remove_dir_all(dir).unwrap();
    }
}
