use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::{Backend, Tensor};
use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};
use itertools::Itertools;

use crate::error::{check_shape, Error, Result};
use crate::ops::unit_range;

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

pub trait Format {
    const CHANNELS: usize;

    /// Pixels of a `size` x `size` image, channel-major, scaled into [0, 1].
    fn read(path: &Path, size: u32) -> Result<Vec<f32>>;

    fn write(pixels: &[f32], size: [usize; 2], path: &Path) -> Result<()>;
}

pub struct Rgb8;

impl Format for Rgb8 {
    const CHANNELS: usize = 3;

    fn read(path: &Path, size: u32) -> Result<Vec<f32>> {
        let image = image::open(path)?
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        Ok((0..3)
            .flat_map(|channel| image.pixels().map(move |pixel| pixel[channel] as f32 / 255.0))
            .collect())
    }

    fn write(pixels: &[f32], [height, width]: [usize; 2], path: &Path) -> Result<()> {
        let plane = height * width;
        let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let index = y as usize * width + x as usize;
            Rgb([
                to_byte(pixels[index]),
                to_byte(pixels[plane + index]),
                to_byte(pixels[2 * plane + index]),
            ])
        });

        Ok(image.save(path)?)
    }
}

pub struct Gray8;

impl Format for Gray8 {
    const CHANNELS: usize = 1;

    fn read(path: &Path, size: u32) -> Result<Vec<f32>> {
        let image = image::open(path)?
            .resize_exact(size, size, FilterType::Triangle)
            .to_luma8();

        Ok(image.pixels().map(|pixel| pixel[0] as f32 / 255.0).collect())
    }

    fn write(pixels: &[f32], [height, width]: [usize; 2], path: &Path) -> Result<()> {
        let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([to_byte(pixels[y as usize * width + x as usize])])
        });

        Ok(image.save(path)?)
    }
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn read_image(path: &Path, size: u32, channels: usize) -> Result<Vec<f32>> {
    match channels {
        1 => Gray8::read(path, size),
        3 => Rgb8::read(path, size),
        other => Err(Error::Config(format!("unsupported channel count {other}"))),
    }
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()?;

    Ok(paths
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()))
        })
        .sorted()
        .collect())
}

/// Writes N x C x H x W images in [0, 1] as PNG files named `names` into `dir`.
pub fn write_images<B: Backend>(images: Tensor<B, 4>, names: &[String], dir: &Path) -> Result<()> {
    let [batch, channels, height, width] = images.dims();
    check_shape("image names", &[batch], &[names.len()])?;
    fs::create_dir_all(dir)?;

    let pixels = unit_range(images).into_data().iter::<f32>().collect::<Vec<_>>();
    let per_image = channels * height * width;

    for (name, pixels) in names.iter().zip(pixels.chunks(per_image)) {
        let path = dir.join(name).with_extension("png");
        match channels {
            1 => Gray8::write(pixels, [height, width], &path)?,
            3 => Rgb8::write(pixels, [height, width], &path)?,
            other => return Err(Error::Config(format!("unsupported channel count {other}"))),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::env;

    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("imagemodel-io-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn written_images_read_back() {
        let device = Default::default();
        let dir = scratch("roundtrip");
        let values = (0..2 * 3 * 4 * 4).map(|i| (i % 5) as f32 / 4.0).collect::<Vec<_>>();
        let images = Tensor::<NdArray, 4>::from_data(TensorData::new(values.clone(), [2, 3, 4, 4]), &device);

        write_images(images, &["a".to_string(), "b".to_string()], &dir).unwrap();

        let files = list_images(&dir).unwrap();
        assert_eq!(files.len(), 2);

        let first = read_image(&files[0], 4, 3).unwrap();
        for (read, written) in first.iter().zip(&values[..48]) {
            assert!((read - written).abs() < 1.0 / 255.0 + 1e-6);
        }

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn rejects_name_count_mismatch() {
        let device = Default::default();
        let images = Tensor::<NdArray, 4>::zeros([2, 1, 2, 2], &device);

        let result = write_images(images, &["only".to_string()], &scratch("names"));
        assert!(matches!(result, Err(Error::Shape { .. })));
    }
}
