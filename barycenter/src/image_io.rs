use anyhow::{bail, Context, Result};
use image::{io::Reader as ImageReader, Rgb, RgbImage};
use log::{debug, warn};
use ndarray::{s, Array3, ArrayD, Axis, Ix3};
use std::path::Path;

/// 8-bit value of a [0, 1] intensity, `floor(255·v + 0.5)`.
#[inline]
pub fn quantize(v: f32) -> u8 {
    (255.0 * v.clamp(0.0, 1.0) + 0.5).floor() as u8
}

/// Load an image as an `H×W×3` float array in [0, 1].
///
/// `.npy` files are taken as already normalized; `.png` and `.jpg` are decoded
/// and divided by 255. Channels past the third are dropped.
pub fn load_image(path: &Path) -> Result<Array3<f32>> {
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("npy") => load_npy(path),
        Some("png") | Some("jpg") => load_encoded(path),
        _ => bail!("Unknown image type: '{}'", path.display()),
    }
}

fn load_npy(path: &Path) -> Result<Array3<f32>> {
    let mut raw: ArrayD<f32> = match ndarray_npy::read_npy::<_, ArrayD<f32>>(path) {
        Ok(a) => a,
        Err(f32_err) => ndarray_npy::read_npy::<_, ArrayD<f64>>(path)
            .map(|a| a.mapv(|v| v as f32))
            .map_err(|_| f32_err)
            .with_context(|| format!("failed to read '{}'", path.display()))?,
    };
    // Arrays saved with a batch axis come back as 1×H×W×C.
    while raw.ndim() > 3 && raw.shape()[0] == 1 {
        raw = raw.index_axis_move(Axis(0), 0);
    }
    let arr = raw
        .into_dimensionality::<Ix3>()
        .with_context(|| format!("'{}' is not an H×W×C array", path.display()))?;
    take_rgb(arr, path)
}

fn load_encoded(path: &Path) -> Result<Array3<f32>> {
    let dyn_img = ImageReader::open(path)
        .with_context(|| format!("failed to open '{}'", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode '{}'", path.display()))?;
    if dyn_img.color().has_alpha() {
        warn!("'{}': alpha channel ignored", path.display());
    }
    let rgb = dyn_img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let arr = Array3::from_shape_vec((h as usize, w as usize, 3), rgb.into_raw())
        .with_context(|| format!("'{}' has an unexpected pixel layout", path.display()))?;
    Ok(arr.mapv(|v| v as f32 / 255.0))
}

fn take_rgb(arr: Array3<f32>, path: &Path) -> Result<Array3<f32>> {
    let channels = arr.dim().2;
    if channels < 3 {
        bail!("'{}' has {} channels, need at least 3", path.display(), channels);
    }
    if channels > 3 {
        warn!("'{}': {} extra channel(s) ignored", path.display(), channels - 3);
        return Ok(arr.slice(s![.., .., 0..3]).to_owned());
    }
    Ok(arr)
}

pub fn to_u8_image(x: &Array3<f32>) -> RgbImage {
    let (h, w, _) = x.dim();
    RgbImage::from_fn(w as u32, h as u32, |px, py| {
        let (y, xx) = (py as usize, px as usize);
        Rgb([quantize(x[(y, xx, 0)]), quantize(x[(y, xx, 1)]), quantize(x[(y, xx, 2)])])
    })
}

pub fn save_png(path: &Path, x: &Array3<f32>) -> Result<()> {
    write_png(path, &to_u8_image(x))
}

pub fn write_png(path: &Path, img: &RgbImage) -> Result<()> {
    img.save(path).with_context(|| format!("failed to write '{}'", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

pub fn save_npy(path: &Path, x: &Array3<f32>) -> Result<()> {
    ndarray_npy::write_npy(path, x).with_context(|| format!("failed to write '{}'", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}
