use barycenter::image_io::{load_image, quantize, save_npy, save_png, to_u8_image};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array3};
use tempfile::tempdir;

#[test]
fn quantize_rounds_half_up_and_clamps() {
    assert_eq!(quantize(0.0), 0);
    assert_eq!(quantize(1.0), 255);
    assert_eq!(quantize(-0.3), 0);
    assert_eq!(quantize(4.0), 255);
    assert_eq!(quantize(0.5), 128);
    assert_eq!(quantize(1.0 / 255.0), 1);
    assert_eq!(quantize(0.4 / 255.0), 0);
    assert_eq!(quantize(0.6 / 255.0), 1);
}

#[test]
fn png_pixels_are_scaled_to_unit_range() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.png");
    let mut img = RgbImage::new(3, 2);
    img.put_pixel(2, 1, Rgb([255, 51, 0]));
    img.save(&path).unwrap();

    let x = load_image(&path).unwrap();
    assert_eq!(x.dim(), (2, 3, 3));
    assert_eq!(x[(1, 2, 0)], 1.0);
    assert!((x[(1, 2, 1)] - 0.2).abs() < 1e-6);
    assert_eq!(x[(0, 0, 0)], 0.0);
}

#[test]
fn grayscale_png_is_expanded_to_rgb() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gray.png");
    GrayImage::from_pixel(4, 4, Luma([102])).save(&path).unwrap();
    let x = load_image(&path).unwrap();
    assert_eq!(x.dim(), (4, 4, 3));
    assert!(x.iter().all(|&v| (v - 0.4).abs() < 1e-6));
}

#[test]
fn extension_match_is_case_insensitive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upper.PNG");
    RgbImage::new(2, 2).save_with_format(&path, image::ImageFormat::Png).unwrap();
    assert!(load_image(&path).is_ok());
    assert!(load_image(&dir.path().join("thing.gif")).is_err());
    assert!(load_image(&dir.path().join("no_extension")).is_err());
}

#[test]
fn saved_npy_reloads_exactly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.npy");
    let x = Array3::from_shape_fn((3, 4, 3), |(y, x, c)| (y * 12 + x * 3 + c) as f32 / 36.0);
    save_npy(&path, &x).unwrap();
    assert_eq!(load_image(&path).unwrap(), x);
}

#[test]
fn npy_without_color_axis_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flat.npy");
    ndarray_npy::write_npy(&path, &Array2::<f32>::zeros((4, 4))).unwrap();
    assert!(load_image(&path).is_err());

    let two = dir.path().join("two.npy");
    ndarray_npy::write_npy(&two, &Array3::<f32>::zeros((4, 4, 2))).unwrap();
    let err = load_image(&two).unwrap_err();
    assert!(err.to_string().contains("channels"), "{err}");
}

#[test]
fn png_output_matches_quantized_array() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.png");
    let x = Array3::from_shape_fn((5, 7, 3), |(y, x, c)| ((y + x + c) % 5) as f32 / 4.0);
    save_png(&path, &x).unwrap();
    let back = image::open(&path).unwrap().to_rgb8();
    assert_eq!(back, to_u8_image(&x));
    assert_eq!(back.get_pixel(6, 0)[0], quantize(x[(0, 6, 0)]));
}
