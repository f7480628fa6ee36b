use elpips::{get_config, Config, Metric, MetricError, PerceptualMetric};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn noise_image(h: usize, w: usize, seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((h, w, 3), |_| rng.gen_range(0.1f32..0.9))
}

fn calibrated(name: &str, h: usize, w: usize) -> Config {
    let mut cfg = get_config(name).expect("known metric");
    cfg.set_scale_levels_by_image_size(h, w);
    cfg
}

fn dot(a: &Array3<f32>, b: &Array3<f32>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

#[test]
fn unknown_metric_is_rejected() {
    match get_config("ssim") {
        Err(MetricError::UnsupportedMetric(name)) => assert_eq!(name, "ssim"),
        other => panic!("expected UnsupportedMetric, got {other:?}"),
    }
    for name in elpips::METRIC_NAMES {
        assert!(get_config(name).is_ok(), "{name} should be available");
    }
}

#[test]
fn identical_images_have_zero_distance_and_gradient() {
    let img = noise_image(24, 20, 1);
    for name in elpips::METRIC_NAMES {
        let mut metric = Metric::with_seed(calibrated(name, 24, 20), 11);
        let eval = metric.forward_with_gradient(&[img.clone()], &img).unwrap();
        assert_eq!(eval.distances, vec![0.0]);
        assert!(eval.gradients[0].iter().all(|v| *v == 0.0), "{name}");
    }
}

#[test]
fn distinct_images_are_apart_and_symmetric() {
    let a = noise_image(32, 32, 2);
    let b = noise_image(32, 32, 3);
    let mut metric = Metric::new(calibrated("lpips_vgg", 32, 32));
    let ab = metric.forward(&[a.clone()], &b).unwrap()[0];
    let ba = metric.forward(&[b.clone()], &a).unwrap()[0];
    assert!(ab > 0.0);
    assert!((ab - ba).abs() < 1e-5 * ab.max(1.0));
}

#[test]
fn one_distance_per_reference() {
    let a = noise_image(16, 16, 4);
    let b = noise_image(16, 16, 5);
    let x = noise_image(16, 16, 6);
    let mut metric = Metric::with_seed(calibrated("elpips_vgg", 16, 16), 0);
    let eval = metric.forward_with_gradient(&[a, b], &x).unwrap();
    assert_eq!(eval.distances.len(), 2);
    assert_eq!(eval.gradients.len(), 2);
    assert_eq!(eval.gradients[1].dim(), (16, 16, 3));
}

fn check_directional_derivative(name: &str, seed: u64) {
    let (h, w) = (40, 36);
    let cfg = calibrated(name, h, w);
    let reference = noise_image(h, w, 10);
    let x = noise_image(h, w, 11);
    let mut rng = StdRng::seed_from_u64(12);
    let direction = Array3::from_shape_fn((h, w, 3), |_| rng.gen_range(-1.0f32..1.0));

    let eval = Metric::with_seed(cfg.clone(), seed).forward_with_gradient(&[reference.clone()], &x).unwrap();
    let analytic = dot(&eval.gradients[0], &direction);

    let eps = 1e-3f32;
    let plus = &x + &(&direction * eps);
    let minus = &x - &(&direction * eps);
    let d_plus = Metric::with_seed(cfg.clone(), seed).forward(&[reference.clone()], &plus).unwrap()[0] as f64;
    let d_minus = Metric::with_seed(cfg, seed).forward(&[reference], &minus).unwrap()[0] as f64;
    let numeric = (d_plus - d_minus) / (2.0 * eps as f64);

    let tol = 0.05 * analytic.abs().max(1e-3);
    assert!((numeric - analytic).abs() < tol, "{name}: numeric {numeric} vs analytic {analytic}");
}

#[test]
fn gradient_matches_finite_difference_lpips() {
    check_directional_derivative("lpips_vgg", 0);
    check_directional_derivative("lpips_squeeze", 0);
}

#[test]
fn gradient_matches_finite_difference_under_ensemble_transform() {
    check_directional_derivative("elpips_vgg", 21);
    check_directional_derivative("elpips_vgg", 22);
}

#[test]
fn seeded_ensemble_is_reproducible() {
    let a = noise_image(32, 32, 7);
    let x = noise_image(32, 32, 8);
    let cfg = calibrated("elpips_squeeze_maxpool", 32, 32);
    let d1 = Metric::with_seed(cfg.clone(), 5).forward(&[a.clone()], &x).unwrap();
    let d2 = Metric::with_seed(cfg, 5).forward(&[a], &x).unwrap();
    assert_eq!(d1, d2);
}

#[test]
fn mismatched_shapes_are_rejected() {
    let a = noise_image(8, 8, 1);
    let x = noise_image(8, 9, 2);
    let mut metric = Metric::new(calibrated("lpips_vgg", 8, 8));
    assert!(matches!(
        metric.forward(&[a], &x),
        Err(MetricError::ShapeMismatch { index: 0, .. })
    ));
}

#[test]
fn values_outside_the_color_domain_are_non_finite() {
    let a = noise_image(8, 8, 1);
    let mut x = noise_image(8, 8, 2);
    x[(3, 3, 1)] = -0.5;
    let mut metric = Metric::new(calibrated("lpips_squeeze", 8, 8));
    assert!(matches!(
        metric.forward_with_gradient(&[a], &x),
        Err(MetricError::NonFinite { index: 0, .. })
    ));
}
