//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Clamp a value between `min` and `max`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Cubic smoothstep `t² (3 - 2t)`, with `t` clamped to `[0, 1]`.
pub fn smoothstep<T>(t: T) -> T
where
    T: Float,
{
    let zero = T::zero();
    let one = T::one();
    let two = one + one;
    let three = two + one;

    let t = clamp(&t, &zero, &one);

    t * t * (three - two * t)
}

/// Round `value` to the nearest multiple of `step`.
///
/// A non-positive `step` leaves the value unchanged.
pub fn quantize(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }

    (value / step).round() * step
}

/// Round `value` to `places` decimal places.
pub fn round_dp(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert!((lin_map((0.0, 270.0), (600.0, 2400.0), 135.0) - 1500.0).abs() < 1e-9);
        assert!((lin_map((-1.0, 1.0), (0.0, 10.0), 0.5) - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&2.0, &-1.0, &1.0), 1.0);
        assert_eq!(clamp(&-2.0, &-1.0, &1.0), -1.0);
        assert_eq!(clamp(&0.3, &-1.0, &1.0), 0.3);
    }

    #[test]
    fn test_smoothstep() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(1.0), 1.0);
        assert_eq!(smoothstep(0.5), 0.5);
        assert_eq!(smoothstep(-3.0), 0.0);
        assert_eq!(smoothstep(4.0), 1.0);

        let mut last = 0.0;
        for i in 0..=100 {
            let v = smoothstep(i as f64 / 100.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn test_quantize() {
        assert!((quantize(0.337, 0.01) - 0.34).abs() < 1e-9);
        assert!((quantize(100.3, 0.5) - 100.5).abs() < 1e-9);
        assert_eq!(quantize(1.234, 0.0), 1.234);
        assert_eq!(round_dp(0.123456, 3), 0.123);
    }
}
