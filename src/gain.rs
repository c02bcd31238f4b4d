//! Decibel helpers shared by the bus masters, stem gains and the compressor.

/// Lowest master gain accepted, in dB.
pub const MIN_GAIN_DB: f32 = -60.0;
/// Highest master gain accepted, in dB.
pub const MAX_GAIN_DB: f32 = 12.0;

/// Convert decibels to a linear amplitude factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels.
///
/// Silence maps to `-inf`.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Clamp a user supplied master gain into the accepted range. NaN becomes 0 dB.
#[inline]
pub fn clamp_db(db: f32) -> f32 {
    if db.is_nan() {
        0.0
    } else {
        db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

/// The linear factor a master stage must apply for the given mixer values.
#[inline]
pub fn audible_gain(db: f32, muted: bool) -> f32 {
    if muted {
        0.0
    } else {
        db_to_linear(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn unity_and_six_db() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-6.0), 0.501_187, epsilon = 1e-5);
        assert_relative_eq!(linear_to_db(0.5), -6.020_6, epsilon = 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn muted_is_silent() {
        assert_eq!(audible_gain(6.0, true), 0.0);
        assert_relative_eq!(audible_gain(-6.0, false), db_to_linear(-6.0));
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(clamp_db(-120.0), MIN_GAIN_DB);
        assert_eq!(clamp_db(40.0), MAX_GAIN_DB);
        assert_eq!(clamp_db(f32::NAN), 0.0);
    }

    proptest! {
        #[test]
        fn db_round_trip(db in -60.0f32..12.0) {
            let back = linear_to_db(db_to_linear(db));
            prop_assert!((back - db).abs() < 1e-3);
        }
    }
}
