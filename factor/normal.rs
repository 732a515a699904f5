//! Normal distribution kernels used by the tetrachoric estimator.
//!
//! The univariate CDF follows Hart's double-precision rational approximation
//! (as arranged by West), the quantile uses Acklam's rational approximation
//! polished with one Halley step, and the bivariate upper-orthant probability
//! follows Genz's Gauss-Legendre scheme built on Drezner and Wesolowsky. All
//! constants are tabulated below; there is no run-time table generation.

use std::f64::consts::PI;

const TWO_PI: f64 = 2.0 * PI;
const SQRT_TWO_PI: f64 = 2.506628274631;

/// Standard normal CDF, accurate to roughly double precision.
pub fn cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let xabs = x.abs();
    let tail = if xabs > 37.0 {
        0.0
    } else {
        let e = (-xabs * xabs / 2.0).exp();
        if xabs < 7.07106781186547 {
            let mut num = 3.52624965998911E-02 * xabs + 0.700383064443688;
            num = num * xabs + 6.37396220353165;
            num = num * xabs + 33.912866078383;
            num = num * xabs + 112.079291497871;
            num = num * xabs + 221.213596169931;
            num = num * xabs + 220.206867912376;

            let mut den = 8.83883476483184E-02 * xabs + 1.75566716318264;
            den = den * xabs + 16.064177579207;
            den = den * xabs + 86.7807322029461;
            den = den * xabs + 296.564248779674;
            den = den * xabs + 637.333633378831;
            den = den * xabs + 793.826512519948;
            den = den * xabs + 440.413735824752;
            e * num / den
        } else {
            let mut b = xabs + 0.65;
            b = xabs + 4.0 / b;
            b = xabs + 3.0 / b;
            b = xabs + 2.0 / b;
            b = xabs + 1.0 / b;
            e / b / SQRT_TWO_PI
        }
    };
    if x > 0.0 { 1.0 - tail } else { tail }
}

/// Standard normal density.
pub fn pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_TWO_PI
}

const ACKLAM_A: [f64; 6] = [
    -3.969683028665376e+01,
    2.209460984245205e+02,
    -2.759285104469687e+02,
    1.383577518672690e+02,
    -3.066479806614716e+01,
    2.506628277459239e+00,
];
const ACKLAM_B: [f64; 5] = [
    -5.447609879822406e+01,
    1.615858368580409e+02,
    -1.556989798598866e+02,
    6.680131188771972e+01,
    -1.328068155288572e+01,
];
const ACKLAM_C: [f64; 6] = [
    -7.784894002430293e-03,
    -3.223964580411365e-01,
    -2.400758277161838e+00,
    -2.549732539343734e+00,
    4.374664141464968e+00,
    2.938163982698783e+00,
];
const ACKLAM_D: [f64; 4] = [
    7.784695709041462e-03,
    3.224671290700398e-01,
    2.445134137142996e+00,
    3.754408661907416e+00,
];
const P_LOW: f64 = 0.02425;

fn tail_quantile(q: f64) -> f64 {
    let c = &ACKLAM_C;
    let d = &ACKLAM_D;
    (((((c[0] * q + c[1]) * q + c[2]) * q + c[3]) * q + c[4]) * q + c[5])
        / ((((d[0] * q + d[1]) * q + d[2]) * q + d[3]) * q + 1.0)
}

/// Inverse of [`cdf`]. Returns `-inf`/`inf` at 0 and 1 and NaN outside [0, 1].
pub fn quantile(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    let x = if p < P_LOW {
        tail_quantile((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let a = &ACKLAM_A;
        let b = &ACKLAM_B;
        let q = p - 0.5;
        let r = q * q;
        (((((a[0] * r + a[1]) * r + a[2]) * r + a[3]) * r + a[4]) * r + a[5]) * q
            / (((((b[0] * r + b[1]) * r + b[2]) * r + b[3]) * r + b[4]) * r + 1.0)
    } else {
        -tail_quantile((-2.0 * (1.0 - p).ln()).sqrt())
    };

    // One Halley step against the double-precision CDF.
    let e = cdf(x) - p;
    let u = e * SQRT_TWO_PI * (x * x / 2.0).exp();
    x - u / (1.0 + x * u / 2.0)
}

/// Bivariate standard normal density with correlation `r`.
pub fn bivariate_pdf(h: f64, k: f64, r: f64) -> f64 {
    let one_minus = 1.0 - r * r;
    (-(h * h - 2.0 * r * h * k + k * k) / (2.0 * one_minus)).exp() / (TWO_PI * one_minus.sqrt())
}

// Gauss-Legendre half-rules on [-1, 1]: nodes `x` pair as 1 - x and 1 + x.
const GL6_W: [f64; 3] = [0.1713244923791705, 0.3607615730481384, 0.4679139345726904];
const GL6_X: [f64; 3] = [0.9324695142031522, 0.6612093864662647, 0.2386191860831970];

const GL12_W: [f64; 6] = [
    0.04717533638651177,
    0.1069393259953183,
    0.1600783285433464,
    0.2031674267230659,
    0.2334925365383547,
    0.2491470458134029,
];
const GL12_X: [f64; 6] = [
    0.9815606342467191,
    0.9041172563704750,
    0.7699026741943050,
    0.5873179542866171,
    0.3678314989981802,
    0.1252334085114692,
];

const GL20_W: [f64; 10] = [
    0.01761400713915212,
    0.04060142980038694,
    0.06267204833410906,
    0.08327674157670475,
    0.1019301198172404,
    0.1181945319615184,
    0.1316886384491766,
    0.1420961093183821,
    0.1491729864726037,
    0.1527533871307259,
];
const GL20_X: [f64; 10] = [
    0.9931285991850949,
    0.9639719272779138,
    0.9122344282513259,
    0.8391169718222188,
    0.7463319064601508,
    0.6360536807265150,
    0.5108670019508271,
    0.3737060887154196,
    0.2277858511416451,
    0.07652652113349733,
];

fn gauss_legendre(r: f64) -> (&'static [f64], &'static [f64]) {
    let ar = r.abs();
    if ar < 0.3 {
        (&GL6_W, &GL6_X)
    } else if ar < 0.75 {
        (&GL12_W, &GL12_X)
    } else {
        (&GL20_W, &GL20_X)
    }
}

/// `P(X > h, Y > k)` for standard bivariate normal `(X, Y)` with correlation `r`.
pub fn bivariate_upper(h: f64, k: f64, r: f64) -> f64 {
    if h == f64::INFINITY || k == f64::INFINITY {
        return 0.0;
    }
    if h == f64::NEG_INFINITY {
        return if k == f64::NEG_INFINITY { 1.0 } else { cdf(-k) };
    }
    if k == f64::NEG_INFINITY {
        return cdf(-h);
    }
    if r == 0.0 {
        return cdf(-h) * cdf(-k);
    }

    let (weights, nodes) = gauss_legendre(r);
    let points = || {
        weights
            .iter()
            .zip(nodes)
            .flat_map(|(&w, &x)| [(w, 1.0 - x), (w, 1.0 + x)])
    };

    let mut k = k;
    let mut hk = h * k;
    let mut bvn = 0.0;

    if r.abs() < 0.925 {
        let hs = (h * h + k * k) / 2.0;
        let asr = r.asin() / 2.0;
        let sum: f64 = points()
            .map(|(w, x)| {
                let sn = (asr * x).sin();
                w * ((sn * hk - hs) / (1.0 - sn * sn)).exp()
            })
            .sum();
        bvn = sum * asr / TWO_PI + cdf(-h) * cdf(-k);
    } else {
        if r < 0.0 {
            k = -k;
            hk = -hk;
        }
        if r.abs() < 1.0 {
            let a_s = 1.0 - r * r;
            let mut a = a_s.sqrt();
            let bs = (h - k) * (h - k);
            let c = (4.0 - hk) / 8.0;
            let d = (12.0 - hk) / 80.0;
            let asr = -(bs / a_s + hk) / 2.0;
            if asr > -100.0 {
                bvn = a * asr.exp() * (1.0 - c * (bs - a_s) * (1.0 - d * bs) / 3.0 + c * d * a_s * a_s);
            }
            if hk > -100.0 {
                let b = bs.sqrt();
                let sp = TWO_PI.sqrt() * cdf(-b / a);
                bvn -= (-hk / 2.0).exp() * sp * b * (1.0 - c * bs * (1.0 - d * bs) / 3.0);
            }
            a /= 2.0;
            let sum: f64 = points()
                .filter_map(|(w, x)| {
                    let xs = (a * x) * (a * x);
                    let asr = -(bs / xs + hk) / 2.0;
                    if asr <= -100.0 {
                        return None;
                    }
                    let sp = 1.0 + c * xs * (1.0 + 5.0 * d * xs);
                    let rs = (1.0 - xs).sqrt();
                    let ep = (-(hk / 2.0) * xs / ((1.0 + rs) * (1.0 + rs))).exp() / rs;
                    Some(w * asr.exp() * (sp - ep))
                })
                .sum();
            bvn = (a * sum - bvn) / TWO_PI;
        }
        if r > 0.0 {
            bvn += cdf(-h.max(k));
        } else if h >= k {
            bvn = -bvn;
        } else {
            let l = if h < 0.0 { cdf(k) - cdf(h) } else { cdf(-h) - cdf(-k) };
            bvn = l - bvn;
        }
    }
    bvn.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cdf_reference_values() {
        assert_abs_diff_eq!(cdf(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(cdf(1.0), 0.8413447460685429, epsilon = 1e-14);
        assert_abs_diff_eq!(cdf(-1.959963984540054), 0.025, epsilon = 1e-14);
        assert_abs_diff_eq!(cdf(-8.0), 6.22096057427178e-16, epsilon = 1e-20);
        assert_eq!(cdf(40.0), 1.0);
        assert_eq!(cdf(-40.0), 0.0);
    }

    #[test]
    fn test_quantile_inverts_cdf() {
        for &p in &[1e-10, 0.001, 0.02, 0.1, 0.3, 0.5, 0.77, 0.975, 0.9999] {
            assert_abs_diff_eq!(cdf(quantile(p)), p, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(quantile(0.975), 1.959963984540054, epsilon = 1e-12);
        assert!(quantile(1.5).is_nan());
        assert_eq!(quantile(0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_bivariate_orthant_closed_form() {
        // At the origin P = 1/4 + asin(r) / (2 pi) for every correlation.
        for &r in &[-0.95, -0.8, -0.5, -0.1, 0.2, 0.5, 0.7071, 0.9, 0.95, 0.99] {
            let expected = 0.25 + f64::asin(r) / TWO_PI;
            assert_abs_diff_eq!(bivariate_upper(0.0, 0.0, r), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bivariate_limits_and_symmetry() {
        assert_abs_diff_eq!(bivariate_upper(0.3, -0.4, 0.0), cdf(-0.3) * cdf(0.4), epsilon = 1e-15);
        assert_abs_diff_eq!(bivariate_upper(f64::NEG_INFINITY, 0.5, 0.4), cdf(-0.5), epsilon = 1e-15);
        assert_eq!(bivariate_upper(f64::INFINITY, 0.5, 0.4), 0.0);
        for &r in &[-0.96, -0.6, 0.1, 0.6, 0.96] {
            let a = bivariate_upper(0.4, -1.1, r);
            let b = bivariate_upper(-1.1, 0.4, r);
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            // Margins bound the joint probability.
            assert!(a <= cdf(-0.4) + 1e-12 && a <= cdf(1.1) + 1e-12);
        }
    }

    #[test]
    fn test_bivariate_continuous_across_branches() {
        for &r in &[0.3, 0.75, 0.925] {
            let below = bivariate_upper(0.5, 0.8, r - 1e-9);
            let above = bivariate_upper(0.5, 0.8, r + 1e-9);
            assert_abs_diff_eq!(below, above, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bivariate_density_integrates_derivative() {
        // d/dr P(X > h, Y > k) equals the bivariate density at (h, k).
        let (h, k, r) = (0.3, -0.7, 0.45);
        let step = 1e-5;
        let numeric = (bivariate_upper(h, k, r + step) - bivariate_upper(h, k, r - step)) / (2.0 * step);
        assert_abs_diff_eq!(numeric, bivariate_pdf(h, k, r), epsilon = 1e-7);
        assert_abs_diff_eq!(pdf(0.0), 1.0 / SQRT_TWO_PI, epsilon = 1e-15);
    }
}
