//! Association score functions (§4.6.4). All four must produce finite
//! values even at degenerate inputs; zero is the defined neutral value, and
//! `logDice` is always clamped into `[0, 14]`.

/// `log2( 2 * f(AB) / (f(A)+f(B)) ) + 14`, clamped to `[0, 14]`.
pub fn log_dice(f_ab: u64, f_a: u64, f_b: u64) -> f64 {
  let denom = (f_a + f_b) as f64;
  if denom <= 0.0 || f_ab == 0 {
    return 0.0;
  }
  let raw = (2.0 * f_ab as f64 / denom).log2() + 14.0;
  raw.clamp(0.0, 14.0)
}

/// `log2( f(AB)*N / (f(A)*f(B)) )`, or 0 if either frequency denominator is
/// non-positive.
pub fn mi3(f_ab: u64, f_a: u64, f_b: u64, n: u64) -> f64 {
  if f_a == 0 || f_b == 0 || f_ab == 0 {
    return 0.0;
  }
  let value = (f_ab as f64 * n as f64) / (f_a as f64 * f_b as f64);
  if value <= 0.0 {
    0.0
  } else {
    value.log2()
  }
}

/// Expected co-occurrence count under independence: `f(A)*f(B)/N`.
pub fn expected(f_a: u64, f_b: u64, n: u64) -> f64 {
  if n == 0 {
    return 0.0;
  }
  (f_a as f64 * f_b as f64) / n as f64
}

/// `(f(AB) - E) / sqrt(E)`, or 0 if `E <= 0`.
pub fn t_score(f_ab: u64, e: f64) -> f64 {
  if e <= 0.0 {
    return 0.0;
  }
  (f_ab as f64 - e) / e.sqrt()
}

/// `max(0, 2*f(AB)*ln(f(AB)/E))`, or 0 if `f(AB) == 0` or `E <= 0`.
pub fn log_likelihood(f_ab: u64, e: f64) -> f64 {
  if f_ab == 0 || e <= 0.0 {
    return 0.0;
  }
  let value = 2.0 * f_ab as f64 * (f_ab as f64 / e).ln();
  value.max(0.0)
}

/// All four scores for one (headword, collocate) pair, computed together so
/// callers don't have to recompute `E`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationScores {
  /// Symmetric association measure in `[0, 14]`.
  pub log_dice: f64,
  /// Cubed-frequency-weighted mutual information.
  pub mi3: f64,
  /// T-score.
  pub t_score: f64,
  /// Log-likelihood ratio.
  pub log_likelihood: f64,
}

impl AssociationScores {
  /// Compute every score for `f(AB)`, `f(A)`, `f(B)`, `N`.
  pub fn compute(f_ab: u64, f_a: u64, f_b: u64, n: u64) -> Self {
    let e = expected(f_a, f_b, n);
    AssociationScores {
      log_dice: log_dice(f_ab, f_a, f_b),
      mi3: mi3(f_ab, f_a, f_b, n),
      t_score: t_score(f_ab, e),
      log_likelihood: log_likelihood(f_ab, e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn approx(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
  }

  #[test]
  fn score_determinism_fixture() {
    // f(AB)=50, f(A)=1000, f(B)=2000, N=10^7. mi3 is the only one of the
    // four that an independently-published worked example for this exact
    // fixture agrees with; see DESIGN.md for why the other three assert
    // the value §4.6.4's own formulas produce rather than that example.
    let scores = AssociationScores::compute(50, 1000, 2000, 10_000_000);
    assert!(approx(scores.log_dice, 9.0931, 1e-3), "{}", scores.log_dice);
    assert!(approx(scores.mi3, 7.9658, 1e-3), "{}", scores.mi3);
    assert!(approx(scores.t_score, 111.356, 1e-2), "{}", scores.t_score);
    assert!(
      approx(scores.log_likelihood, 552.146, 1e-2),
      "{}",
      scores.log_likelihood
    );
  }

  #[test]
  fn log_dice_clamps_to_range() {
    // f(AB) == f(A) == f(B): log2(2) + 14 == 15, clamped to 14.
    assert_eq!(log_dice(10, 10, 10), 14.0);
    assert_eq!(log_dice(0, 10, 10), 0.0);
  }

  #[test]
  fn degenerate_inputs_are_finite_and_zero() {
    assert_eq!(mi3(0, 0, 0, 0), 0.0);
    assert_eq!(t_score(5, 0.0), 0.0);
    assert_eq!(log_likelihood(0, 0.0), 0.0);
    assert_eq!(log_dice(0, 0, 0), 0.0);
    for value in [
      log_dice(3, 5, 5),
      mi3(3, 5, 5, 100),
      t_score(3, 0.25),
      log_likelihood(3, 0.25),
    ] {
      assert!(value.is_finite());
    }
  }
}
