/// Fractional EPS growth from trailing to forward. Undefined unless trailing
/// EPS is strictly positive.
pub fn eps_growth(forward_eps: Option<f64>, trailing_eps: Option<f64>) -> Option<f64> {
    match (forward_eps, trailing_eps) {
        (Some(fwd), Some(trailing)) if trailing > 0.0 => {
            Some((fwd - trailing) / trailing).filter(|g| g.is_finite())
        }
        _ => None,
    }
}

/// Forward P/E over percent growth. Undefined unless growth is positive.
pub fn peg_ratio(forward_pe: Option<f64>, growth: Option<f64>) -> Option<f64> {
    match (forward_pe, growth) {
        (Some(pe), Some(g)) if g > 0.0 => Some(pe / (g * 100.0)).filter(|p| p.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peg_scenario() {
        let growth = eps_growth(Some(5.0), Some(4.0));
        assert_eq!(growth, Some(0.25));
        let peg = peg_ratio(Some(20.0), growth).unwrap();
        assert!((peg - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_trailing_is_undefined() {
        for fwd in [-3.0, 0.0, 3.0] {
            for trailing in [-1.0, 0.0] {
                let growth = eps_growth(Some(fwd), Some(trailing));
                assert_eq!(growth, None);
                assert_eq!(peg_ratio(Some(20.0), growth), None);
            }
        }
    }

    #[test]
    fn test_non_positive_growth_has_no_peg() {
        assert_eq!(eps_growth(Some(4.0), Some(4.0)), Some(0.0));
        assert_eq!(peg_ratio(Some(20.0), Some(0.0)), None);
        assert_eq!(peg_ratio(Some(20.0), Some(-0.1)), None);
        assert_eq!(peg_ratio(None, Some(0.25)), None);
    }
}
