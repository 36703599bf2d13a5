//! Robust loss for outlier-aware optimization
//!
//! The ICP solver only needs the iteratively-reweighted-least-squares weight
//! w(r) = ρ'(r) / r of each residual.

/// Robust loss functions for optimization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobustLoss {
    /// Plain least squares: ρ(r) = r²/2
    L2,
    /// Huber: ρ(r) = { 0.5*r² if |r|≤k, k*(|r| - 0.5*k) otherwise }
    Huber { k: f64 },
}

impl Default for RobustLoss {
    fn default() -> Self {
        RobustLoss::Huber { k: 0.1 }
    }
}

impl RobustLoss {
    /// Weight for reweighted least squares, ρ'(r) / r (1 at r ≈ 0).
    pub fn weight(&self, residual: f64) -> f64 {
        let r = residual.abs();
        if r < 1e-12 {
            return 1.0;
        }

        match *self {
            RobustLoss::L2 => 1.0,
            RobustLoss::Huber { k } => {
                if r <= k {
                    1.0
                } else {
                    k / r
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huber() {
        let loss = RobustLoss::Huber { k: 0.1 };
        assert_eq!(loss.weight(0.0), 1.0);
        assert_eq!(loss.weight(0.05), 1.0);
        assert_eq!(loss.weight(0.1), 1.0);
        assert!((loss.weight(0.4) - 0.25).abs() < 1e-12);
        assert!((loss.weight(-0.4) - 0.25).abs() < 1e-12);
        assert!(loss.weight(1.0) < loss.weight(0.4));
    }

    #[test]
    fn test_l2_is_unweighted() {
        let loss = RobustLoss::L2;
        assert_eq!(loss.weight(100.0), 1.0);
        assert_eq!(loss.weight(-0.3), 1.0);
    }
}
