use std::fmt;

/// Number of plies to the end of the game under optimal play, or `Infinite`
/// for an unavoidable draw cycle. Ordered with `Infinite` greatest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Distance {
    Finite(u32),
    Infinite,
}

impl Distance {
    pub const ZERO: Distance = Distance::Finite(0);

    pub fn is_finite(self) -> bool {
        matches!(self, Distance::Finite(_))
    }

    /// One ply further from the end. `Infinite` absorbs.
    pub fn plus_one(self) -> Self {
        match self {
            Distance::Finite(d) => Distance::Finite(d.saturating_add(1)),
            Distance::Infinite => Distance::Infinite,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Distance::Finite(d) => d as f32,
            Distance::Infinite => f32::INFINITY,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Finite(d) => write!(f, "{}", d),
            Distance::Infinite => write!(f, "inf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_ordering() {
        assert!(Distance::Finite(0) < Distance::Finite(1));
        assert!(Distance::Finite(1022) < Distance::Infinite);
        assert_eq!(Distance::Infinite, Distance::Infinite);
    }

    #[test]
    fn test_plus_one() {
        assert_eq!(Distance::Finite(3).plus_one(), Distance::Finite(4));
        assert_eq!(Distance::Infinite.plus_one(), Distance::Infinite);
    }
}
