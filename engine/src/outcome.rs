/// Game result from white's point of view. Ordered so that a larger outcome
/// is always better for the maximizing (white) player.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Outcome {
    Loss,
    Draw,
    Win,
}

impl Outcome {
    pub fn signum(self) -> i8 {
        match self {
            Outcome::Loss => -1,
            Outcome::Draw => 0,
            Outcome::Win => 1,
        }
    }

    pub fn from_signum(value: i8) -> Option<Self> {
        match value {
            -1 => Some(Outcome::Loss),
            0 => Some(Outcome::Draw),
            1 => Some(Outcome::Win),
            _ => None,
        }
    }

    pub fn value(self) -> f32 {
        self.signum() as f32
    }

    /// The outcome with the winner negated.
    pub fn flipped(self) -> Self {
        match self {
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
            Outcome::Win => Outcome::Loss,
        }
    }

    /// The best achievable outcome for the side to move.
    pub fn optimal_for(is_maximizing: bool) -> Self {
        if is_maximizing {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_ordering_favors_white() {
        assert!(Outcome::Win > Outcome::Draw);
        assert!(Outcome::Draw > Outcome::Loss);
    }

    #[test]
    fn test_outcome_flip_is_involution() {
        for outcome in [Outcome::Loss, Outcome::Draw, Outcome::Win] {
            assert_eq!(outcome.flipped().flipped(), outcome);
        }
        assert_eq!(Outcome::Win.flipped(), Outcome::Loss);
        assert_eq!(Outcome::Draw.flipped(), Outcome::Draw);
    }

    #[test]
    fn test_outcome_signum_round_trip() {
        for outcome in [Outcome::Loss, Outcome::Draw, Outcome::Win] {
            assert_eq!(Outcome::from_signum(outcome.signum()), Some(outcome));
        }
        assert_eq!(Outcome::from_signum(2), None);
    }
}
