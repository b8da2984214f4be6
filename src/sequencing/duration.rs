/// Note length represented as a rational fraction of a whole note.
/// All operations preserve exact ratios; floats only appear when a
/// duration is converted to seconds or frames at a concrete tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    /// Numerator: how many parts
    pub numerator: u32,
    /// Denominator: of what size (4 = quarter, 8 = eighth, etc.)
    pub denominator: u32,
}

impl Duration {
    pub const QUARTER: Duration = Duration {
        numerator: 1,
        denominator: 4,
    };
    pub const EIGHTH: Duration = Duration {
        numerator: 1,
        denominator: 8,
    };
    pub const SIXTEENTH: Duration = Duration {
        numerator: 1,
        denominator: 16,
    };

    /// Create a triplet: multiply duration by 2/3
    /// (three notes in the time of two)
    pub const fn triplet(self) -> Self {
        self.tuplet(2, 3)
    }

    /// Create a quintuplet: multiply duration by 4/5
    /// (five notes in the time of four)
    pub const fn quintuplet(self) -> Self {
        self.tuplet(4, 5)
    }

    /// General tuplet: `played` notes in the time of `in_time_of` notes
    pub const fn tuplet(self, in_time_of: u32, played: u32) -> Self {
        Duration {
            numerator: self.numerator * in_time_of,
            denominator: self.denominator * played,
        }
        .reduce()
    }

    /// Reduce the fraction to lowest terms using GCD
    pub const fn reduce(self) -> Self {
        let gcd = const_gcd(self.numerator, self.denominator);
        Duration {
            numerator: self.numerator / gcd,
            denominator: self.denominator / gcd,
        }
    }

    /// Add two durations (finds common denominator)
    pub const fn add(self, other: Self) -> Self {
        Duration {
            numerator: self.numerator * other.denominator + other.numerator * self.denominator,
            denominator: self.denominator * other.denominator,
        }
        .reduce()
    }

    /// Length in quarter notes, the unit tempo is expressed in.
    pub fn quarters(&self) -> f64 {
        (self.numerator as f64 * 4.0) / self.denominator as f64
    }

    /// Length in seconds at `tempo` quarter notes per minute.
    pub fn seconds(&self, tempo: f64) -> f64 {
        self.quarters() * 60.0 / tempo
    }

    /// Length in frames at `tempo`, rounded to the nearest frame.
    pub fn frames(&self, tempo: f64, sample_rate: u32) -> i64 {
        (self.seconds(tempo) * sample_rate as f64).round() as i64
    }
}

/// Euclid's algorithm, usable in const context.
const fn const_gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let temp = b;
        b = a % b;
        a = temp;
    }
    a
}
