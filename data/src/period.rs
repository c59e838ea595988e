use feed::Interval;

use std::{fmt, str::FromStr};

/// Zoom levels the period switcher offers. Each maps to a fixed sampling
/// interval and a canonical bar count for one historical fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    H1,
    H6,
    D1,
    D3,
    D7,
    Mo1,
    Mo3,
    Y1,
    Y3,
}

impl Period {
    pub const ALL: [Period; 9] = [
        Period::H1,
        Period::H6,
        Period::D1,
        Period::D3,
        Period::D7,
        Period::Mo1,
        Period::Mo3,
        Period::Y1,
        Period::Y3,
    ];

    /// Sampling interval whose bars render this period.
    pub fn interval(self) -> Interval {
        match self {
            Period::H1 => Interval::M1,
            Period::H6 => Interval::M5,
            Period::D1 => Interval::M15,
            Period::D3 => Interval::M30,
            Period::D7 => Interval::H1,
            Period::Mo1 => Interval::H6,
            Period::Mo3 => Interval::H12,
            Period::Y1 => Interval::D1,
            Period::Y3 => Interval::D7,
        }
    }

    /// How many additional bars one backward-extension fetch covers.
    pub fn window_size(self) -> u64 {
        match self {
            Period::H1 => 60,
            Period::H6 => 72,
            Period::D1 => 96,
            Period::D3 => 144,
            Period::D7 => 168,
            Period::Mo1 => 120,
            Period::Mo3 => 180,
            Period::Y1 => 365,
            Period::Y3 => 157,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Period::H1 => "1h",
                Period::H6 => "6h",
                Period::D1 => "1D",
                Period::D3 => "3D",
                Period::D7 => "7D",
                Period::Mo1 => "1M",
                Period::Mo3 => "3M",
                Period::Y1 => "1Y",
                Period::Y3 => "3Y",
            }
        )
    }
}

impl FromStr for Period {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Period::H1),
            "6h" => Ok(Period::H6),
            "1D" => Ok(Period::D1),
            "3D" => Ok(Period::D3),
            "7D" => Ok(Period::D7),
            "1M" => Ok(Period::Mo1),
            "3M" => Ok(Period::Mo3),
            "1Y" => Ok(Period::Y1),
            "3Y" => Ok(Period::Y3),
            _ => Err(UnknownPeriod(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPeriod(pub String);

impl fmt::Display for UnknownPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown period: {}", self.0)
    }
}

impl std::error::Error for UnknownPeriod {}

/// Signed step for walking a series backward in time: one interval,
/// in negative milliseconds.
pub fn step_back_ms(interval: Interval) -> i64 {
    -(interval.to_milliseconds() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_mapping() {
        assert_eq!(Period::H1.interval(), Interval::M1);
        assert_eq!(Period::D1.interval(), Interval::M15);
        assert_eq!(Period::Mo1.interval(), Interval::H6);
        assert_eq!(Period::Y3.interval(), Interval::D7);
    }

    #[test]
    fn window_sizes() {
        let expected: [(Period, u64); 9] = [
            (Period::H1, 60),
            (Period::H6, 72),
            (Period::D1, 96),
            (Period::D3, 144),
            (Period::D7, 168),
            (Period::Mo1, 120),
            (Period::Mo3, 180),
            (Period::Y1, 365),
            (Period::Y3, 157),
        ];

        for (period, window) in expected {
            assert_eq!(period.window_size(), window, "{period}");
        }
    }

    #[test]
    fn backward_steps_are_negative_interval_lengths() {
        assert_eq!(step_back_ms(Interval::M1), -60_000);
        assert_eq!(step_back_ms(Interval::M30), -1_800_000);
        assert_eq!(step_back_ms(Interval::H12), -43_200_000);
        assert_eq!(step_back_ms(Interval::D7), -604_800_000);
    }

    #[test]
    fn labels_parse_back() {
        for period in Period::ALL {
            assert_eq!(period.to_string().parse::<Period>(), Ok(period));
        }
        assert!("2h".parse::<Period>().is_err());
    }
}
