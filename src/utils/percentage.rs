use std::{fmt::Display, ops::Deref};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0.round())
    }
}

impl Percentage {
    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. || value.is_nan() {
            None
        } else {
            Some(Percentage(value))
        }
    }

    pub fn capped(self, max: f64) -> Percentage {
        Percentage(self.0.min(max))
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Share of `value` in `whole`. An empty whole yields 0%, same as the dashboard shows for a day
/// without records.
pub fn ms_percentage(value: u64, whole: u64) -> Percentage {
    if whole == 0 {
        return Percentage(0.);
    }
    Percentage::new_opt(value as f64 / whole as f64 * 100.)
        .expect("Percentage should always be at least 0")
}

#[cfg(test)]
mod tests {
    use super::ms_percentage;

    #[test]
    fn test_ms_percentage() {
        assert_eq!(*ms_percentage(0, 0), 0.);
        assert_eq!(*ms_percentage(1, 4), 25.);
        assert_eq!(ms_percentage(2, 3).to_string(), "67%");
        assert_eq!(*ms_percentage(10, 5).capped(100.), 100.);
    }
}
