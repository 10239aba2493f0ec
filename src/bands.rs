// Amateur Radio Band Definitions
// Reference: ADIF 3.1.4 band enumeration
//
// Watch lists are keyed by ADIF band name, so the dial frequency reported
// in every Status packet is mapped through here.

/// (ADIF band name, lower edge MHz, upper edge MHz)
const BANDS: &[(&str, f64, f64)] = &[
    ("2190m", 0.1357, 0.1378),
    ("630m", 0.472, 0.479),
    ("160m", 1.8, 2.0),
    ("80m", 3.5, 4.0),
    ("60m", 5.06, 5.45),
    ("40m", 7.0, 7.3),
    ("30m", 10.1, 10.15),
    ("20m", 14.0, 14.35),
    ("17m", 18.068, 18.168),
    ("15m", 21.0, 21.45),
    ("12m", 24.89, 24.99),
    ("10m", 28.0, 29.7),
    ("6m", 50.0, 54.0),
    ("4m", 70.0, 71.0),
    ("2m", 144.0, 148.0),
    ("1.25m", 222.0, 225.0),
    ("70cm", 420.0, 450.0),
    ("33cm", 902.0, 928.0),
    ("23cm", 1240.0, 1300.0),
];

/// Returns the ADIF band name for a given frequency in MHz
pub fn freq_to_band(freq_mhz: f64) -> Option<&'static str> {
    BANDS
        .iter()
        .find(|(_, lo, hi)| (*lo..=*hi).contains(&freq_mhz))
        .map(|(name, _, _)| *name)
}

/// Convert dial frequency in Hz to band
pub fn freq_hz_to_band(freq_hz: u64) -> Option<&'static str> {
    freq_to_band(freq_hz as f64 / 1_000_000.0)
}

/// True for an ADIF band name (case insensitive)
pub fn is_known_band(band: &str) -> bool {
    BANDS.iter().any(|(name, _, _)| name.eq_ignore_ascii_case(band))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freq_to_band() {
        assert_eq!(freq_to_band(7.074), Some("40m"));
        assert_eq!(freq_to_band(14.074), Some("20m"));
        assert_eq!(freq_to_band(3.573), Some("80m"));
        assert_eq!(freq_to_band(50.313), Some("6m"));
        assert_eq!(freq_to_band(0.474), Some("630m"));
        assert_eq!(freq_to_band(999.0), None);
    }

    #[test]
    fn test_freq_hz_to_band() {
        assert_eq!(freq_hz_to_band(7_074_000), Some("40m"));
        assert_eq!(freq_hz_to_band(14_074_000), Some("20m"));
        assert_eq!(freq_hz_to_band(0), None);
    }

    #[test]
    fn test_is_known_band() {
        assert!(is_known_band("20M"));
        assert!(is_known_band("70cm"));
        assert!(!is_known_band("all"));
    }
}
