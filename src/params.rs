//! Reading `+key=value` definition strings.
//!
//! The legacy ABI only exposes units, axis order and prime meridian as fields of its internal
//! struct. [`ProjParams`] recovers the same values from the expanded definition the library
//! hands back, using the library's own unit and prime meridian tables.

/// Linear units known to the library, with their conversion factor to metres.
const UNITS: [(&str, &str); 21] = [
    ("km", "1000"),
    ("m", "1"),
    ("dm", "1/10"),
    ("cm", "1/100"),
    ("mm", "1/1000"),
    ("kmi", "1852"),
    ("in", "0.0254"),
    ("ft", "0.3048"),
    ("yd", "0.9144"),
    ("mi", "1609.344"),
    ("fath", "1.8288"),
    ("ch", "20.1168"),
    ("link", "0.201168"),
    ("us-in", "1/39.37"),
    ("us-ft", "0.304800609601219"),
    ("us-yd", "0.914401828803658"),
    ("us-ch", "20.11684023368047"),
    ("us-mi", "1609.347218694437"),
    ("ind-yd", "0.91439523"),
    ("ind-ft", "0.30479841"),
    ("ind-ch", "20.11669506"),
];

/// Named prime meridians, longitude from Greenwich.
const PRIME_MERIDIANS: [(&str, &str); 13] = [
    ("greenwich", "0dE"),
    ("lisbon", "9d07'54.862\"W"),
    ("paris", "2d20'14.025\"E"),
    ("bogota", "74d04'51.3\"W"),
    ("madrid", "3d41'14.55\"W"),
    ("rome", "12d27'8.4\"E"),
    ("bern", "7d26'22.5\"E"),
    ("jakarta", "106d48'27.79\"E"),
    ("ferro", "17d40'W"),
    ("brussels", "4d22'4.71\"E"),
    ("stockholm", "18d3'29.8\"E"),
    ("athens", "23d42'58.815\"E"),
    ("oslo", "10d43'22.5\"E"),
];

/// Axis order assumed when a definition has no `+axis`.
pub const DEFAULT_AXIS: &str = "enu";

/// The parameters of one definition string, in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjParams<'a> {
    entries: Vec<(&'a str, Option<&'a str>)>,
}

impl<'a> ProjParams<'a> {
    pub fn parse(definition: &'a str) -> Self {
        let entries = definition
            .split_whitespace()
            .map(|token| token.trim_start_matches('+'))
            .filter(|token| !token.is_empty())
            .map(|token| match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            })
            .collect();
        ProjParams { entries }
    }

    /// Value of the first occurrence of `key`. Flags without a value yield `None`.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| *v)
    }

    /// Whether `key` appears at all, with or without a value.
    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    pub fn projection(&self) -> Option<&'a str> {
        self.get("proj")
    }

    pub fn axis(&self) -> &'a str {
        self.get("axis").unwrap_or(DEFAULT_AXIS)
    }

    /// Horizontal (`vertical == false`) or vertical linear unit, in metres.
    ///
    /// `+units` wins over `+to_meter`; the vertical unit falls back to the horizontal one.
    /// `None` when a unit name or factor cannot be understood.
    pub fn linear_unit_to_metre(&self, vertical: bool) -> Option<f64> {
        let (units, factor) = if vertical {
            ("vunits", "vto_meter")
        } else {
            ("units", "to_meter")
        };
        if let Some(name) = self.get(units) {
            return unit_to_metre(name);
        }
        if let Some(value) = self.get(factor) {
            return parse_factor(value);
        }
        if vertical {
            self.linear_unit_to_metre(false)
        } else {
            Some(1.0)
        }
    }

    /// Prime meridian longitude in degrees east of Greenwich; zero when absent.
    pub fn prime_meridian_degrees(&self) -> Option<f64> {
        match self.get("pm") {
            None => Some(0.0),
            Some(pm) => match PRIME_MERIDIANS.iter().find(|(name, _)| *name == pm) {
                Some((_, dms)) => parse_dms(dms),
                None => parse_dms(pm),
            },
        }
    }
}

/// Factor to metres for a unit abbreviation such as `us-ft`.
pub fn unit_to_metre(name: &str) -> Option<f64> {
    UNITS
        .iter()
        .find(|(id, _)| *id == name)
        .and_then(|(_, factor)| parse_factor(factor))
}

/// Parse `0.3048` or a ratio such as `1200/3937`.
pub fn parse_factor(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().ok()?;
            let denominator: f64 = denominator.trim().parse().ok()?;
            (denominator != 0.0).then(|| numerator / denominator)
        }
        None => value.trim().parse().ok(),
    }
}

/// Parse an angle written as decimal degrees (`-74.08`) or degrees, minutes and seconds with
/// an optional hemisphere suffix (`2d20'14.025"E`, `17d40'W`).
pub fn parse_dms(value: &str) -> Option<f64> {
    let value = value.trim();
    let (body, mut sign) = match value.char_indices().last() {
        Some((i, 'E' | 'e' | 'N' | 'n')) => (&value[..i], 1.0),
        Some((i, 'W' | 'w' | 'S' | 's')) => (&value[..i], -1.0),
        _ => (value, 1.0),
    };
    let body = if let Some(rest) = body.strip_prefix('-') {
        sign = -sign;
        rest
    } else {
        body.strip_prefix('+').unwrap_or(body)
    };
    if body.is_empty() {
        return None;
    }

    let mut total = 0.0;
    let mut rest = body;
    for (markers, divisor) in [(&['d', 'D'][..], 1.0), (&['\''][..], 60.0), (&['"'][..], 3600.0)] {
        if rest.is_empty() {
            break;
        }
        match rest.find(markers) {
            Some(i) => {
                total += rest[..i].parse::<f64>().ok()? / divisor;
                rest = &rest[i + 1..];
            }
            None => {
                total += rest.parse::<f64>().ok()? / divisor;
                rest = "";
            }
        }
    }
    rest.is_empty().then_some(sign * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse() {
        let params = ProjParams::parse(" +proj=utm +zone=33 +south +datum=WGS84  +units=m +no_defs");
        assert_eq!(params.projection(), Some("utm"));
        assert_eq!(params.get("zone"), Some("33"));
        assert!(params.has("south"));
        assert_eq!(params.get("south"), None);
        assert!(!params.has("north"));
        assert_eq!(params.axis(), "enu");
    }

    #[test]
    fn test_first_occurrence_wins() {
        let params = ProjParams::parse("+proj=merc +lon_0=10 +lon_0=20");
        assert_eq!(params.get("lon_0"), Some("10"));
    }

    #[test]
    fn test_linear_units() {
        let params = ProjParams::parse("+proj=tmerc +units=us-ft");
        assert_relative_eq!(params.linear_unit_to_metre(false).unwrap(), 0.304800609601219);
        // vertical falls back to horizontal
        assert_relative_eq!(params.linear_unit_to_metre(true).unwrap(), 0.304800609601219);

        let params = ProjParams::parse("+proj=tmerc +to_meter=1200/3937 +vto_meter=0.3048");
        assert_relative_eq!(params.linear_unit_to_metre(false).unwrap(), 1200.0 / 3937.0);
        assert_relative_eq!(params.linear_unit_to_metre(true).unwrap(), 0.3048);

        let params = ProjParams::parse("+proj=tmerc +units=km +vunits=ft");
        assert_eq!(params.linear_unit_to_metre(false), Some(1000.0));
        assert_relative_eq!(params.linear_unit_to_metre(true).unwrap(), 0.3048);

        assert_eq!(ProjParams::parse("+proj=longlat").linear_unit_to_metre(false), Some(1.0));
        assert_eq!(ProjParams::parse("+proj=merc +units=furlong").linear_unit_to_metre(false), None);
    }

    #[test]
    fn test_prime_meridian() {
        assert_eq!(ProjParams::parse("+proj=longlat").prime_meridian_degrees(), Some(0.0));
        assert_relative_eq!(
            ProjParams::parse("+proj=longlat +pm=paris").prime_meridian_degrees().unwrap(),
            2.337_229_166_666_667,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            ProjParams::parse("+proj=longlat +pm=ferro").prime_meridian_degrees().unwrap(),
            -17.666_666_666_666_67,
            epsilon = 1e-12
        );
        assert_eq!(ProjParams::parse("+proj=longlat +pm=-3.5").prime_meridian_degrees(), Some(-3.5));
        assert_eq!(ProjParams::parse("+proj=longlat +pm=atlantis").prime_meridian_degrees(), None);
    }

    #[test]
    fn test_parse_dms() {
        assert_eq!(parse_dms("0dE"), Some(0.0));
        assert_eq!(parse_dms("12.5"), Some(12.5));
        assert_eq!(parse_dms("+12.5"), Some(12.5));
        assert_eq!(parse_dms("-74.08"), Some(-74.08));
        assert_relative_eq!(parse_dms("9d07'54.862\"W").unwrap(), -9.131_906_111_111_11, epsilon = 1e-12);
        assert_relative_eq!(parse_dms("10D30'").unwrap(), 10.5);
        assert_relative_eq!(parse_dms("-10d30'S").unwrap(), 10.5);
        assert_eq!(parse_dms(""), None);
        assert_eq!(parse_dms("W"), None);
        assert_eq!(parse_dms("12x"), None);
    }

    #[test]
    fn test_parse_factor() {
        assert_eq!(parse_factor("0.3048"), Some(0.3048));
        assert_eq!(parse_factor("1/4"), Some(0.25));
        assert_eq!(parse_factor("1/0"), None);
        assert_eq!(parse_factor("one"), None);
        assert_eq!(unit_to_metre("dm"), Some(0.1));
    }
}
