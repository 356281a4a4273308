use std::fmt;
use std::str::FromStr;

/// The three mutually exclusive kinds of coordinate reference system a handle can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrsType {
    /// Longitude and latitude on an ellipsoid.
    Geographic,
    /// Cartesian X, Y, Z with the origin at the centre of the ellipsoid.
    Geocentric,
    /// Anything else, typically easting and northing on a map projection.
    Projected,
}

impl CrsType {
    pub const ALL: [CrsType; 3] = [CrsType::Geographic, CrsType::Geocentric, CrsType::Projected];

    /// Classify from the two library predicates. Geographic wins over geocentric.
    pub fn classify(is_geographic: bool, is_geocentric: bool) -> Self {
        if is_geographic {
            CrsType::Geographic
        } else if is_geocentric {
            CrsType::Geocentric
        } else {
            CrsType::Projected
        }
    }

    /// The enumeration member name used across the boundary.
    pub fn name(self) -> &'static str {
        match self {
            CrsType::Geographic => "GEOGRAPHIC",
            CrsType::Geocentric => "GEOCENTRIC",
            CrsType::Projected => "PROJECTED",
        }
    }

    /// Look up a member by its exact boundary name. Returns `None` for anything else.
    pub fn from_name(name: &str) -> Option<Self> {
        CrsType::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Number of leading ordinates per tuple that are converted between degrees and radians
    /// around a transform.
    pub fn angular_ordinates(self) -> usize {
        match self {
            CrsType::Geographic => 2,
            CrsType::Geocentric => 3,
            CrsType::Projected => 0,
        }
    }
}

impl fmt::Display for CrsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no CRS type named {0:?}")]
pub struct UnknownCrsType(pub String);

impl FromStr for CrsType {
    type Err = UnknownCrsType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrsType::from_name(s).ok_or_else(|| UnknownCrsType(s.to_string()))
    }
}
