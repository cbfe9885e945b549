use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Primary key of a campaign row.
    CampaignId
);
numeric_id!(
    /// Store group a campaign delivers to. Touch points are shared per group.
    GroupId
);
numeric_id!(
    /// Primary key of a creative row.
    CreativeId
);

/// Unique point identifier of a physical touch point (beacon, QR stand, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TouchPointId(pub String);

impl TouchPointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TouchPointId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TouchPointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TouchPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
