use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the trader instance running on this node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraderId {
    pub name: String,
    pub tag: String,
}

impl TraderId {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Rendered `name-tag`, also used as the persistence key namespace
    pub fn value(&self) -> String {
        format!("{}-{}", self.name, self.tag)
    }
}

impl std::fmt::Display for TraderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.tag)
    }
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_identifier!(
    /// Strategy identifier, unique per trader
    StrategyId
);
string_identifier!(
    /// Instrument identifier (e.g., "BTCUSDT.SIM")
    InstrumentId
);
string_identifier!(
    /// Client-assigned order identifier
    ClientOrderId
);

impl ClientOrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trader_id_value() {
        let trader_id = TraderId::new("TESTER", "001");
        assert_eq!(trader_id.value(), "TESTER-001");
        assert_eq!(trader_id.to_string(), "TESTER-001");
    }

    #[test]
    fn test_generated_order_ids_are_unique() {
        assert_ne!(ClientOrderId::generate(), ClientOrderId::generate());
    }
}
