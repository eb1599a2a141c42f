use serde::{Deserialize, Serialize};

use super::job::ProcessorTier;

/// Catalog entry for one processor tier. Static for the whole session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub name: String,
    pub description: String,
    /// Relative cost tag, e.g. `$$`.
    pub relative_cost: String,
    pub recommended_for: String,
}

impl ProcessorInfo {
    pub fn tier(&self) -> Option<ProcessorTier> {
        self.name.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_entry() {
        let info: ProcessorInfo = serde_json::from_str(
            r#"{"name":"core","description":"Detailed analysis","relative_cost":"$$$","recommended_for":"Complex questions requiring multiple sources"}"#,
        )
        .unwrap();
        assert_eq!(info.tier(), Some(ProcessorTier::Core));
    }

    #[test]
    fn test_unknown_tier_name() {
        let info = ProcessorInfo {
            name: "experimental".to_string(),
            description: String::new(),
            relative_cost: "?".to_string(),
            recommended_for: String::new(),
        };
        assert_eq!(info.tier(), None);
    }
}
