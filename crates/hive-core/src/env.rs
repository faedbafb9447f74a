//! Environment switches recognized by the core.

/// Truthy check used by every environment switch
fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// When set, adapters that would touch disk keep their state in memory and
/// create no directories. Test harnesses set this for hermetic runs.
pub const NO_FILE_PERSISTENCE_ENV: &str = "HIVE_NO_FILE_LOGGING";

pub fn no_file_persistence() -> bool {
    std::env::var(NO_FILE_PERSISTENCE_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
}

/// Comma-separated research persona tags attached to newly created teams
pub const RESEARCH_PERSONAS_ENV: &str = "HIVE_RESEARCH_PERSONAS";
/// Legacy alias consulted when the primary variable is unset
pub const RESEARCH_PERSONAS_FALLBACK_ENV: &str = "HIVE_AUTORESEARCH_PERSONAS";

pub fn research_personas() -> Vec<String> {
    let raw = std::env::var(RESEARCH_PERSONAS_ENV)
        .or_else(|_| std::env::var(RESEARCH_PERSONAS_FALLBACK_ENV))
        .unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }
}
