use serde::Deserialize;

/// Parse any JSON object and return the value of its `"version"` key, or
/// `None` when the document is not valid JSON or carries no version.
pub fn parse_version_json(raw: &[u8]) -> Option<i64> {
    #[derive(Deserialize)]
    struct Probe {
        version: Option<i64>,
    }
    serde_json::from_slice::<Probe>(raw).ok()?.version
}
