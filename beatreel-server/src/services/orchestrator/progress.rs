//! Progress inference from pipeline output
//!
//! The pipeline scripts print free-form text. A [`ProgressClassifier`]
//! maps a single stdout line to an optional percentage; lines it does not
//! recognize are still forwarded to observers, just without a percentage.

/// Maps one output line to a coarse completion percentage
pub trait ProgressClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Option<i32>;
}

/// Substring match against an ordered keyword table; first match wins
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(String, i32)>,
}

impl KeywordClassifier {
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        Self {
            rules: rules.into_iter().map(|(k, p)| (k.into(), p)).collect(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new([
            ("Processing", 25),
            ("Converting", 50),
            ("Building", 75),
            ("Complete", 100),
        ])
    }
}

impl ProgressClassifier for KeywordClassifier {
    fn classify(&self, line: &str) -> Option<i32> {
        self.rules
            .iter()
            .find(|(keyword, _)| line.contains(keyword.as_str()))
            .map(|(_, percent)| *percent)
    }
}
