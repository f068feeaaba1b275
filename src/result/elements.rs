use serde::{Deserialize, Serialize};

/// Stable short ids for every test element seen during one environment load.
///
/// Ids have the form `<suite-ordinal>-<method-ordinal>`, both 1-based and
/// assigned in first-seen order. Assigned ids are never renumbered; a reload
/// starts over from an empty index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementIndex {
    suites: Vec<SuiteElements>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SuiteElements {
    name: String,
    methods: Vec<String>,
}

impl ElementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `(suite, method)`, assigning the next one if unseen.
    pub fn id_for(&mut self, suite: &str, method: &str) -> String {
        let suite_pos = match self.suites.iter().position(|s| s.name == suite) {
            Some(pos) => pos,
            None => {
                self.suites.push(SuiteElements {
                    name: suite.to_string(),
                    methods: Vec::new(),
                });
                self.suites.len() - 1
            }
        };

        let methods = &mut self.suites[suite_pos].methods;
        let method_pos = match methods.iter().position(|m| m == method) {
            Some(pos) => pos,
            None => {
                methods.push(method.to_string());
                methods.len() - 1
            }
        };

        format_id(suite_pos, method_pos)
    }

    /// Number of known elements (suite/method pairs).
    pub fn len(&self) -> usize {
        self.suites.iter().map(|s| s.methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suite names and canonical `Suite#method` names starting with `prefix`.
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let mut matches = Vec::new();
        for suite in &self.suites {
            if suite.name.starts_with(prefix) {
                matches.push(suite.name.clone());
            }
            for method in &suite.methods {
                let canonical = canonical_name(&suite.name, method);
                if canonical.starts_with(prefix) {
                    matches.push(canonical);
                }
            }
        }
        matches.sort();
        matches.dedup();
        matches
    }
}

/// The canonical display name of an element.
pub fn canonical_name(suite: &str, method: &str) -> String {
    format!("{}#{}", suite, method)
}

/// Parse `N-M` into its two ordinals.
pub fn parse_id(id: &str) -> Option<(usize, usize)> {
    let (suite, method) = id.split_once('-')?;
    if suite.is_empty() || method.is_empty() {
        return None;
    }
    if !suite.bytes().all(|b| b.is_ascii_digit()) || !method.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some((suite.parse().ok()?, method.parse().ok()?))
}

fn format_id(suite_pos: usize, method_pos: usize) -> String {
    format!("{}-{}", suite_pos + 1, method_pos + 1)
}
