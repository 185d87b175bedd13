use std::path::{Component, Path};

/// Directory and file names never tracked, in addition to hidden entries.
pub const DEFAULT_IGNORED: &[&str] = &[".git", ".tig", "node_modules", "vendor", "dist", "build"];

/// Decides which repository paths are invisible to tracking.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    names: Vec<String>,
}

impl IgnoreRules {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect();
        for name in extra {
            let name = name.into();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        Self { names }
    }

    /// `rel` is relative to the repository root. Any hidden component or
    /// any component on the ignore list hides the whole path.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        rel.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name.starts_with('.') || self.names.iter().any(|n| n.as_str() == name)
            }
            _ => false,
        })
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}
