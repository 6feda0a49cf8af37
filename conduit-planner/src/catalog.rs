//! Tool catalog as seen by one compilation session

use conduit_core::domain::tool::ToolSpec;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolCatalog {
    pub fn new(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        Self {
            tools: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Catalog limited to the allowed tool names; unknown names are ignored
    pub fn restricted(specs: &[ToolSpec], allowed: &BTreeSet<String>) -> Self {
        Self::new(specs.iter().filter(|s| allowed.contains(&s.name)).cloned())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Prompt listing of name and description, capped at `limit` tools
    pub fn summary(&self, limit: usize) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .take(limit)
            .map(|t| format!("- {}: {}", t.name, one_line(&t.description)))
            .collect();

        if self.tools.len() > limit {
            lines.push(format!(
                "({} more tools not listed)",
                self.tools.len() - limit
            ));
        }
        lines.join("\n")
    }
}

fn one_line(description: &str) -> String {
    description.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, description: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    #[test]
    fn test_restricted_ignores_unknown_names() {
        let specs = vec![spec("ingest", "Ingest"), spec("train", "Train")];
        let allowed = BTreeSet::from(["train".to_string(), "ghost".to_string()]);

        let catalog = ToolCatalog::restricted(&specs, &allowed);
        assert_eq!(catalog.names(), BTreeSet::from(["train".to_string()]));
    }

    #[test]
    fn test_summary_is_capped() {
        let catalog = ToolCatalog::new(vec![
            spec("a", "First\n  tool."),
            spec("b", "Second"),
            spec("c", "Third"),
        ]);

        let summary = catalog.summary(2);
        assert_eq!(summary, "- a: First tool.\n- b: Second\n(1 more tools not listed)");
        assert!(!catalog.summary(5).contains("more tools"));
    }
}
