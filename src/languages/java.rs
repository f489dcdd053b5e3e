use super::{naming, LanguageAdapter, LanguageConfig};

/// Java: `mario-less` -> `MarioLess.java`, run as class `MarioLess`
#[derive(Debug, Clone)]
pub struct JavaAdapter {
    config: LanguageConfig,
}

impl JavaAdapter {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }
}

impl LanguageAdapter for JavaAdapter {
    fn config(&self) -> &LanguageConfig {
        &self.config
    }

    fn resolve_entry_name(&self, logical_name: &str) -> String {
        format!("{}.java", naming::pascal_case(naming::file_stem(logical_name)))
    }

    fn command_vars(&self, logical_name: &str) -> Vec<(&'static str, String)> {
        let source = self.resolve_entry_name(logical_name);
        let class = naming::file_stem(&source).to_string();
        vec![("source", source), ("class", class.clone()), ("exe", class)]
    }
}
