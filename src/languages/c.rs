use super::{naming, LanguageAdapter, LanguageConfig};

/// C: `hello` -> `hello.c`, compiled to `./hello`
#[derive(Debug, Clone)]
pub struct CAdapter {
    config: LanguageConfig,
}

impl CAdapter {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }
}

impl LanguageAdapter for CAdapter {
    fn config(&self) -> &LanguageConfig {
        &self.config
    }

    fn resolve_entry_name(&self, logical_name: &str) -> String {
        format!("{}.c", naming::file_stem(logical_name))
    }

    fn command_vars(&self, logical_name: &str) -> Vec<(&'static str, String)> {
        let source = self.resolve_entry_name(logical_name);
        let exe = naming::file_stem(&source).to_string();
        vec![("source", source), ("exe", exe)]
    }
}
