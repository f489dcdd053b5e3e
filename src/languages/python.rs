use super::{naming, LanguageAdapter, LanguageConfig};

/// Python: interpreted, `hello` -> `hello.py`
#[derive(Debug, Clone)]
pub struct PythonAdapter {
    config: LanguageConfig,
}

impl PythonAdapter {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn config(&self) -> &LanguageConfig {
        &self.config
    }

    fn resolve_entry_name(&self, logical_name: &str) -> String {
        format!("{}.py", naming::file_stem(logical_name))
    }

    fn command_vars(&self, logical_name: &str) -> Vec<(&'static str, String)> {
        vec![("source", self.resolve_entry_name(logical_name))]
    }
}
