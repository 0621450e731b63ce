// Query definitions and database targets from the local query directory and settings

use crate::config::ExtractionConfig;
use crate::errors::ConfigurationError;
use crate::models::QueryDefinition;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

pub const QUERY_EXTENSION: &str = "sql";

/// Source of query definitions and the ordered set of database targets
#[derive(Debug, Clone)]
pub struct QuerySource {
    query_dir: PathBuf,
    targets: Vec<String>,
}

impl QuerySource {
    pub fn new(query_dir: impl Into<PathBuf>, targets: Vec<String>) -> Self {
        Self {
            query_dir: query_dir.into(),
            targets,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.query_dir.clone(), config.targets.clone())
    }

    pub fn query_dir(&self) -> &Path {
        &self.query_dir
    }

    /// Configured database targets, in configuration order
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Fails with `NotConfigured` when `target` is outside the configured set
    pub fn ensure_configured(&self, target: &str) -> Result<(), ConfigurationError> {
        if self.targets.iter().any(|t| t == target) {
            Ok(())
        } else {
            Err(ConfigurationError::NotConfigured {
                target: target.to_string(),
                available: self.targets.clone(),
            })
        }
    }

    /// Load every `*.sql` file of the query directory.
    ///
    /// The query name is the file stem. Unreadable or empty files are skipped
    /// with a warning; the result is sorted by name.
    #[instrument(skip(self), fields(query_dir = %self.query_dir.display()))]
    pub fn load_queries(&self) -> Result<Vec<QueryDefinition>, ConfigurationError> {
        if !self.query_dir.is_dir() {
            warn!("Query directory does not exist");
            return Err(ConfigurationError::QueryDirectoryMissing(
                self.query_dir.display().to_string(),
            ));
        }

        let entries = fs::read_dir(&self.query_dir).map_err(|e| {
            warn!(error = %e, "Failed to read query directory");
            ConfigurationError::QueryDirectoryMissing(format!(
                "{}: {}",
                self.query_dir.display(),
                e
            ))
        })?;

        let mut queries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(QUERY_EXTENSION)
            {
                continue;
            }

            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!(path = %path.display(), "Skipping query file with non UTF-8 name");
                continue;
            };

            match fs::read_to_string(&path) {
                Ok(text) if text.trim().is_empty() => {
                    warn!(query = %name, "Skipping empty query file");
                }
                Ok(text) => {
                    debug!(query = %name, "Loaded query definition");
                    queries.push(QueryDefinition {
                        name: name.to_string(),
                        text: text.trim().to_string(),
                    });
                }
                Err(e) => {
                    warn!(query = %name, error = %e, "Failed to read query file");
                }
            }
        }

        queries.sort_by(|a, b| a.name.cmp(&b.name));
        info!(count = queries.len(), "Query definitions loaded");
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_queries_uses_file_stem_and_skips_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("orders.sql"), "SELECT * FROM orders\n").expect("write");
        fs::write(dir.path().join("clients.sql"), "SELECT * FROM clients").expect("write");
        fs::write(dir.path().join("blank.sql"), "   \n").expect("write");
        fs::write(dir.path().join("notes.txt"), "not a query").expect("write");

        let source = QuerySource::new(dir.path(), vec!["DB1".to_string()]);
        let queries = source.load_queries().expect("load");

        let names: Vec<&str> = queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["clients", "orders"]);
        assert_eq!(queries[1].text, "SELECT * FROM orders");
    }

    #[test]
    fn test_missing_directory_is_configuration_error() {
        let source = QuerySource::new("/nonexistent/query/dir", Vec::new());
        assert!(matches!(
            source.load_queries(),
            Err(ConfigurationError::QueryDirectoryMissing(_))
        ));
    }

    #[test]
    fn test_ensure_configured_lists_available_targets() {
        let source = QuerySource::new("sql", vec!["DB1".to_string()]);
        assert!(source.ensure_configured("DB1").is_ok());
        assert_eq!(
            source.ensure_configured("DB3"),
            Err(ConfigurationError::NotConfigured {
                target: "DB3".to_string(),
                available: vec!["DB1".to_string()],
            })
        );
    }
}
