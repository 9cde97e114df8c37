//! Installing translation tables into the engine's private filesystem.
//!
//! The [`TableStore`] is the only writer of the table inventory. A table
//! is fetched from the configured [`TableSource`] and written to the
//! worker's [`PrivateFs`] under its own name, together with every file it
//! pulls in through `include` directives. Installing an installed table
//! does nothing.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use louis_worker_common::TableError;

use crate::source::TableSource;
use crate::vfs::PrivateFs;

/// Inventory entry for one table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    /// File name, as used in table lists.
    pub name: String,
    /// Whether the file is present in the private filesystem.
    pub installed: bool,
}

/// Fetches tables and installs them for the engine.
pub struct TableStore {
    source: Arc<dyn TableSource>,
    fs: PrivateFs,
    inventory: BTreeMap<String, TableRecord>,
    resolve_includes: bool,
}

impl TableStore {
    /// Create a store writing into `fs`.
    pub fn new(source: Arc<dyn TableSource>, fs: PrivateFs) -> Self {
        Self {
            source,
            fs,
            inventory: BTreeMap::new(),
            resolve_includes: true,
        }
    }

    /// Enable or disable installing files named by `include` directives.
    #[must_use]
    pub fn with_include_resolution(mut self, enabled: bool) -> Self {
        self.resolve_includes = enabled;
        self
    }

    /// Host path of the private filesystem.
    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    /// Install a table and the files it includes.
    ///
    /// Returns `Ok(false)` if the table was already installed, in which
    /// case nothing is fetched or written. Nothing is marked installed
    /// unless every file was fetched and written, so a failed install can
    /// be retried.
    ///
    /// # Errors
    ///
    /// - [`TableError::InvalidName`] before any fetch for a bad name
    /// - [`TableError::FetchFailed`] if the table or an include is missing
    /// - [`TableError::WriteFailed`] if the private filesystem rejects it
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub async fn install(&mut self, name: &str) -> Result<bool, TableError> {
        validate_name(name)?;
        if self.is_installed(name) {
            debug!(table = name, "Table already installed");
            return Ok(false);
        }

        let start = Instant::now();
        self.inventory
            .entry(name.to_string())
            .or_insert_with(|| TableRecord {
                name: name.to_string(),
                installed: false,
            });

        let files = match self.fetch_with_includes(name).await {
            Ok(files) => files,
            Err(e) => {
                warn!(table = name, error = %e, "Table fetch failed");
                return Err(e);
            }
        };

        for (file, contents) in &files {
            if let Err(e) = self.fs.write(file, contents).await {
                warn!(table = name, file = %file, error = %e, "Table write failed");
                return Err(e);
            }
        }

        let bytes: usize = files.iter().map(|(_, contents)| contents.len()).sum();
        for (file, _) in files {
            self.inventory.insert(
                file.clone(),
                TableRecord {
                    name: file,
                    installed: true,
                },
            );
        }

        info!(
            table = name,
            bytes = bytes,
            duration_ms = start.elapsed().as_millis(),
            "Table installed"
        );
        Ok(true)
    }

    /// Install every table named in a comma-separated list.
    pub async fn install_list(&mut self, list: &str) -> Result<(), TableError> {
        for name in split_list(list)? {
            self.install(name).await?;
        }
        Ok(())
    }

    /// Check that every table named in a comma-separated list is installed.
    pub fn require_installed(&self, list: &str) -> Result<(), TableError> {
        for name in split_list(list)? {
            if !self.is_installed(name) {
                return Err(TableError::NotInstalled {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether a table is installed.
    pub fn is_installed(&self, name: &str) -> bool {
        self.inventory.get(name).is_some_and(|r| r.installed)
    }

    /// Inventory entry for a table, if it was ever requested.
    pub fn record(&self, name: &str) -> Option<&TableRecord> {
        self.inventory.get(name)
    }

    /// All inventory entries, ordered by name.
    pub fn records(&self) -> impl Iterator<Item = &TableRecord> {
        self.inventory.values()
    }

    /// Names of installed tables, ordered by name.
    pub fn installed(&self) -> Vec<String> {
        self.records()
            .filter(|r| r.installed)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Fetch `name` and, transitively, the files it includes.
    async fn fetch_with_includes(&self, name: &str) -> Result<Vec<(String, Vec<u8>)>, TableError> {
        let mut files = Vec::new();
        let mut seen = HashSet::from([name.to_string()]);
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(file) = queue.pop_front() {
            let contents = self.source.fetch(&file).await?;

            if self.resolve_includes {
                for include in includes(&contents) {
                    if validate_name(&include).is_err() {
                        return Err(TableError::fetch_failed(
                            &file,
                            format!("include '{include}' is not a plain table name"),
                        ));
                    }
                    if !self.is_installed(&include) && seen.insert(include.clone()) {
                        debug!(table = %file, include = %include, "Resolving include");
                        queue.push_back(include);
                    }
                }
            }

            files.push((file, contents));
        }

        Ok(files)
    }
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("source", &self.source.describe())
            .field("root", &self.fs.root())
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}

/// Check that a table name is a plain file name.
pub fn validate_name(name: &str) -> Result<(), TableError> {
    let valid = !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(TableError::invalid_name(name))
    }
}

/// Split a comma-separated table list into validated names.
pub fn split_list(list: &str) -> Result<Vec<&str>, TableError> {
    let names: Vec<&str> = list.split(',').map(str::trim).collect();
    for name in &names {
        validate_name(name)?;
    }
    Ok(names)
}

/// File names referenced by `include` directives in a table.
pub fn includes(contents: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(contents)
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("include"), Some(file)) => Some(file.to_string()),
                _ => None,
            }
        })
        .collect()
}
