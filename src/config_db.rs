use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    window::Granularity,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const DEFAULT_CORPUS_KEY: &str = "default_corpus";
pub const VECTOR_WEIGHT_KEY: &str = "vector_weight";
pub const GRANULARITY_KEY: &str = "granularity";
pub const RADIUS_KEY: &str = "radius";

/// Settings understood by [`ConfigDb::set_setting`].
pub const KNOWN_SETTINGS: &[&str] = &[
    DEFAULT_CORPUS_KEY,
    VECTOR_WEIGHT_KEY,
    GRANULARITY_KEY,
    RADIUS_KEY,
];

pub const DEFAULT_CORPUS: &str = "default";
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;
pub const DEFAULT_RADIUS: usize = 1;

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store a setting after checking the key is known and the value parses.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        validate_setting(key, value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    /// Resolve search defaults from stored settings, falling back to the
    /// built-in values for anything unset.
    pub fn search_defaults(&self) -> Result<SearchDefaults> {
        let mut defaults = SearchDefaults::default();
        if let Some(corpus) = self.get_setting(DEFAULT_CORPUS_KEY)? {
            defaults.corpus = corpus;
        }
        if let Some(weight) = self.get_setting(VECTOR_WEIGHT_KEY)? {
            defaults.vector_weight = parse_weight(&weight)?;
        }
        if let Some(granularity) = self.get_setting(GRANULARITY_KEY)? {
            defaults.granularity = granularity.parse()?;
        }
        if let Some(radius) = self.get_setting(RADIUS_KEY)? {
            defaults.radius = parse_radius(&radius)?;
        }
        Ok(defaults)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

/// Defaults applied to search requests that leave a field unset.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDefaults {
    pub corpus: String,
    pub vector_weight: f32,
    pub granularity: Granularity,
    pub radius: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            corpus: DEFAULT_CORPUS.to_string(),
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            granularity: Granularity::default(),
            radius: DEFAULT_RADIUS,
        }
    }
}

fn validate_setting(key: &str, value: &str) -> Result<()> {
    match key {
        DEFAULT_CORPUS_KEY => crate::data_dir::validate_corpus_name(value),
        VECTOR_WEIGHT_KEY => parse_weight(value).map(|_| ()),
        GRANULARITY_KEY => value.parse::<Granularity>().map(|_| ()),
        RADIUS_KEY => parse_radius(value).map(|_| ()),
        other => Err(Error::Config(format!(
            "unknown setting '{other}' (known: {})",
            KNOWN_SETTINGS.join(", ")
        ))),
    }
}

fn parse_weight(value: &str) -> Result<f32> {
    let weight: f32 = value
        .trim()
        .parse()
        .map_err(|_| {
            Error::Config(format!("invalid vector_weight '{value}'"))
        })?;
    if !(0.0..=1.0).contains(&weight) {
        return Err(Error::out_of_range(VECTOR_WEIGHT_KEY, weight, "0.0..=1.0"));
    }
    Ok(weight)
}

fn parse_radius(value: &str) -> Result<usize> {
    let radius: usize = value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid radius '{value}'")))?;
    if radius > crate::search::MAX_RADIUS {
        return Err(Error::out_of_range(RADIUS_KEY, radius, "0..=100"));
    }
    Ok(radius)
}
