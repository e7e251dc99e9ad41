use crate::types::{EnricherError, Entity, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Ordered list of entities to process. Implementations return names already
/// trimmed and deduplicated, in processing priority order.
pub trait EntitySource: Send + Sync {
    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Load the full list. Fails with `SourceUnavailable` when the upstream
    /// artifact cannot be read.
    fn load(&self) -> Result<Vec<Entity>>;
}

impl<T: EntitySource + ?Sized> EntitySource for Box<T> {
    fn source_name(&self) -> String {
        (**self).source_name()
    }

    fn load(&self) -> Result<Vec<Entity>> {
        (**self).load()
    }
}

/// Trims, drops blanks, keeps the first occurrence of each name.
pub fn normalize_names<I, S>(names: I) -> Vec<Entity>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for raw in names {
        if let Some(entity) = Entity::parse(raw.as_ref()) {
            if seen.insert(entity.clone()) {
                entities.push(entity);
            }
        }
    }
    entities
}

/// Plain text file, one name per line.
pub struct NameListSource {
    path: PathBuf,
}

impl NameListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EntitySource for NameListSource {
    fn source_name(&self) -> String {
        format!("name list ({})", self.path.display())
    }

    fn load(&self) -> Result<Vec<Entity>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.unavailable(e))?;
        let entities = normalize_names(content.lines());
        info!("Loaded {} entities from {}", entities.len(), self.path.display());
        Ok(entities)
    }
}

impl NameListSource {
    fn unavailable(&self, reason: impl ToString) -> EnricherError {
        EnricherError::SourceUnavailable {
            source_name: self.source_name(),
            reason: reason.to_string(),
        }
    }
}

/// Delimited table with a header row; names are read from one column.
pub struct CsvNameSource {
    path: PathBuf,
    column: String,
}

impl CsvNameSource {
    pub const DEFAULT_COLUMN: &'static str = "Name";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            column: Self::DEFAULT_COLUMN.to_string(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn unavailable(&self, reason: impl ToString) -> EnricherError {
        EnricherError::SourceUnavailable {
            source_name: self.source_name(),
            reason: reason.to_string(),
        }
    }
}

impl EntitySource for CsvNameSource {
    fn source_name(&self) -> String {
        format!("csv column '{}' ({})", self.column, self.path.display())
    }

    fn load(&self) -> Result<Vec<Entity>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.unavailable(e))?;

        let headers = reader.headers().map_err(|e| self.unavailable(e))?.clone();
        let index = headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}').trim() == self.column)
            .ok_or_else(|| self.unavailable(format!("no '{}' column in header", self.column)))?;

        let mut names = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| self.unavailable(e))?;
            match record.get(index) {
                Some(name) => names.push(name.to_string()),
                None => debug!("Skipping short row at {:?}", record.position()),
            }
        }

        let entities = normalize_names(names);
        info!("Loaded {} entities from {}", entities.len(), self.path.display());
        Ok(entities)
    }
}

/// In-memory list, for library callers and tests.
pub struct StaticSource {
    names: Vec<String>,
}

impl StaticSource {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl EntitySource for StaticSource {
    fn source_name(&self) -> String {
        "static list".to_string()
    }

    fn load(&self) -> Result<Vec<Entity>> {
        Ok(normalize_names(&self.names))
    }
}

/// Picks a source from the file extension: `.csv` reads a column, anything else
/// is treated as a name list.
pub fn source_for_path(path: &Path, column: &str) -> Box<dyn EntitySource> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        Box::new(CsvNameSource::new(path).with_column(column))
    } else {
        Box::new(NameListSource::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn names(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn normalize_keeps_first_occurrence_order() {
        let entities = normalize_names(["  Gal Nevo", "Yoav Bruck", "", "Gal Nevo ", "   ", "Amit Ivry"]);
        assert_eq!(names(&entities), vec!["Gal Nevo", "Yoav Bruck", "Amit Ivry"]);
    }

    #[test]
    fn name_list_reads_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Gal Nevo\n\nYoav Bruck\r\nGal Nevo").unwrap();

        let entities = NameListSource::new(file.path()).load().unwrap();
        assert_eq!(names(&entities), vec!["Gal Nevo", "Yoav Bruck"]);
    }

    #[test]
    fn csv_source_handles_bom_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swimmers.csv");
        std::fs::write(&path, "\u{feff}Rank,Name\n1,Gal Nevo\n2,Amit Ivry\n3,Gal Nevo\n").unwrap();

        let entities = CsvNameSource::new(&path).load().unwrap();
        assert_eq!(names(&entities), vec!["Gal Nevo", "Amit Ivry"]);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let err = NameListSource::new("/definitely/not/here.txt").load().unwrap_err();
        assert!(matches!(err, EnricherError::SourceUnavailable { .. }));
    }

    #[test]
    fn missing_column_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "Full Name\nGal Nevo\n").unwrap();

        let err = CsvNameSource::new(&path).load().unwrap_err();
        assert!(matches!(err, EnricherError::SourceUnavailable { .. }));
    }

    #[test]
    fn extension_selects_source() {
        let source = source_for_path(Path::new("names.CSV"), "Name");
        assert!(source.source_name().starts_with("csv column"));
        let source = source_for_path(Path::new("swimmers_list.txt"), "Name");
        assert!(source.source_name().starts_with("name list"));
    }
}
