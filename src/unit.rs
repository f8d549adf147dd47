use serde::{Deserialize, Deserializer, Serialize};
use slug::slugify;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

/// What kind of link a [`Unit`] was resolved into.
///
/// Serialized as the lowercase kind name; `Unresolved` is the empty string.
/// Unknown strings deserialize as `Unresolved` so they are skipped rather
/// than rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum UnitKind {
    Book,
    Preview,
    Page,
    #[default]
    Unresolved,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Book => "book",
            UnitKind::Preview => "preview",
            UnitKind::Page => "page",
            UnitKind::Unresolved => "",
        }
    }
}

impl From<String> for UnitKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "book" => UnitKind::Book,
            "preview" => UnitKind::Preview,
            "page" => UnitKind::Page,
            _ => UnitKind::Unresolved,
        }
    }
}

impl From<UnitKind> for &'static str {
    fn from(kind: UnitKind) -> Self {
        kind.as_str()
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Unresolved => f.write_str("unresolved"),
            kind => f.write_str(kind.as_str()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("book \"{0}\" needs a display name")]
    EmptyDisplayName(String),
    #[error("book \"{0}\" has no chapters")]
    NoChapters(String),
    #[error("sub-unit of \"{0}\" has an empty name")]
    EmptyName(String),
    #[error("name \"{0}\" is used by more than one sub-unit")]
    DuplicateName(String),
    #[error("{kind} link \"{link}\" must have exactly one sub-unit, found {count}")]
    SubUnitCount {
        kind: UnitKind,
        link: String,
        count: usize,
    },
}

/// One chapter, preview or page group. Its images live in a directory
/// called `name`, and the assembled PDF is `{name}.pdf` inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUnit {
    #[serde(default)]
    pub source_link: String,
    /// Number of images expected; `None` until the page count is resolved.
    #[serde(default, deserialize_with = "page_count_or_unresolved")]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub name: String,
}

impl SubUnit {
    pub fn new(source_link: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_link: source_link.into(),
            page_count: None,
            name: name.into(),
        }
    }

    /// Book chapter. Titles that cannot be used as a directory name are
    /// slugified; a title with nothing left after slugifying is rejected.
    pub fn chapter(source_link: impl Into<String>, title: &str) -> Result<Self, UnitError> {
        let source_link = source_link.into();
        let name = if is_directory_safe(title) {
            title.to_string()
        } else {
            slugify(title)
        };
        if name.is_empty() {
            return Err(UnitError::EmptyName(source_link));
        }
        Ok(Self::new(source_link, name))
    }

    /// Preview or page group, named with a fresh token from `registry`.
    pub fn generated(source_link: impl Into<String>, registry: &mut NameRegistry) -> Self {
        Self::new(source_link, registry.generate())
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// A top-level link: a book with chapters, or a single preview/page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub source_link: String,
    #[serde(default)]
    pub kind: UnitKind,
    #[serde(default)]
    pub sub_units: Vec<SubUnit>,
    /// Book title; empty for previews and pages.
    #[serde(default)]
    pub display_name: String,
}

impl Unit {
    /// A link as supplied by the user, before it has been resolved.
    pub fn unresolved(source_link: impl Into<String>) -> Self {
        Self {
            source_link: source_link.into(),
            kind: UnitKind::Unresolved,
            sub_units: vec![SubUnit::default()],
            display_name: String::new(),
        }
    }

    pub fn book(
        source_link: impl Into<String>,
        display_name: impl Into<String>,
        chapters: Vec<SubUnit>,
    ) -> Result<Self, UnitError> {
        let unit = Self {
            source_link: source_link.into(),
            kind: UnitKind::Book,
            sub_units: chapters,
            display_name: display_name.into(),
        };
        unit.validate()?;
        Ok(unit)
    }

    pub fn preview(source_link: impl Into<String>, sub_unit: SubUnit) -> Result<Self, UnitError> {
        Self::single(source_link.into(), UnitKind::Preview, sub_unit)
    }

    pub fn page(source_link: impl Into<String>, sub_unit: SubUnit) -> Result<Self, UnitError> {
        Self::single(source_link.into(), UnitKind::Page, sub_unit)
    }

    fn single(source_link: String, kind: UnitKind, sub_unit: SubUnit) -> Result<Self, UnitError> {
        let unit = Self {
            source_link,
            kind,
            sub_units: vec![sub_unit],
            display_name: String::new(),
        };
        unit.validate()?;
        Ok(unit)
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Checks the shape the resolution step is expected to produce.
    /// Unresolved units are always valid since they are never assembled.
    pub fn validate(&self) -> Result<(), UnitError> {
        match self.kind {
            UnitKind::Book => {
                if self.display_name.is_empty() {
                    return Err(UnitError::EmptyDisplayName(self.source_link.clone()));
                }
                if self.sub_units.is_empty() {
                    return Err(UnitError::NoChapters(self.display_name.clone()));
                }
                let mut seen = HashSet::new();
                for sub_unit in &self.sub_units {
                    if sub_unit.name.is_empty() {
                        return Err(UnitError::EmptyName(self.display_name.clone()));
                    }
                    if !seen.insert(sub_unit.name.as_str()) {
                        return Err(UnitError::DuplicateName(sub_unit.name.clone()));
                    }
                }
                Ok(())
            }
            UnitKind::Preview | UnitKind::Page => {
                if self.sub_units.len() != 1 {
                    return Err(UnitError::SubUnitCount {
                        kind: self.kind,
                        link: self.source_link.clone(),
                        count: self.sub_units.len(),
                    });
                }
                if self.sub_units[0].name.is_empty() {
                    return Err(UnitError::EmptyName(self.source_link.clone()));
                }
                Ok(())
            }
            UnitKind::Unresolved => Ok(()),
        }
    }
}

/// Hands out sub-unit names that never repeat within one registry.
///
/// Previews and pages have no stable title, so they are named after the
/// current time. Two links resolved within the same microsecond would get the
/// same token; the registry appends `-1`, `-2`, ... until the name is free.
#[derive(Debug, Default)]
pub struct NameRegistry {
    issued: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks names that are already taken, e.g. by units loaded from a manifest.
    pub fn reserve<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issued.extend(names.into_iter().map(Into::into));
    }

    pub fn generate(&mut self) -> String {
        let candidate = datetime_name();
        self.claim(&candidate)
    }

    pub fn claim(&mut self, candidate: &str) -> String {
        let mut name = candidate.to_string();
        let mut suffix = 1;
        while !self.issued.insert(name.clone()) {
            name = format!("{}-{}", candidate, suffix);
            suffix += 1;
        }
        name
    }
}

/// Current UTC time as `YYYY-MM-DD HH-MM-SS-ffffff`.
pub fn datetime_name() -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]-[minute]-[second]-[subsecond digits:6]"
    );
    let now = OffsetDateTime::now_utc();
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp_nanos().to_string())
}

fn is_directory_safe(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

// Manifests written by older tooling use -1 for "not resolved yet".
fn page_count_or_unresolved<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|count| u32::try_from(count).ok()))
}
