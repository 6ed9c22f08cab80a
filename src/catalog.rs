//! Background image catalog
//!
//! A fixed, ordered mapping from category name to the image URLs shown for
//! that category. Built once at startup and handed to both the cache
//! controller and the cache client.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One named group of background images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category name (unique within a catalog)
    pub name: String,

    /// Image URLs in display order
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Immutable category -> URL list mapping.
///
/// Category order is preserved. Duplicate URLs (within or across categories)
/// are allowed; duplicate category names are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Category>", into = "Vec<Category>")]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    /// Build a catalog from categories, rejecting duplicate names.
    pub fn new(categories: Vec<Category>) -> Result<Self, ConfigError> {
        for (i, category) in categories.iter().enumerate() {
            if categories[..i].iter().any(|c| c.name == category.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate catalog category '{}'",
                    category.name
                )));
            }
        }
        Ok(Self { categories })
    }

    /// Convenience constructor from `(name, urls)` pairs
    pub fn from_pairs<N, U>(pairs: impl IntoIterator<Item = (N, Vec<U>)>) -> Result<Self, ConfigError>
    where
        N: Into<String>,
        U: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, urls)| Category {
                    name: name.into(),
                    urls: urls.into_iter().map(Into::into).collect(),
                })
                .collect(),
        )
    }

    /// The catalog shipped with the timer
    pub fn builtin() -> Self {
        let pairs = BUILTIN.iter().map(|(name, photos)| {
            (
                *name,
                photos
                    .iter()
                    .map(|id| format!("https://images.unsplash.com/{id}?w=1920&q=80"))
                    .collect::<Vec<_>>(),
            )
        });
        Self {
            categories: pairs
                .map(|(name, urls)| Category {
                    name: name.to_string(),
                    urls,
                })
                .collect(),
        }
    }

    /// Category names in catalog order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// URLs for one category; unknown categories yield an empty slice
    pub fn urls(&self, category: &str) -> &[String] {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .map(|c| c.urls.as_slice())
            .unwrap_or(&[])
    }

    /// Every URL of every category, in catalog order, duplicates kept
    pub fn all_urls(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|c| c.urls.iter().cloned())
            .collect()
    }

    /// Total number of URLs across all categories
    pub fn len(&self) -> usize {
        self.categories.iter().map(|c| c.urls.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate categories with their URLs
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TryFrom<Vec<Category>> for Catalog {
    type Error = ConfigError;

    fn try_from(categories: Vec<Category>) -> Result<Self, Self::Error> {
        Self::new(categories)
    }
}

impl From<Catalog> for Vec<Category> {
    fn from(catalog: Catalog) -> Self {
        catalog.categories
    }
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "nature",
        &[
            "photo-1506905925346-21bda4d32df4",
            "photo-1441974231531-c6227db76b6e",
            "photo-1470071459604-3b5ec3a7fe05",
            "photo-1501854140801-50d01698950b",
        ],
    ),
    (
        "city",
        &[
            "photo-1477959858617-67f85cf4f1df",
            "photo-1449824913935-59a10b8d2000",
            "photo-1480714378408-67cf0d13bc1b",
        ],
    ),
    (
        "space",
        &[
            "photo-1462331940025-496dfbfc7564",
            "photo-1419242902214-272b3f66ee7a",
            "photo-1446776811953-b23d57bd21aa",
        ],
    ),
    (
        "minimal",
        &[
            "photo-1557683316-973673baf926",
            "photo-1558591710-4b4a1ae0f04d",
        ],
    ),
];
