use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top,
    Bottom,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "tops" => Ok(Category::Top),
            "bottom" | "bottoms" => Ok(Category::Bottom),
            other => Err(format!("unknown clothing category '{other}'")),
        }
    }
}

/// An uploaded garment photo. Immutable after upload; only deletion is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClothingItem {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub image_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ClothingItem {
    /// File name of the backing blob, taken from the last URL path segment.
    pub fn blob_name(&self) -> Option<&str> {
        let trimmed = self.image_url.split(['?', '#']).next()?;
        trimmed
            .rsplit('/')
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClothingItem {
    pub name: String,
    pub category: Category,
    pub image_url: String,
}

#[cfg(test)]
mod tests {
    use super::{Category, ClothingItem};

    fn item(url: &str) -> ClothingItem {
        ClothingItem {
            id: "i1".to_string(),
            name: "Linen shirt".to_string(),
            category: Category::Top,
            image_url: url.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn category_parses_singular_and_plural() {
        assert_eq!("Top".parse::<Category>(), Ok(Category::Top));
        assert_eq!(" bottoms ".parse::<Category>(), Ok(Category::Bottom));
        assert!("shoes".parse::<Category>().is_err());
    }

    #[test]
    fn blob_name_strips_query_and_path() {
        assert_eq!(
            item("https://cdn.example/closet/top_abc.png?v=2").blob_name(),
            Some("top_abc.png")
        );
        assert_eq!(item("file:///data/closet/a.jpg").blob_name(), Some("a.jpg"));
        assert_eq!(item("https://cdn.example/closet/").blob_name(), None);
    }
}
