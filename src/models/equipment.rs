//! Equipment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Equipment category. The set is open: unknown slugs are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Sports,
    Lab,
    Music,
    Camera,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Sports => "sports",
            Category::Lab => "lab",
            Category::Music => "music",
            Category::Camera => "camera",
            Category::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sports" => Category::Sports,
            "lab" => Category::Lab,
            "music" => Category::Music,
            "camera" => Category::Camera,
            other => Category::Other(other.to_string()),
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Category::from(s.to_string())
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Physical condition of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Good,
    Fair,
    Damaged,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Damaged => "damaged",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Condition::New),
            "good" => Ok(Condition::Good),
            "fair" => Ok(Condition::Fair),
            "damaged" => Ok(Condition::Damaged),
            _ => Err(format!("Invalid condition: {}", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Internal row structure for database queries (with String enums)
#[derive(Debug, Clone, FromRow)]
pub struct EquipmentRow {
    id: i32,
    name: String,
    category: String,
    condition: String,
    quantity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EquipmentRow> for EquipmentItem {
    fn from(row: EquipmentRow) -> Self {
        EquipmentItem {
            id: row.id,
            name: row.name,
            category: Category::from(row.category),
            condition: row.condition.parse().unwrap_or(Condition::Good),
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Equipment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EquipmentItem {
    pub id: i32,
    pub name: String,
    #[schema(value_type = String, example = "lab")]
    pub category: Category,
    pub condition: Condition,
    /// Total units owned; only admin edits change it
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry joined with live availability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EquipmentView {
    pub id: i32,
    pub name: String,
    #[schema(value_type = String, example = "lab")]
    pub category: Category,
    pub condition: Condition,
    pub quantity: i32,
    pub available_quantity: i32,
}

impl EquipmentView {
    pub fn new(item: EquipmentItem, available_quantity: i32) -> Self {
        Self {
            id: item.id,
            name: item.name,
            category: item.category,
            condition: item.condition,
            quantity: item.quantity,
            available_quantity,
        }
    }
}

/// Catalog listing parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EquipmentQuery {
    /// Category slug; blank means no filter
    #[param(value_type = Option<String>)]
    #[serde(default, deserialize_with = "non_blank_category")]
    pub category: Option<Category>,
    /// Case-insensitive name contains
    pub search: Option<String>,
}

fn non_blank_category<'de, D>(deserializer: D) -> Result<Option<Category>, D::Error>
where
    D: Deserializer<'de>,
{
    let slug = Option::<String>::deserialize(deserializer)?;
    Ok(slug.filter(|s| !s.trim().is_empty()).map(Category::from))
}

/// Create equipment request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateEquipment {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[schema(value_type = String, example = "camera")]
    pub category: Category,
    pub condition: Option<Condition>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
}

/// Update equipment request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateEquipment {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub category: Option<Category>,
    pub condition: Option<Condition>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: Option<i32>,
}

impl UpdateEquipment {
    /// Apply this edit to an item in place
    pub fn apply_to(&self, item: &mut EquipmentItem, now: DateTime<Utc>) {
        if let Some(ref name) = self.name {
            item.name = name.clone();
        }
        if let Some(ref category) = self.category {
            item.category = category.clone();
        }
        if let Some(condition) = self.condition {
            item.condition = condition;
        }
        if let Some(quantity) = self.quantity {
            item.quantity = quantity;
        }
        item.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_known_and_open() {
        assert_eq!(Category::from("Lab"), Category::Lab);
        assert_eq!(Category::from(" camera "), Category::Camera);
        assert_eq!(Category::from("robotics"), Category::Other("robotics".into()));
        assert_eq!(Category::Other("robotics".into()).as_str(), "robotics");
    }

    #[test]
    fn test_category_serde_is_a_plain_string() {
        let json = serde_json::to_string(&Category::Music).unwrap();
        assert_eq!(json, "\"music\"");
        let parsed: Category = serde_json::from_str("\"sports\"").unwrap();
        assert_eq!(parsed, Category::Sports);
    }

    #[test]
    fn test_blank_category_query_is_no_filter() {
        let parse = |uri: &str| {
            axum::extract::Query::<EquipmentQuery>::try_from_uri(&uri.parse().unwrap())
                .unwrap()
                .0
        };
        assert_eq!(parse("/equipment?category=").category, None);
        assert_eq!(parse("/equipment?category=%20%20").category, None);
        assert_eq!(parse("/equipment").category, None);
        assert_eq!(parse("/equipment?category=Lab&search=scope").category, Some(Category::Lab));
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!("Damaged".parse::<Condition>(), Ok(Condition::Damaged));
        assert!("broken".parse::<Condition>().is_err());
    }

    #[test]
    fn test_update_applies_only_given_fields() {
        let now = Utc::now();
        let mut item = EquipmentItem {
            id: 1,
            name: "Tripod".into(),
            category: Category::Camera,
            condition: Condition::Good,
            quantity: 3,
            created_at: now,
            updated_at: now,
        };
        let edit = UpdateEquipment {
            condition: Some(Condition::Fair),
            ..Default::default()
        };
        edit.apply_to(&mut item, now);
        assert_eq!(item.condition, Condition::Fair);
        assert_eq!(item.name, "Tripod");
        assert_eq!(item.quantity, 3);
    }

    #[test]
    fn test_create_rejects_negative_quantity() {
        let data = CreateEquipment {
            name: "Beaker set".into(),
            category: Category::Lab,
            condition: None,
            quantity: -1,
        };
        assert!(data.validate().is_err());
    }
}
