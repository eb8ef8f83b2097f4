//! Typed rows for the product and raw-material demand datasets.

use crate::errors::DemandflowError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record type with a fixed CSV column layout.
pub trait TableRecord {
    /// Column names in serialization order.
    const COLUMNS: &'static [&'static str];
}

/// Product tier sold by a shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCategory {
    /// 20 g local arabica per unit.
    Cheap,
    /// 10 g local and 10 g foreign arabica per unit.
    Medium,
    /// 10 g foreign arabica and 10 g robusta per unit.
    Expensive,
}

impl ProductCategory {
    /// Every category in the rule table.
    pub const ALL: [Self; 3] = [Self::Cheap, Self::Medium, Self::Expensive];

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cheap => "cheap",
            Self::Medium => "medium",
            Self::Expensive => "expensive",
        }
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductCategory {
    type Err = DemandflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cheap" => Ok(Self::Cheap),
            "medium" => Ok(Self::Medium),
            "expensive" => Ok(Self::Expensive),
            other => Err(DemandflowError::unknown_product(other)),
        }
    }
}

/// Coffee bean type a product is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMaterial {
    /// Locally sourced arabica.
    LocalArabica,
    /// Imported arabica.
    ForeignArabica,
    /// Robusta.
    Robusta,
}

impl RawMaterial {
    /// All raw materials, in output column order.
    pub const ALL: [Self; 3] = [Self::LocalArabica, Self::ForeignArabica, Self::Robusta];

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalArabica => "local_arabica",
            Self::ForeignArabica => "foreign_arabica",
            Self::Robusta => "robusta",
        }
    }

    /// Position of this material in [`RawMaterial::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::LocalArabica => 0,
            Self::ForeignArabica => 1,
            Self::Robusta => 2,
        }
    }
}

impl fmt::Display for RawMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product demand row exactly as extracted, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRow {
    /// Calendar date, `YYYY-MM-DD` (a trailing time part is tolerated).
    pub date: String,
    /// Shop identifier.
    pub shop_id: String,
    /// Product tier name.
    pub product_name: String,
    /// Units demanded.
    pub demand: f64,
}

impl TableRecord for DemandRow {
    const COLUMNS: &'static [&'static str] = &["date", "shop_id", "product_name", "demand"];
}

/// A validated product demand row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    /// Calendar date.
    pub date: NaiveDate,
    /// Shop identifier.
    pub shop_id: String,
    /// Product tier.
    pub product_name: ProductCategory,
    /// Units demanded, never negative.
    pub demand: f64,
}

impl DemandRecord {
    /// Validates a raw row.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProductCategory` for a product outside the rule table and
    /// `InvalidRecord` for an unparseable date or a negative or non-finite demand.
    pub fn parse(row_index: usize, row: &DemandRow) -> Result<Self, DemandflowError> {
        let product_name = row.product_name.parse::<ProductCategory>()?;
        let date = parse_date(&row.date)
            .ok_or_else(|| DemandflowError::invalid_record(row_index, format!("bad date '{}'", row.date)))?;
        if !row.demand.is_finite() || row.demand < 0.0 {
            return Err(DemandflowError::invalid_record(
                row_index,
                format!("demand must be a non-negative number, got {}", row.demand),
            ));
        }

        Ok(Self {
            date,
            shop_id: row.shop_id.clone(),
            product_name,
            demand: row.demand,
        })
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Raw material demand for one shop on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDemandRecord {
    /// Calendar date.
    pub date: NaiveDate,
    /// Shop identifier.
    pub shop_id: String,
    /// Bean type.
    pub raw_material: RawMaterial,
    /// Quantity in kilograms.
    pub demand_kg: f64,
}

impl TableRecord for MaterialDemandRecord {
    const COLUMNS: &'static [&'static str] = &["date", "shop_id", "raw_material", "demand_kg"];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, product: &str, demand: f64) -> DemandRow {
        DemandRow {
            date: date.to_string(),
            shop_id: "1".to_string(),
            product_name: product.to_string(),
            demand,
        }
    }

    #[test]
    fn test_product_category_from_str() {
        assert_eq!("cheap".parse::<ProductCategory>().unwrap(), ProductCategory::Cheap);
        assert_eq!("expensive".parse::<ProductCategory>().unwrap(), ProductCategory::Expensive);
        assert!(matches!(
            "Cheap".parse::<ProductCategory>(),
            Err(DemandflowError::UnknownProductCategory { .. })
        ));
    }

    #[test]
    fn test_raw_material_serialize() {
        let json = serde_json::to_string(&RawMaterial::ForeignArabica).unwrap();
        assert_eq!(json, r#""foreign_arabica""#);
        assert_eq!(RawMaterial::ALL[RawMaterial::Robusta.index()], RawMaterial::Robusta);
    }

    #[test]
    fn test_parse_valid_row() {
        let record = DemandRecord::parse(0, &row("2023-01-01", "medium", 4.0)).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(record.product_name, ProductCategory::Medium);
    }

    #[test]
    fn test_parse_timestamp_date() {
        let record = DemandRecord::parse(0, &row("2023-05-25 00:00:00", "cheap", 1.0)).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2023, 5, 25).unwrap());
    }

    #[test]
    fn test_parse_rejects_unknown_product() {
        let err = DemandRecord::parse(3, &row("2023-01-01", "luxury", 1.0)).unwrap_err();
        assert!(matches!(err, DemandflowError::UnknownProductCategory { value } if value == "luxury"));
    }

    #[test]
    fn test_parse_rejects_negative_demand() {
        let err = DemandRecord::parse(2, &row("2023-01-01", "cheap", -1.0)).unwrap_err();
        assert!(matches!(err, DemandflowError::InvalidRecord { row: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_date() {
        let err = DemandRecord::parse(0, &row("01/01/2023", "cheap", 1.0)).unwrap_err();
        assert!(matches!(err, DemandflowError::InvalidRecord { .. }));
    }
}
