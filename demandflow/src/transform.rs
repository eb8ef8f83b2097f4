//! Product demand to raw-material demand.
//!
//! Rows are validated one at a time so errors can name the offending row.
//! The rest runs as a polars plan: gram columns from the rule table, a sum
//! per `(date, shop_id)`, an unpivot of the three material columns into
//! rows, and the grams-to-kilograms conversion.

use crate::errors::DemandflowError;
use crate::table::{
    DemandRecord, DemandRow, MaterialDemandRecord, ProductCategory, RawMaterial, Table,
};
use chrono::NaiveDate;
use polars::prelude::*;
use std::io::Cursor;
use tracing::debug;

const DATE: &str = "date";
const SHOP_ID: &str = "shop_id";
const PRODUCT_NAME: &str = "product_name";
const DEMAND: &str = "demand";
const RAW_MATERIAL: &str = "raw_material";
const DEMAND_KG: &str = "demand_kg";

/// Grams of each raw material per unit of product, indexed like [`RawMaterial::ALL`].
const fn grams_per_unit(category: ProductCategory) -> [f64; 3] {
    match category {
        ProductCategory::Cheap => [20.0, 0.0, 0.0],
        ProductCategory::Medium => [10.0, 10.0, 0.0],
        ProductCategory::Expensive => [0.0, 10.0, 10.0],
    }
}

/// `demand` times the grams of `material` per unit of the row's product.
fn gram_column(material: RawMaterial) -> Expr {
    ProductCategory::ALL
        .iter()
        .fold(lit(0.0), |otherwise, &category| {
            when(col(PRODUCT_NAME).eq(lit(category.as_str())))
                .then(col(DEMAND) * lit(grams_per_unit(category)[material.index()]))
                .otherwise(otherwise)
        })
        .alias(material.as_str())
}

/// Derives the raw-material demand dataset from product demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemandTransformer;

impl DemandTransformer {
    /// Creates a new transformer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates raw rows and transforms them.
    ///
    /// # Errors
    ///
    /// Fails on the first row with an unknown product or invalid values.
    pub fn transform(&self, rows: &[DemandRow]) -> Result<Vec<MaterialDemandRecord>, DemandflowError> {
        let records = rows
            .iter()
            .enumerate()
            .map(|(index, row)| DemandRecord::parse(index, row))
            .collect::<Result<Vec<_>, _>>()?;
        self.transform_records(&records)
    }

    /// Transforms already validated records.
    ///
    /// Output is material-major: every group for `local_arabica`, then
    /// `foreign_arabica`, then `robusta`, each block ordered by `(date, shop_id)`.
    ///
    /// # Errors
    ///
    /// Returns `Frame` if the dataframe plan fails.
    pub fn transform_records(
        &self,
        records: &[DemandRecord],
    ) -> Result<Vec<MaterialDemandRecord>, DemandflowError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let totals = self.aggregate(records)?;
        let output = material_records(&melt_to_kg(&totals)?)?;
        debug!(
            input_rows = records.len(),
            groups = totals.height(),
            output_rows = output.len(),
            "Transformed product demand"
        );
        Ok(output)
    }

    /// Applies the rule table and sums the gram columns per `(date, shop_id)`.
    ///
    /// The frame has columns `date, shop_id, local_arabica, foreign_arabica,
    /// robusta`, one row per group, sorted by `(date, shop_id)`.
    ///
    /// # Errors
    ///
    /// Returns `Frame` if the dataframe plan fails.
    pub fn aggregate(&self, records: &[DemandRecord]) -> Result<DataFrame, DemandflowError> {
        let gram_columns: Vec<Expr> = RawMaterial::ALL.into_iter().map(gram_column).collect();
        let sums: Vec<Expr> = RawMaterial::ALL
            .into_iter()
            .map(|material| col(material.as_str()).sum())
            .collect();

        let totals = demand_frame(records)?
            .lazy()
            .with_columns(gram_columns)
            .group_by([col(DATE), col(SHOP_ID)])
            .agg(sums)
            .sort([DATE, SHOP_ID], SortMultipleOptions::default())
            .collect()?;
        Ok(totals)
    }

    /// Table in, table out: `date, shop_id, product_name, demand` to
    /// `date, shop_id, raw_material, demand_kg`.
    ///
    /// # Errors
    ///
    /// Fails if a row does not validate, or with `Frame` if the table cannot
    /// be read as a dataframe.
    pub fn transform_table(&self, table: &Table) -> Result<Table, DemandflowError> {
        if table.is_empty() {
            return Table::from_records::<MaterialDemandRecord>(&[]);
        }
        // Every column is read as text; typing happens in `DemandRecord::parse`.
        let raw = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(Cursor::new(table.to_csv()?))
            .finish()?;
        let output = self.transform(&demand_rows(&raw)?)?;
        Table::from_records(&output)
    }
}

fn demand_frame(records: &[DemandRecord]) -> Result<DataFrame, DemandflowError> {
    let dates: Vec<String> = records
        .iter()
        .map(|r| r.date.format("%Y-%m-%d").to_string())
        .collect();
    let shops: Vec<&str> = records.iter().map(|r| r.shop_id.as_str()).collect();
    let products: Vec<&str> = records.iter().map(|r| r.product_name.as_str()).collect();
    let demand: Vec<f64> = records.iter().map(|r| r.demand).collect();

    Ok(df!(
        DATE => dates,
        SHOP_ID => shops,
        PRODUCT_NAME => products,
        DEMAND => demand
    )?)
}

fn demand_rows(raw: &DataFrame) -> Result<Vec<DemandRow>, DemandflowError> {
    let dates = raw.column(DATE)?.str()?;
    let shops = raw.column(SHOP_ID)?.str()?;
    let products = raw.column(PRODUCT_NAME)?.str()?;
    let demand = raw.column(DEMAND)?.str()?;

    dates
        .into_iter()
        .zip(shops)
        .zip(products)
        .zip(demand)
        .enumerate()
        .map(|(index, (((date, shop), product), demand))| -> Result<DemandRow, DemandflowError> {
            let demand = demand.unwrap_or_default();
            let demand = demand.trim().parse::<f64>().map_err(|_| {
                DemandflowError::invalid_record(index, format!("demand '{demand}' is not a number"))
            })?;
            Ok(DemandRow {
                date: date.unwrap_or_default().to_string(),
                shop_id: shop.unwrap_or_default().to_string(),
                product_name: product.unwrap_or_default().to_string(),
                demand,
            })
        })
        .collect()
}

// Wide to long: the three material columns become `raw_material` / `demand`
// rows, one block per material.
fn melt_to_kg(totals: &DataFrame) -> Result<DataFrame, DemandflowError> {
    let long = totals.unpivot(RawMaterial::ALL.map(|m| m.as_str()), [DATE, SHOP_ID])?;
    let output = long
        .lazy()
        .select([
            col(DATE),
            col(SHOP_ID),
            col("variable").alias(RAW_MATERIAL),
            col("value").alias(DEMAND),
        ])
        .with_column((col(DEMAND) / lit(1000.0)).alias(DEMAND_KG))
        .select([col(DATE), col(SHOP_ID), col(RAW_MATERIAL), col(DEMAND_KG)])
        .collect()?;
    Ok(output)
}

fn material_records(frame: &DataFrame) -> Result<Vec<MaterialDemandRecord>, DemandflowError> {
    let dates = frame.column(DATE)?.str()?;
    let shops = frame.column(SHOP_ID)?.str()?;
    let materials = frame.column(RAW_MATERIAL)?.str()?;
    let kgs = frame.column(DEMAND_KG)?.f64()?;

    dates
        .into_iter()
        .zip(shops)
        .zip(materials)
        .zip(kgs)
        .map(|(((date, shop), material), kg)| -> Result<MaterialDemandRecord, DemandflowError> {
            let (Some(date), Some(shop), Some(material), Some(kg)) = (date, shop, material, kg) else {
                return Err(frame_error("null cell in transformed output"));
            };
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| frame_error(format!("bad date '{date}' in transformed output: {e}")))?;
            let raw_material = RawMaterial::ALL
                .into_iter()
                .find(|m| m.as_str() == material)
                .ok_or_else(|| frame_error(format!("unknown raw material '{material}'")))?;
            Ok(MaterialDemandRecord {
                date,
                shop_id: shop.to_string(),
                raw_material,
                demand_kg: kg,
            })
        })
        .collect()
}

fn frame_error(message: impl Into<String>) -> DemandflowError {
    let message: String = message.into();
    DemandflowError::Frame(PolarsError::ComputeError(message.into()))
}
