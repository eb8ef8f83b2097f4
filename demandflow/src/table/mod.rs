//! Uniform tabular datasets and their CSV encoding.
//!
//! A [`Table`] is what moves between the relational source, the blob store
//! and the staging area. Typed rows go in and out through serde via
//! [`Table::from_records`] and [`Table::to_records`].

mod records;

pub use records::{
    DemandRecord, DemandRow, MaterialDemandRecord, ProductCategory, RawMaterial, TableRecord,
};

use crate::errors::DemandflowError;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Column headers plus rows of text cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates an empty table with the given headers.
    #[must_use]
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the row width does not match the headers.
    pub fn push_row(
        &mut self,
        row: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), DemandflowError> {
        let row: Vec<String> = row.into_iter().map(Into::into).collect();
        if row.len() != self.headers.len() {
            return Err(DemandflowError::invalid_record(
                self.rows.len(),
                format!("expected {} cells, got {}", self.headers.len(), row.len()),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Returns the column headers.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Returns the data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Returns the number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encodes the table as CSV with a header line and no index column.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSV writer fails.
    pub fn to_csv(&self) -> Result<Vec<u8>, DemandflowError> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        if !self.headers.is_empty() {
            writer.write_record(&self.headers)?;
        }
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| DemandflowError::Io(e.into_error()))
    }

    /// Decodes CSV with a header line.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not well-formed CSV.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, DemandflowError> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Builds a table from typed records, using the record's column list as headers.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized.
    pub fn from_records<T: TableRecord + Serialize>(records: &[T]) -> Result<Self, DemandflowError> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        for record in records {
            writer.serialize(record)?;
        }
        let bytes = writer.into_inner().map_err(|e| DemandflowError::Io(e.into_error()))?;

        let mut table = Self::new(T::COLUMNS.iter().copied());
        let mut reader = ReaderBuilder::new().has_headers(false).from_reader(bytes.as_slice());
        for record in reader.records() {
            table.push_row(record?.iter())?;
        }
        Ok(table)
    }

    /// Deserializes every row into a typed record, matching columns by header name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` naming the first row that does not fit `T`.
    pub fn to_records<T: DeserializeOwned>(&self) -> Result<Vec<T>, DemandflowError> {
        let header = StringRecord::from(self.headers.clone());
        self.rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                StringRecord::from(row.clone())
                    .deserialize(Some(&header))
                    .map_err(|e| DemandflowError::invalid_record(index, e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    const DEMAND_CSV: &str = "date,shop_id,product_name,demand\n\
                              2023-01-01,1,cheap,100\n\
                              2023-01-01,2,expensive,5\n";

    #[test]
    fn test_from_csv_reads_headers_and_rows() {
        let table = Table::from_csv(DEMAND_CSV.as_bytes()).unwrap();

        assert_eq!(table.headers(), ["date", "shop_id", "product_name", "demand"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1][2], "expensive");
    }

    #[test]
    fn test_to_csv_has_no_index_column() {
        let table = Table::from_csv(DEMAND_CSV.as_bytes()).unwrap();
        let encoded = String::from_utf8(table.to_csv().unwrap()).unwrap();

        assert_eq!(encoded, DEMAND_CSV);
        assert!(encoded.starts_with("date,shop_id,"));
    }

    #[test]
    fn test_push_row_width_mismatch() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row(["1"]).is_err());
        assert!(table.push_row(["1", "2"]).is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_to_records_by_header_name() {
        // Columns in a different order than the struct fields.
        let csv = "product_name,demand,shop_id,date\nmedium,3,7,2023-02-01\n";
        let rows: Vec<DemandRow> = Table::from_csv(csv.as_bytes()).unwrap().to_records().unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_name, "medium");
        assert_eq!(rows[0].shop_id, "7");
        assert!((rows[0].demand - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_to_records_reports_row() {
        let csv = "date,shop_id,product_name,demand\n2023-01-01,1,cheap,lots\n";
        let err = Table::from_csv(csv.as_bytes())
            .unwrap()
            .to_records::<DemandRow>()
            .unwrap_err();

        assert!(matches!(err, DemandflowError::InvalidRecord { row: 0, .. }));
    }

    #[test]
    fn test_from_records_material_columns() {
        let records = vec![MaterialDemandRecord {
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            shop_id: "1".to_string(),
            raw_material: RawMaterial::LocalArabica,
            demand_kg: 2.0,
        }];
        let table = Table::from_records(&records).unwrap();

        assert_eq!(table.headers(), ["date", "shop_id", "raw_material", "demand_kg"]);
        assert_eq!(table.rows()[0], ["2023-01-01", "1", "local_arabica", "2.0"]);
    }

    #[test]
    fn test_from_records_empty_keeps_headers() {
        let table = Table::from_records::<MaterialDemandRecord>(&[]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.headers().len(), 4);
    }
}
