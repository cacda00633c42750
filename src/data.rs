use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::features::ValidationError;
use crate::models::{Tunable, WeeklyRecord};

const DATE_FORMATS: [&str; 3] = ["%d-%m-%Y", "%Y-%m-%d", "%d/%m/%Y"];

/// Store-weeks held in memory, sorted by store then date.
#[derive(Debug, Clone)]
pub struct SalesDataset {
    records: Vec<WeeklyRecord>,
}

#[derive(Deserialize)]
struct CsvRow {
    #[serde(rename = "Store")]
    store: Option<u32>,
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Holiday_Flag")]
    holiday_flag: Option<u8>,
    #[serde(rename = "Temperature")]
    temperature: Option<f64>,
    #[serde(rename = "Fuel_Price")]
    fuel_price: Option<f64>,
    #[serde(rename = "CPI")]
    cpi: Option<f64>,
    #[serde(rename = "Unemployment")]
    unemployment: Option<f64>,
    #[serde(rename = "Weekly_Sales")]
    weekly_sales: Option<f64>,
}

impl CsvRow {
    fn into_record(self, row: usize) -> Result<WeeklyRecord, ValidationError> {
        let missing = |field: &str| ValidationError::MalformedRow {
            row,
            reason: format!("{field} is missing"),
        };

        let raw_date = self.date.ok_or_else(|| missing("Date"))?;
        let date = parse_date(&raw_date).ok_or_else(|| ValidationError::MalformedRow {
            row,
            reason: format!("unrecognised date {raw_date:?}"),
        })?;
        let holiday_flag = match self.holiday_flag.ok_or_else(|| missing("Holiday_Flag"))? {
            0 => false,
            1 => true,
            other => {
                return Err(ValidationError::MalformedRow {
                    row,
                    reason: format!("Holiday_Flag must be 0 or 1, got {other}"),
                })
            }
        };

        let record = WeeklyRecord {
            store_id: self.store.ok_or_else(|| missing("Store"))?,
            date,
            holiday_flag,
            temperature: self.temperature.ok_or_else(|| missing("Temperature"))?,
            fuel_price: self.fuel_price.ok_or_else(|| missing("Fuel_Price"))?,
            cpi: self.cpi.ok_or_else(|| missing("CPI"))?,
            unemployment: self.unemployment.ok_or_else(|| missing("Unemployment"))?,
            sales: self.weekly_sales,
        };

        let numbers = [
            ("Temperature", record.temperature),
            ("Fuel_Price", record.fuel_price),
            ("CPI", record.cpi),
            ("Unemployment", record.unemployment),
            ("Weekly_Sales", record.sales.unwrap_or(0.0)),
        ];
        if let Some((field, _)) = numbers.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ValidationError::MalformedRow {
                row,
                reason: format!("{field} is not a finite number"),
            });
        }

        Ok(record)
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}

impl SalesDataset {
    pub fn from_records(mut records: Vec<WeeklyRecord>) -> Result<Self, ValidationError> {
        records.sort_by(|a, b| (a.store_id, a.date).cmp(&(b.store_id, b.date)));
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[0].store_id == pair[1].store_id && pair[0].date == pair[1].date)
        {
            return Err(ValidationError::DuplicateWeek {
                store_id: pair[1].store_id,
                date: pair[1].date,
            });
        }
        Ok(Self { records })
    }

    pub fn load_csv(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open dataset {}", path.display()))?;
        let dataset = Self::from_reader(file)
            .with_context(|| format!("failed to load dataset {}", path.display()))?;
        if dataset.is_empty() {
            anyhow::bail!("dataset {} has no rows", path.display());
        }
        info!(
            path = %path.display(),
            records = dataset.records().len(),
            stores = dataset.stores().len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = Vec::new();

        // Row numbers count the header as row 1, matching what a spreadsheet shows.
        for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = index + 2;
            let csv_row = result.with_context(|| format!("row {row}: unreadable"))?;
            records.push(csv_row.into_record(row)?);
        }

        Ok(Self::from_records(records)?)
    }

    pub fn records(&self) -> &[WeeklyRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stores(&self) -> Vec<u32> {
        self.records
            .iter()
            .map(|record| record.store_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// All weeks for one store in date order.
    pub fn store_history(&self, store_id: u32) -> &[WeeklyRecord] {
        let start = self.records.partition_point(|r| r.store_id < store_id);
        let end = self.records.partition_point(|r| r.store_id <= store_id);
        &self.records[start..end]
    }

    /// The store's record for `date`, or the most recent one before it when
    /// the week is not in the dataset.
    pub fn base_record(&self, store_id: u32, date: NaiveDate) -> Result<&WeeklyRecord, ValidationError> {
        let history = self.store_history(store_id);
        if history.is_empty() {
            return Err(ValidationError::UnknownStore(store_id));
        }
        let upto = history.partition_point(|r| r.date <= date);
        if upto == 0 {
            return Err(ValidationError::NoBaseRecord { store_id, date });
        }
        Ok(&history[upto - 1])
    }

    pub fn average_sales(&self, store_id: u32) -> Option<f64> {
        let sales: Vec<f64> = self
            .store_history(store_id)
            .iter()
            .filter_map(|record| record.sales)
            .collect();
        if sales.is_empty() {
            None
        } else {
            Some(sales.iter().sum::<f64>() / sales.len() as f64)
        }
    }

    /// Up to `weeks` weeks with recorded sales, ending on or before `until`.
    pub fn recent_sales(&self, store_id: u32, until: NaiveDate, weeks: usize) -> Vec<&WeeklyRecord> {
        let mut recent: Vec<&WeeklyRecord> = self
            .store_history(store_id)
            .iter()
            .filter(|record| record.date <= until && record.sales.is_some())
            .rev()
            .take(weeks)
            .collect();
        recent.reverse();
        recent
    }

    pub fn observed_range(&self, feature: Tunable) -> Option<(f64, f64)> {
        self.records.iter().fold(None, |range, record| {
            let value = feature.value(record);
            Some(match range {
                None => (value, value),
                Some((min, max)) => (f64::min(min, value), f64::max(max, value)),
            })
        })
    }
}
