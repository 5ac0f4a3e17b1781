use crate::domain::fees::LineItem;
use crate::domain::ports::{EcoSavings, ItemDetails};
use crate::error::{Result, SettlementError};
use serde::Deserialize;
use std::io::Read;

/// One row of an item catalog export. Eco columns may be left empty.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    owner_id: String,
    category: String,
    #[serde(default)]
    co2_saved: Option<f64>,
    #[serde(default)]
    water_saved: Option<f64>,
    #[serde(default)]
    waste_reduced: Option<f64>,
    #[serde(default)]
    energy_saved: Option<f64>,
    #[serde(default)]
    trees_equivalent: Option<f64>,
}

impl From<CatalogRow> for ItemDetails {
    fn from(row: CatalogRow) -> Self {
        let eco = [
            row.co2_saved,
            row.water_saved,
            row.waste_reduced,
            row.energy_saved,
            row.trees_equivalent,
        ];
        let eco_savings = eco.iter().any(Option::is_some).then(|| EcoSavings {
            co2_saved: row.co2_saved.unwrap_or_default(),
            water_saved: row.water_saved.unwrap_or_default(),
            waste_reduced: row.waste_reduced.unwrap_or_default(),
            energy_saved: row.energy_saved.unwrap_or_default(),
            trees_equivalent: row.trees_equivalent.unwrap_or_default(),
        });
        Self {
            id: row.id,
            owner_id: row.owner_id,
            category: row.category,
            eco_savings,
        }
    }
}

/// Reads items from a CSV source.
///
/// Whitespace is trimmed and record lengths are flexible, so trailing optional
/// columns can be omitted.
pub struct ItemReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ItemReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lines to quote: `id, name, category, kind, amount`.
    pub fn line_items(self) -> impl Iterator<Item = Result<LineItem>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(SettlementError::from))
    }

    /// Catalog entries: `id, owner_id, category` plus optional eco columns.
    pub fn catalog_items(self) -> impl Iterator<Item = Result<ItemDetails>> {
        self.reader
            .into_deserialize::<CatalogRow>()
            .map(|result| result.map(ItemDetails::from).map_err(SettlementError::from))
    }
}
