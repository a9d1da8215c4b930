use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::models::{DishCatalogEntry, MacroPriors, NutrientProfile};

const ID_COL: &str = "id";
const NAME_COL: &str = "name";
const CUISINE_COL: &str = "cuisine";
const ALIASES_COL: &str = "aliases";
const KCAL_COL: &str = "kcal";
const PROTEIN_COL: &str = "protein_g";
const CARBS_COL: &str = "carbs_g";
const FAT_COL: &str = "fat_g";
const FIBER_COL: &str = "fiber_g";
const SUGAR_COL: &str = "sugar_g";
const SODIUM_COL: &str = "sodium_mg";
const PRIOR_PROTEIN_COL: &str = "prior_protein";
const PRIOR_CARBS_COL: &str = "prior_carbs";
const PRIOR_FAT_COL: &str = "prior_fat";

const ALIAS_SEPARATOR: char = ';';

/// One parsed row of the dish seed file.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub entry: DishCatalogEntry,
    pub nutrients: NutrientProfile,
}

fn parse_optional_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        Self { index }
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Column '{}' not found", name))
    }

    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index.get(name).and_then(|&i| record.get(i))
    }

    fn number(&self, record: &StringRecord, name: &str) -> Option<f64> {
        self.get(record, name).and_then(parse_optional_f64)
    }
}

fn parse_priors(columns: &Columns, record: &StringRecord) -> Option<MacroPriors> {
    let protein = columns.number(record, PRIOR_PROTEIN_COL)?;
    let carbs = columns.number(record, PRIOR_CARBS_COL)?;
    let fat = columns.number(record, PRIOR_FAT_COL)?;
    Some(MacroPriors { protein, carbs, fat })
}

/// Loads the dish seed CSV. Names are unique case-insensitively; a later row replaces an earlier one.
pub fn load_dish_catalog(csv_path: &Path) -> Result<Vec<CatalogRecord>> {
    if !csv_path.exists() {
        return Err(anyhow::anyhow!("Dish catalog CSV file not found at: {:?}", csv_path));
    }

    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open dish catalog CSV file at {:?}", csv_path))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);

    let columns = Columns::new(rdr.headers()?);
    let name_idx = columns.require(NAME_COL)?;
    columns.require(KCAL_COL)?;

    let mut records: Vec<CatalogRecord> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for (row_index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;

        let Some(name) = record.get(name_idx).and_then(non_empty) else {
            debug!(row_index, "skipping dish row with empty name");
            continue;
        };
        let Some(calories) = columns.number(&record, KCAL_COL) else {
            warn!(row_index, name = %name, "skipping dish row without a usable kcal value");
            continue;
        };

        let aliases = columns
            .get(&record, ALIASES_COL)
            .map(|raw| raw.split(ALIAS_SEPARATOR).filter_map(non_empty).collect())
            .unwrap_or_default();

        let dish_id = columns
            .get(&record, ID_COL)
            .and_then(non_empty)
            .unwrap_or_else(|| format!("dish-{}", row_index));

        let parsed = CatalogRecord {
            entry: DishCatalogEntry {
                dish_id,
                name,
                cuisine: columns.get(&record, CUISINE_COL).and_then(non_empty),
                aliases,
                macro_priors: parse_priors(&columns, &record),
            },
            nutrients: NutrientProfile {
                calories,
                protein_g: columns.number(&record, PROTEIN_COL),
                carbs_g: columns.number(&record, CARBS_COL),
                fat_g: columns.number(&record, FAT_COL),
                fiber_g: columns.number(&record, FIBER_COL),
                sugar_g: columns.number(&record, SUGAR_COL),
                sodium_mg: columns.number(&record, SODIUM_COL),
            },
        };

        let key = parsed.entry.name.to_lowercase();
        match by_name.get(&key) {
            Some(&existing) => {
                // Keep the original id so vectors already indexed under it stay valid.
                let dish_id = records[existing].entry.dish_id.clone();
                records[existing] = parsed;
                records[existing].entry.dish_id = dish_id;
            }
            None => {
                by_name.insert(key, records.len());
                records.push(parsed);
            }
        }
    }

    if records.is_empty() {
        return Err(anyhow::anyhow!("No valid dishes loaded from {:?}", csv_path));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str =
        "name,cuisine,aliases,kcal,protein_g,carbs_g,fat_g,fiber_g,sugar_g,sodium_mg,prior_protein,prior_carbs,prior_fat";

    fn create_test_csv_file(rows: &[&str]) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", HEADER)?;
        for row in rows {
            writeln!(file, "{}", row)?;
        }
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_dish_catalog_success() -> Result<()> {
        let file = create_test_csv_file(&[
            "Pad Thai,Thai,phad thai;pad thai noodles,650,25,80,22,3,12,1200,0.2,0.5,0.3",
            "Caesar Salad,American,,480,12,20,38,,4,900,,,",
            ",Nowhere,,100,1,1,1,1,1,1,,,",
            "Mystery Stew,Unknown,,not-a-number,1,1,1,1,1,1,,,",
        ])?;
        let records = load_dish_catalog(file.path())?;
        assert_eq!(records.len(), 2);

        let pad_thai = &records[0];
        assert_eq!(pad_thai.entry.dish_id, "dish-0");
        assert_eq!(pad_thai.entry.aliases, vec!["phad thai", "pad thai noodles"]);
        assert_eq!(pad_thai.entry.cuisine.as_deref(), Some("Thai"));
        assert_eq!(
            pad_thai.entry.macro_priors,
            Some(MacroPriors { protein: 0.2, carbs: 0.5, fat: 0.3 })
        );
        assert_eq!(pad_thai.nutrients.calories, 650.0);

        let caesar = &records[1];
        assert!(caesar.entry.aliases.is_empty());
        assert_eq!(caesar.entry.macro_priors, None);
        assert_eq!(caesar.nutrients.fiber_g, None);
        assert_eq!(caesar.nutrients.sodium_mg, Some(900.0));
        Ok(())
    }

    #[test]
    fn test_duplicate_names_upsert() -> Result<()> {
        let file = create_test_csv_file(&[
            "Ramen,Japanese,,500,20,60,18,2,4,1800,,,",
            "ramen,Japanese,shoyu ramen,550,22,62,20,2,5,1900,,,",
        ])?;
        let records = load_dish_catalog(file.path())?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.dish_id, "dish-0");
        assert_eq!(records[0].nutrients.calories, 550.0);
        assert_eq!(records[0].entry.aliases, vec!["shoyu ramen"]);
        Ok(())
    }

    #[test]
    fn test_explicit_id_column() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,name,kcal")?;
        writeln!(file, "abc-123,Falafel,333")?;
        file.flush()?;
        let records = load_dish_catalog(file.path())?;
        assert_eq!(records[0].entry.dish_id, "abc-123");
        assert_eq!(records[0].nutrients.protein_g, None);
        Ok(())
    }

    #[test]
    fn test_missing_required_column() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "name,protein_g")?;
        writeln!(file, "Apple,0.3")?;
        file.flush()?;

        let result = load_dish_catalog(file.path());
        assert!(result.unwrap_err().to_string().contains("Column 'kcal' not found"));
        Ok(())
    }

    #[test]
    fn test_empty_file_with_headers() -> Result<()> {
        let file = create_test_csv_file(&[])?;
        let result = load_dish_catalog(file.path());
        assert!(result.unwrap_err().to_string().contains("No valid dishes loaded"));
        Ok(())
    }

    #[test]
    fn test_file_not_found() {
        let result = load_dish_catalog(Path::new("this_file_does_not_exist.csv"));
        assert!(result.unwrap_err().to_string().contains("Dish catalog CSV file not found"));
    }
}
