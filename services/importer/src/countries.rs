//! Country reference attributes
//!
//! Seven single-attribute JSON documents, each an array of
//! `{"country": <name>, <key>: <value>}` objects, joined by country name into
//! one `countries` row per entry of the abbreviation document.

use std::collections::HashMap;

use collector::CountryDocument;
use serde_json::Value as Json;

use crate::error::{ImportError, Result};
use crate::normalize::{flush_batch, FeedReport, INSERT_BATCH};
use crate::schema::{Column, SqlType, Value, COUNTRIES};
use crate::store::TableStore;

pub const FEED_NAME: &str = "country_json";

const COUNTRY_KEY: &str = "country";

/// `(country name, attribute value)` pairs of one document, in document order
pub fn parse_document(document: CountryDocument, content: &str) -> Result<Vec<(String, Json)>> {
    let feed = document.file_name();
    let objects: Vec<serde_json::Map<String, Json>> =
        serde_json::from_str(content).map_err(|e| ImportError::json(feed, e))?;

    Ok(objects
        .into_iter()
        .filter_map(|mut object| {
            let name = object.get(COUNTRY_KEY)?.as_str()?.to_string();
            let value = object.remove(document.value_key()).unwrap_or(Json::Null);
            Some((name, value))
        })
        .collect())
}

/// Document feeding a `countries` column; `None` for the name itself
fn document_for(column: &Column) -> Option<CountryDocument> {
    match column.name {
        "code" => Some(CountryDocument::Abbreviation),
        "population" => Some(CountryDocument::Population),
        "life_expectancy" => Some(CountryDocument::LifeExpectancy),
        "continent" => Some(CountryDocument::Continent),
        "capital" => Some(CountryDocument::CapitalCity),
        "population_density" => Some(CountryDocument::PopulationDensity),
        "avg_temperature" => Some(CountryDocument::AverageTemperature),
        _ => None,
    }
}

/// Map a JSON attribute onto a column type. Strings go through the same
/// coercion as CSV fields.
pub fn json_value(value: &Json, sql_type: SqlType) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::String(s) => Value::parse(s, sql_type),
        Json::Number(n) => match sql_type {
            SqlType::Text => Value::Text(n.to_string()),
            SqlType::BigInt => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map_or(Value::Null, Value::Int),
            SqlType::Double => n.as_f64().map_or(Value::Null, Value::Float),
        },
        other => Value::parse(&other.to_string(), sql_type),
    }
}

/// Join the documents into `countries` rows. Rows follow the abbreviation
/// document; any other document that lacks a country leaves its column NULL.
/// When a document lists a country twice the first entry wins.
pub fn build_country_rows(
    documents: &[(CountryDocument, String)],
    report: &mut FeedReport,
) -> Result<Vec<Vec<Value>>> {
    let mut base = None;
    let mut attributes: HashMap<CountryDocument, HashMap<String, Json>> = HashMap::new();

    for (document, content) in documents {
        let entries = parse_document(*document, content)?;
        if *document == CountryDocument::Abbreviation {
            base = Some(entries);
            continue;
        }
        let by_name = attributes.entry(*document).or_default();
        for (name, value) in entries {
            by_name.entry(name).or_insert(value);
        }
    }

    let base = base.ok_or_else(|| ImportError::empty_feed(CountryDocument::Abbreviation.file_name()))?;

    let rows = base
        .into_iter()
        .map(|(name, code)| {
            report.rows_read += 1;
            COUNTRIES
                .columns
                .iter()
                .map(|column| match document_for(column) {
                    Some(CountryDocument::Abbreviation) => json_value(&code, column.sql_type),
                    Some(document) => attributes
                        .get(&document)
                        .and_then(|by_name| by_name.get(&name))
                        .map_or(Value::Null, |value| json_value(value, column.sql_type)),
                    None => Value::Text(name.clone()),
                })
                .collect()
        })
        .collect();

    Ok(rows)
}

/// Replace `countries` with the joined documents.
pub async fn import_countries<S: TableStore>(
    store: &S,
    documents: &[(CountryDocument, String)],
) -> Result<FeedReport> {
    let table = &COUNTRIES;
    let mut report = FeedReport::new(FEED_NAME, table.name);
    let rows = build_country_rows(documents, &mut report)?;

    store.prepare_shadow(table).await?;
    for chunk in rows.chunks(INSERT_BATCH) {
        let mut batch = chunk.to_vec();
        flush_batch(store, table, &mut batch, &mut report).await?;
    }
    store.swap_in(table).await?;
    report.log();

    Ok(report)
}
