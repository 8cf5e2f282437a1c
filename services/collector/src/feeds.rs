//! Feed catalog: every remote document the pipeline reads, by name.

use serde::Serialize;

pub const COVID_CSV_BASE_URL: &str =
    "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/web-data/data/";
pub const COUNTRY_LUT_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/UID_ISO_FIPS_LookUp_Table.csv";
pub const TIME_SERIES_BASE_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series/";
pub const COUNTRY_JSON_BASE_URL: &str =
    "https://raw.githubusercontent.com/samayo/country-json/master/src/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Csv,
    Json,
}

/// A named remote document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub name: String,
    /// File name under the base URL; also the file name used when captured to disk
    pub file_name: String,
    pub url: String,
    pub format: FeedFormat,
}

impl Feed {
    fn under(base: &str, name: &str, file_name: &str, format: FeedFormat) -> Self {
        Self {
            name: name.to_string(),
            file_name: file_name.to_string(),
            url: join_url(base, file_name),
            format,
        }
    }
}

/// Single-attribute country documents, each a JSON array of
/// `{"country": <name>, <value_key>: <value>}` objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountryDocument {
    Abbreviation,
    Population,
    LifeExpectancy,
    Continent,
    CapitalCity,
    PopulationDensity,
    AverageTemperature,
}

impl CountryDocument {
    pub const ALL: [CountryDocument; 7] = [
        CountryDocument::Abbreviation,
        CountryDocument::Population,
        CountryDocument::LifeExpectancy,
        CountryDocument::Continent,
        CountryDocument::CapitalCity,
        CountryDocument::PopulationDensity,
        CountryDocument::AverageTemperature,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Abbreviation => "country-by-abbreviation.json",
            Self::Population => "country-by-population.json",
            Self::LifeExpectancy => "country-by-life-expectancy.json",
            Self::Continent => "country-by-continent.json",
            Self::CapitalCity => "country-by-capital-city.json",
            Self::PopulationDensity => "country-by-population-density.json",
            Self::AverageTemperature => "country-by-yearly-average-temperature.json",
        }
    }

    /// Object key holding the attribute value
    pub fn value_key(&self) -> &'static str {
        match self {
            Self::Abbreviation => "abbreviation",
            Self::Population => "population",
            Self::LifeExpectancy => "expectancy",
            Self::Continent => "continent",
            Self::CapitalCity => "city",
            Self::PopulationDensity => "density",
            Self::AverageTemperature => "temperature",
        }
    }
}

/// Base URLs for all feeds. Defaults point at the public upstream sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCatalog {
    pub covid_csv_base: String,
    pub lookup_url: String,
    pub time_series_base: String,
    pub country_json_base: String,
}

impl Default for FeedCatalog {
    fn default() -> Self {
        Self {
            covid_csv_base: COVID_CSV_BASE_URL.to_string(),
            lookup_url: COUNTRY_LUT_URL.to_string(),
            time_series_base: TIME_SERIES_BASE_URL.to_string(),
            country_json_base: COUNTRY_JSON_BASE_URL.to_string(),
        }
    }
}

impl FeedCatalog {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build the catalog from a variable lookup, falling back to the defaults
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            covid_csv_base: var("COVID_CSV_BASE_URL").unwrap_or(defaults.covid_csv_base),
            lookup_url: var("COUNTRY_LUT_URL").unwrap_or(defaults.lookup_url),
            time_series_base: var("TIME_SERIES_BASE_URL").unwrap_or(defaults.time_series_base),
            country_json_base: var("COUNTRY_JSON_BASE_URL")
                .unwrap_or(defaults.country_json_base),
        }
    }

    pub fn lookup_table(&self) -> Feed {
        let file_name = self
            .lookup_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("lookup_table.csv");
        Feed {
            name: "lookup_table".to_string(),
            file_name: file_name.to_string(),
            url: self.lookup_url.clone(),
            format: FeedFormat::Csv,
        }
    }

    pub fn cases_time(&self) -> Feed {
        Feed::under(&self.covid_csv_base, "cases_time", "cases_time.csv", FeedFormat::Csv)
    }

    pub fn cases_country(&self) -> Feed {
        Feed::under(
            &self.covid_csv_base,
            "cases_country",
            "cases_country.csv",
            FeedFormat::Csv,
        )
    }

    pub fn recovered_series(&self) -> Feed {
        Feed::under(
            &self.time_series_base,
            "recovered_series",
            "time_series_covid19_recovered_global.csv",
            FeedFormat::Csv,
        )
    }

    pub fn country_document(&self, document: CountryDocument) -> Feed {
        let file_name = document.file_name();
        let name = file_name.trim_end_matches(".json");
        Feed::under(&self.country_json_base, name, file_name, FeedFormat::Json)
    }

    /// All feeds in pipeline order
    pub fn all(&self) -> Vec<Feed> {
        let mut feeds = vec![
            self.lookup_table(),
            self.cases_time(),
            self.cases_country(),
            self.recovered_series(),
        ];
        feeds.extend(
            CountryDocument::ALL
                .iter()
                .map(|document| self.country_document(*document)),
        );
        feeds
    }

    pub fn by_name(&self, name: &str) -> Option<Feed> {
        self.all().into_iter().find(|feed| feed.name == name)
    }
}

fn join_url(base: &str, file_name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, file_name)
    } else {
        format!("{}/{}", base, file_name)
    }
}
