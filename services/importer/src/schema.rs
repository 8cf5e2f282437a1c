//! Destination tables and typed cell values
//!
//! Feed headers are matched against these column sets case-insensitively.
//! Header columns a table does not know are ignored; table columns missing
//! from a header are stored as NULL.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    BigInt,
    Double,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        sql_type: SqlType::Text,
    }
}

const fn bigint(name: &'static str) -> Column {
    Column {
        name,
        sql_type: SqlType::BigInt,
    }
}

const fn double(name: &'static str) -> Column {
    Column {
        name,
        sql_type: SqlType::Double,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl TableSchema {
    /// Staging table populated before the swap
    pub fn shadow_name(&self) -> String {
        format!("{}_new", self.name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `CREATE TABLE` statement for this column set under `table_name`
    pub fn create_sql(&self, table_name: &str, if_not_exists: bool) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
        format!("CREATE TABLE {}{} ({})", guard, table_name, columns)
    }
}

pub static CASES_TIME: TableSchema = TableSchema {
    name: "cases_time",
    columns: &[
        text("country_region"),
        text("province_state"),
        text("last_update"),
        bigint("confirmed"),
        bigint("deaths"),
        bigint("recovered"),
        bigint("active"),
        bigint("delta_confirmed"),
        bigint("delta_recovered"),
        double("incident_rate"),
        double("people_tested"),
        double("people_hospitalized"),
        text("fips"),
        text("uid"),
        text("iso3"),
        text("report_date_string"),
        text("country_code"),
    ],
};

pub static CASES_TOTAL: TableSchema = TableSchema {
    name: "cases_total",
    columns: &[
        text("country_region"),
        text("province_state"),
        text("last_update"),
        bigint("confirmed"),
        bigint("deaths"),
        bigint("recovered"),
        bigint("active"),
        bigint("delta_confirmed"),
        bigint("delta_recovered"),
        double("incident_rate"),
        double("people_tested"),
        double("people_hospitalized"),
        text("fips"),
        text("uid"),
        text("iso3"),
        text("report_date_string"),
        bigint("delta_deaths"),
        text("country_code"),
    ],
};

pub static CASES_COUNTRY: TableSchema = TableSchema {
    name: "cases_country",
    columns: &[
        text("country_region"),
        text("last_update"),
        double("lat"),
        double("long_"),
        bigint("confirmed"),
        bigint("deaths"),
        bigint("recovered"),
        bigint("active"),
        double("incident_rate"),
        double("people_tested"),
        double("people_hospitalized"),
        double("mortality_rate"),
        text("uid"),
        text("iso3"),
        text("country_code"),
    ],
};

pub static COUNTRIES: TableSchema = TableSchema {
    name: "countries",
    columns: &[
        text("code"),
        text("name"),
        bigint("population"),
        double("life_expectancy"),
        text("continent"),
        text("capital"),
        double("population_density"),
        double("avg_temperature"),
    ],
};

pub static ALL_TABLES: [&TableSchema; 4] = [&CASES_TIME, &CASES_TOTAL, &CASES_COUNTRY, &COUNTRIES];

/// One typed cell of a normalized record
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Value {
    /// Parse a raw feed field for a column of type `sql_type`.
    ///
    /// Empty fields are NULL. Integer columns accept float text (rounded).
    /// Numbers that do not parse become NULL.
    pub fn parse(raw: &str, sql_type: SqlType) -> Value {
        if raw.trim().is_empty() {
            return Value::Null;
        }
        match sql_type {
            SqlType::Text => Value::Text(raw.to_string()),
            SqlType::BigInt => parse_int(raw).map(Value::Int).unwrap_or(Value::Null),
            SqlType::Double => parse_float(raw).map(Value::Float).unwrap_or(Value::Null),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Null => None,
            Value::Text(s) => parse_int(s),
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(f.round() as i64),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Text(s) => parse_float(s),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
        }
    }
}

impl From<Option<&str>> for Value {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Value::Null, |s| Value::Text(s.to_string()))
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| parse_float(raw).map(|f| f.round() as i64))
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}
