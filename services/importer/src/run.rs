//! Import orchestration
//!
//! A run walks the stages in a fixed order. Each stage ends `Done` with its
//! feed counters or `Failed` with the error message; once a stage fails the
//! remaining ones are `Skipped`. Tables replaced by earlier stages stay
//! replaced.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use collector::{CountryDocument, Feed, FeedCatalog, FeedSource};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::countries::import_countries;
use crate::delta::import_totals;
use crate::error::{ImportError, Result};
use crate::lookup::CountryLookup;
use crate::normalize::{import_narrow, FeedReport, NarrowOptions};
use crate::schema::{CASES_COUNTRY, CASES_TIME};
use crate::store::{TableStore, RECOVERED};
use crate::wide::apply_wide;

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[value(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CasesTime,
    CasesTotal,
    CasesCountry,
    Recovered,
    Countries,
}

impl Stage {
    /// Run order
    pub const ALL: [Stage; 5] = [
        Stage::CasesTime,
        Stage::CasesTotal,
        Stage::CasesCountry,
        Stage::Recovered,
        Stage::Countries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CasesTime => "cases_time",
            Stage::CasesTotal => "cases_total",
            Stage::CasesCountry => "cases_country",
            Stage::Recovered => "recovered",
            Stage::Countries => "countries",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Done(FeedReport),
    Failed(String),
    Skipped,
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Outcome per selected stage, in run order
    pub stages: Vec<(Stage, StageOutcome)>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failed_stage().is_none()
    }

    pub fn failed_stage(&self) -> Option<(Stage, &str)> {
        self.stages.iter().find_map(|(stage, outcome)| match outcome {
            StageOutcome::Failed(message) => Some((*stage, message.as_str())),
            _ => None,
        })
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }

    /// Counters of the stages that completed
    pub fn feed_reports(&self) -> impl Iterator<Item = &FeedReport> {
        self.stages.iter().filter_map(|(_, outcome)| match outcome {
            StageOutcome::Done(report) => Some(report),
            _ => None,
        })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Payloads shared between the stages of one run
#[derive(Default)]
struct RunCache {
    schema_ready: bool,
    lookup: Option<CountryLookup>,
    cases_time: Option<String>,
}

pub struct Importer<F, S> {
    source: F,
    store: S,
    catalog: FeedCatalog,
}

impl<F: FeedSource, S: TableStore> Importer<F, S> {
    pub fn new(source: F, store: S, catalog: FeedCatalog) -> Self {
        Self {
            source,
            store,
            catalog,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every stage. Fails with the first stage that failed.
    pub async fn run_import(&self) -> Result<RunReport> {
        let report = self.run_stages(&Stage::ALL).await;
        match report.failed_stage() {
            Some((stage, message)) => Err(ImportError::Stage {
                stage,
                message: message.to_string(),
            }),
            None => Ok(report),
        }
    }

    /// Run the selected stages in run order.
    pub async fn run_stages(&self, stages: &[Stage]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let selected: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|stage| stages.contains(stage))
            .collect();
        info!(%run_id, stages = ?selected, "import run started");

        let mut cache = RunCache::default();
        let mut outcomes = Vec::with_capacity(selected.len());
        let mut failed = false;

        for stage in selected {
            if failed {
                outcomes.push((stage, StageOutcome::Skipped));
                continue;
            }

            let stage_start = Instant::now();
            match self.run_stage(stage, &mut cache).await {
                Ok(report) => {
                    info!(
                        %run_id,
                        %stage,
                        elapsed_ms = stage_start.elapsed().as_millis() as u64,
                        "stage finished"
                    );
                    outcomes.push((stage, StageOutcome::Done(report)));
                }
                Err(e) => {
                    error!(%run_id, %stage, error = %e, "stage failed, skipping the rest of the run");
                    failed = true;
                    outcomes.push((stage, StageOutcome::Failed(e.to_string())));
                }
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            elapsed: start.elapsed(),
            stages: outcomes,
        };
        info!(
            %run_id,
            elapsed_ms = report.elapsed.as_millis() as u64,
            succeeded = report.succeeded(),
            "import run finished"
        );
        report
    }

    async fn run_stage(&self, stage: Stage, cache: &mut RunCache) -> Result<FeedReport> {
        if !cache.schema_ready {
            self.store.ensure_schema().await?;
            cache.schema_ready = true;
        }

        match stage {
            Stage::CasesTime => {
                let feed = self.catalog.cases_time();
                let lookup = self.lookup(&mut cache.lookup).await?;
                let content = self.cached_text(&feed, &mut cache.cases_time).await?;
                import_narrow(
                    &self.store,
                    &feed.name,
                    &CASES_TIME,
                    content,
                    lookup,
                    NarrowOptions::TIME_SERIES,
                )
                .await
            }
            Stage::CasesTotal => {
                let feed = self.catalog.cases_time();
                let lookup = self.lookup(&mut cache.lookup).await?;
                let content = self.cached_text(&feed, &mut cache.cases_time).await?;
                import_totals(&self.store, &feed.name, content, lookup).await
            }
            Stage::CasesCountry => {
                let feed = self.catalog.cases_country();
                let lookup = self.lookup(&mut cache.lookup).await?;
                let content = self.source.fetch_text(&feed).await?;
                import_narrow(
                    &self.store,
                    &feed.name,
                    &CASES_COUNTRY,
                    &content,
                    lookup,
                    NarrowOptions::SNAPSHOT,
                )
                .await
            }
            Stage::Recovered => {
                let feed = self.catalog.recovered_series();
                let content = self.source.fetch_text(&feed).await?;
                apply_wide(&self.store, &feed.name, &content, RECOVERED).await
            }
            Stage::Countries => {
                let mut documents = Vec::with_capacity(CountryDocument::ALL.len());
                for document in CountryDocument::ALL {
                    let feed = self.catalog.country_document(document);
                    documents.push((document, self.source.fetch_text(&feed).await?));
                }
                import_countries(&self.store, &documents).await
            }
        }
    }

    async fn lookup<'c>(&self, cache: &'c mut Option<CountryLookup>) -> Result<&'c CountryLookup> {
        let lookup = match cache.take() {
            Some(lookup) => lookup,
            None => {
                let feed = self.catalog.lookup_table();
                let content = self.source.fetch_text(&feed).await?;
                CountryLookup::from_csv(&feed.name, &content)?
            }
        };
        let lookup: &CountryLookup = cache.insert(lookup);
        Ok(lookup)
    }

    async fn cached_text<'c>(&self, feed: &Feed, cache: &'c mut Option<String>) -> Result<&'c str> {
        let content = match cache.take() {
            Some(content) => content,
            None => self.source.fetch_text(feed).await?,
        };
        let content: &str = cache.insert(content);
        Ok(content)
    }
}
