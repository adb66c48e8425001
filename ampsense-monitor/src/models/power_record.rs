use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Table;

/// One persisted aggregation window.
///
/// `consumption` is the mean total current over the window, in amps.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PowerRecord {
    pub id: i32,
    pub consumption: f32,
    pub time: OffsetDateTime,
}

pub struct PowerRecordTable;

impl Table for PowerRecordTable {
    fn name(&self) -> &'static str {
        "power_records"
    }

    fn create(&self) -> String {
        String::from(
            r#"
            CREATE TABLE IF NOT EXISTS power_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                consumption REAL NOT NULL,
                time TIMESTAMP NOT NULL
            );
            "#,
        )
    }

    fn dispose(&self) -> String {
        String::from("DROP TABLE IF EXISTS power_records;")
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }
}
