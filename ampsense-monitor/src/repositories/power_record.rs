use std::sync::Arc;

use sqlx::Error;
use time::OffsetDateTime;

use crate::configs::Storage;
use crate::models::PowerRecord;

pub struct PowerRecordRepository {
    storage: Arc<Storage>,
}

impl PowerRecordRepository {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    // Persist one aggregation window
    pub async fn create(&self, item: &PowerRecord) -> Result<PowerRecord, Error> {
        let record: PowerRecord = sqlx::query_as(
            r#"
            INSERT INTO power_records (consumption, time)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(item.consumption)
        .bind(item.time)
        .fetch_one(self.storage.get_pool())
        .await?;

        Ok(record)
    }

    // Get records within a given time range
    pub async fn find_by_time_range(
        &self,
        start_time: OffsetDateTime,
        end_time: OffsetDateTime,
    ) -> Result<Vec<PowerRecord>, Error> {
        let records: Vec<PowerRecord> = sqlx::query_as(
            r#"
            SELECT * FROM power_records
            WHERE time >= $1 AND time <= $2
            ORDER BY time ASC
            "#,
        )
        .bind(start_time)
        .bind(end_time)
        .fetch_all(self.storage.get_pool())
        .await?;

        Ok(records)
    }

    // Get latest N records
    pub async fn find_latest(&self, limit: i64) -> Result<Vec<PowerRecord>, Error> {
        let records: Vec<PowerRecord> = sqlx::query_as(
            r#"
            SELECT * FROM power_records
            ORDER BY time DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.storage.get_pool())
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use crate::configs::{Database, SchemaManager};

    use super::*;

    async fn setup_test_db() -> Arc<Storage> {
        Arc::new(
            Storage::new(
                Database {
                    clean_start: true,
                    url: String::from("sqlite::memory:"),
                },
                SchemaManager::default(),
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_assigns_id() {
        let storage = setup_test_db().await;
        let repo = PowerRecordRepository::new(storage);

        let record = PowerRecord {
            id: 0,
            consumption: 12.5,
            time: OffsetDateTime::now_utc(),
        };

        let created = repo.create(&record).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.consumption, 12.5);
    }

    #[tokio::test]
    async fn test_find_by_time_range_orders_ascending() {
        let storage = setup_test_db().await;
        let repo = PowerRecordRepository::new(storage);

        let base = OffsetDateTime::now_utc();
        for (offset, consumption) in [(2, 3.0f32), (0, 1.0), (1, 2.0)] {
            repo.create(&PowerRecord {
                id: 0,
                consumption,
                time: base + Duration::seconds(offset),
            })
            .await
            .unwrap();
        }

        let records = repo
            .find_by_time_range(base, base + Duration::seconds(2))
            .await
            .unwrap();

        let consumptions: Vec<f32> = records.iter().map(|r| r.consumption).collect();
        assert_eq!(consumptions, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_find_latest_limits_and_orders_descending() {
        let storage = setup_test_db().await;
        let repo = PowerRecordRepository::new(storage);

        let base = OffsetDateTime::now_utc();
        for offset in 0..5 {
            repo.create(&PowerRecord {
                id: 0,
                consumption: offset as f32,
                time: base + Duration::seconds(offset),
            })
            .await
            .unwrap();
        }

        let records = repo.find_latest(2).await.unwrap();
        let consumptions: Vec<f32> = records.iter().map(|r| r.consumption).collect();
        assert_eq!(consumptions, vec![4.0, 3.0]);
    }
}
