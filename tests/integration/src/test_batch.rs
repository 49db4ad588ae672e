//! Batch writes and loads with chunking and retries.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dynamap_core::batch::{
        DefaultBatchWriteRetryStrategy, NoBatchLoadRetryStrategy, NoBatchWriteRetryStrategy,
    };
    use dynamap_core::{Attribute, FieldSpec, MapperConfig, MapperError, Record, Value, field};

    use crate::{Harness, MemoryClient};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Reading {
        sensor: String,
        at: i64,
        celsius: f64,
    }

    impl Record for Reading {
        fn table_name() -> Option<&'static str> {
            Some("readings")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Reading, sensor).hash_key(),
                field!(Reading, at).range_key(),
                field!(Reading, celsius),
            ]
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sensor {
        id: Option<String>,
        name: String,
    }

    impl Record for Sensor {
        fn table_name() -> Option<&'static str> {
            Some("sensors")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![field!(Sensor, id).hash_key().auto_generated_key(), field!(Sensor, name)]
        }
    }

    fn readings(n: i64) -> Vec<Reading> {
        (0..n)
            .map(|at| Reading {
                sensor: "s-1".to_owned(),
                at,
                celsius: 20.5,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_should_chunk_57_writes_into_25_25_7() {
        let h = Harness::with_defaults("batch-chunks");
        let table = h.create_table::<Reading>();
        let mut items = readings(57);
        let failed = h.mapper.batch_save(&mut items).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(*h.client.batch_write_sizes.lock(), vec![25, 25, 7]);
        assert_eq!(h.client.item_count(&table), 57);
    }

    #[tokio::test]
    async fn test_should_resend_unprocessed_items_until_done() {
        let config = MapperConfig::default().with_batch_write_retry_strategy(Arc::new(NoDelay));
        let h = Harness::new("batch-retry", MemoryClient::new().with_write_capacity(10), config);
        let table = h.create_table::<Reading>();
        let mut items = readings(25);
        let failed = h.mapper.batch_save(&mut items).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(*h.client.batch_write_sizes.lock(), vec![25, 15, 5]);
        assert_eq!(h.client.item_count(&table), 25);
    }

    #[tokio::test]
    async fn test_should_stop_retrying_and_report_failed_batches() {
        let config = MapperConfig::default()
            .with_batch_write_retry_strategy(Arc::new(NoBatchWriteRetryStrategy));
        let h = Harness::new("batch-give-up", MemoryClient::new().with_write_capacity(10), config);
        let table = h.create_table::<Sensor>();
        let mut sensors: Vec<Sensor> = (0..12)
            .map(|i| Sensor {
                name: format!("sensor-{i}"),
                ..Sensor::default()
            })
            .collect();
        let failed = h.mapper.batch_save(&mut sensors).await.unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].item_count(), 2);
        assert!(failed[0].exception.is_none());
        assert_eq!(*h.client.batch_write_sizes.lock(), vec![12]);
        assert_eq!(h.client.item_count(&table), 10);
        assert_eq!(sensors.iter().filter(|s| s.id.is_some()).count(), 10);
        assert!(sensors[10..].iter().all(|s| s.id.is_none()));
    }

    #[tokio::test]
    async fn test_should_bound_retries_with_max_retries() {
        let strategy = DefaultBatchWriteRetryStrategy::with_max_retries(0);
        let config = MapperConfig::default().with_batch_write_retry_strategy(Arc::new(strategy));
        let h = Harness::new("batch-max", MemoryClient::new().with_write_capacity(3), config);
        h.create_table::<Reading>();
        let mut items = readings(5);
        let failed = h.mapper.batch_save(&mut items).await.unwrap();
        assert_eq!(failed.iter().map(|f| f.item_count()).sum::<usize>(), 2);
        assert_eq!(h.client.batch_write_sizes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_should_mix_types_in_one_write_batch() {
        let h = Harness::with_defaults("batch-mixed");
        let readings_table = h.create_table::<Reading>();
        let sensors_table = h.create_table::<Sensor>();
        let mut existing = readings(3);
        h.mapper.batch_save(&mut existing).await.unwrap();

        let mut sensor = Sensor {
            name: "porch".to_owned(),
            ..Sensor::default()
        };
        let mut fresh = readings(5);
        let failed = h
            .mapper
            .write_batch()
            .save(&mut sensor)
            .unwrap()
            .save_all(fresh[3..].iter_mut())
            .unwrap()
            .delete(&existing[0])
            .unwrap()
            .execute()
            .await
            .unwrap();

        assert!(failed.is_empty());
        assert!(sensor.id.is_some());
        assert_eq!(h.client.item_count(&sensors_table), 1);
        assert_eq!(h.client.item_count(&readings_table), 4);
    }

    #[tokio::test]
    async fn test_should_batch_load_across_types() {
        let h = Harness::with_defaults("batch-load");
        h.create_table::<Reading>();
        h.create_table::<Sensor>();
        let mut items = readings(150);
        h.mapper.batch_save(&mut items).await.unwrap();
        let mut sensor = Sensor {
            name: "attic".to_owned(),
            ..Sensor::default()
        };
        h.mapper.save(&mut sensor).await.unwrap();

        let loaded = h
            .mapper
            .batch_load_keys()
            .add(&sensor)
            .unwrap()
            .add_key::<Reading>(Value::String("s-1".to_owned()), Some(7_i64.to_value()))
            .unwrap()
            .load()
            .await
            .unwrap();
        assert_eq!(loaded.records::<Sensor>().unwrap(), vec![sensor]);
        assert_eq!(loaded.records::<Reading>().unwrap(), vec![items[7].clone()]);

        let mut all = h.mapper.batch_load(&items).await.unwrap();
        all.sort_by_key(|r| r.at);
        assert_eq!(all, items);
        assert_eq!(*h.client.batch_get_sizes.lock(), vec![2, 100, 50]);
    }

    #[tokio::test]
    async fn test_should_fail_batch_load_with_partial_results() {
        let config = MapperConfig::default()
            .with_batch_load_retry_strategy(Arc::new(NoBatchLoadRetryStrategy));
        let h = Harness::new("batch-load-fail", MemoryClient::new().with_read_capacity(4), config);
        h.create_table::<Reading>();
        let mut items = readings(6);
        h.mapper.batch_save(&mut items).await.unwrap();

        let err = h.mapper.batch_load(&items).await.unwrap_err();
        let MapperError::BatchGet(err) = err else {
            panic!("unexpected error");
        };
        assert_eq!(err.unprocessed_count(), 2);
        assert_eq!(err.responses.values().map(Vec::len).sum::<usize>(), 4);
    }

    #[tokio::test]
    async fn test_should_retry_partial_batch_loads() {
        let h = Harness::new(
            "batch-load-retry",
            MemoryClient::new().with_read_capacity(4),
            MapperConfig::default(),
        );
        h.create_table::<Reading>();
        let mut items = readings(10);
        h.mapper.batch_save(&mut items).await.unwrap();

        let loaded = h.mapper.batch_load(&items).await.unwrap();
        assert_eq!(loaded.len(), 10);
        assert_eq!(*h.client.batch_get_sizes.lock(), vec![10, 6, 2]);
    }

    #[derive(Debug)]
    struct NoDelay;

    impl dynamap_core::batch::BatchWriteRetryStrategy for NoDelay {
        fn max_retries(&self, _batch: &dynamap_core::batch::WriteRequests) -> Option<u32> {
            None
        }

        fn delay_before_retry(
            &self,
            _unprocessed: &dynamap_core::batch::WriteRequests,
            _retries: u32,
        ) -> std::time::Duration {
            std::time::Duration::ZERO
        }
    }
}
