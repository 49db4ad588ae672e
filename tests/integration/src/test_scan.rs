//! Sequential and segment-parallel scans.

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::Ordering;

    use dynamap_core::{
        FieldSpec, MapperConfig, MapperError, Record, ScanExpression, SegmentScanState, field,
    };

    use crate::{Harness, MemoryClient};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Event {
        stream: String,
        seq: i64,
        kind: String,
    }

    impl Record for Event {
        fn table_name() -> Option<&'static str> {
            Some("events")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Event, stream).hash_key(),
                field!(Event, seq).range_key(),
                field!(Event, kind),
            ]
        }
    }

    async fn seeded(page_size: usize) -> Harness {
        let h = Harness::new(
            "scan",
            MemoryClient::new().with_page_size(page_size),
            MapperConfig::default(),
        );
        h.create_table::<Event>();
        let mut events: Vec<Event> = ["a", "b"]
            .iter()
            .flat_map(|stream| {
                (0..20).map(move |seq| Event {
                    stream: (*stream).to_owned(),
                    seq,
                    kind: if seq % 4 == 0 { "click" } else { "view" }.to_owned(),
                })
            })
            .collect();
        let failed = h.mapper.batch_save(&mut events).await.unwrap();
        assert!(failed.is_empty());
        h
    }

    fn keys(events: &[Event]) -> BTreeSet<(String, i64)> {
        events.iter().map(|e| (e.stream.clone(), e.seq)).collect()
    }

    #[tokio::test]
    async fn test_should_scan_every_page() {
        let h = seeded(7).await;
        let all: Vec<Event> = h.mapper.scan(&ScanExpression::default()).await.unwrap();
        assert_eq!(keys(&all).len(), 40);
        assert_eq!(h.client.scan_calls.load(Ordering::SeqCst), 6);
        assert_eq!(h.mapper.count_scan::<Event>(&ScanExpression::default()).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_should_filter_and_page_scans() {
        let h = seeded(0).await;
        let model = h.mapper.table_model::<Event>().unwrap();
        let clicks = model.field("kind").unwrap().eq(&"click".to_owned()).unwrap();
        let expr = ScanExpression::builder()
            .scan_filter(HashMap::from([("kind".to_owned(), clicks)]))
            .build();
        let found: Vec<Event> = h.mapper.scan(&expr).await.unwrap();
        assert_eq!(found.len(), 10);
        assert!(found.iter().all(|e| e.kind == "click"));
        assert_eq!(h.mapper.count_scan::<Event>(&expr).await.unwrap(), 10);

        let page = h
            .mapper
            .scan_page::<Event>(&ScanExpression::builder().limit(5).build())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(page.has_more());
    }

    #[tokio::test]
    async fn test_should_collect_every_segment_of_a_parallel_scan() {
        let h = seeded(3).await;
        let all: Vec<Event> = h
            .mapper
            .parallel_scan(&ScanExpression::default(), 4)
            .await
            .unwrap();
        assert_eq!(all.len(), 40);
        assert_eq!(keys(&all).len(), 40);
    }

    #[tokio::test]
    async fn test_should_report_segment_states_round_by_round() {
        let h = seeded(0).await;
        let mut task = h
            .mapper
            .parallel_scan_task::<Event>(&ScanExpression::default(), 3)
            .unwrap();
        assert_eq!(task.states(), &[SegmentScanState::Waiting; 3]);
        let pages = task.next_batch().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|p| p.items.len()).sum::<usize>(), 40);
        assert!(task.is_finished());
        assert_eq!(task.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_should_fail_the_whole_scan_when_a_segment_fails() {
        let h = seeded(0).await;
        h.client.fail_segment(1);
        let mut task = h
            .mapper
            .parallel_scan_task::<Event>(&ScanExpression::default(), 4)
            .unwrap();
        let err = task.next_batch().await.unwrap_err();
        assert!(
            err.as_dynamodb_error().is_some_and(|e| e.is_throttling()),
            "{err}"
        );
        let again = task.next_batch().await.unwrap_err();
        assert!(matches!(again, MapperError::Transport(_)), "{again}");
        assert_eq!(again.as_dynamodb_error(), err.as_dynamodb_error());

        let err = h
            .mapper
            .parallel_scan::<Event>(&ScanExpression::default(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn test_should_reject_zero_segments() {
        let h = seeded(0).await;
        let err = h
            .mapper
            .parallel_scan::<Event>(&ScanExpression::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidRequest(_)), "{err}");
    }
}
