//! Queries against tables and their indexes.

#[cfg(test)]
mod tests {
    use dynamap_core::{FieldSpec, MapperConfig, MapperError, QueryExpression, Record, field};

    use crate::{Harness, MemoryClient};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Message {
        thread: Option<String>,
        posted: i64,
        likes: i64,
        author: Option<String>,
        body: String,
    }

    impl Record for Message {
        fn table_name() -> Option<&'static str> {
            Some("messages")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Message, thread).hash_key(),
                field!(Message, posted).range_key(),
                field!(Message, likes).local_index_range("by-likes"),
                field!(Message, author).global_index_hash("by-author"),
                field!(Message, body),
            ]
        }
    }

    fn thread(name: &str) -> Message {
        Message {
            thread: Some(name.to_owned()),
            ..Message::default()
        }
    }

    async fn seeded(page_size: usize) -> Harness {
        let h = Harness::new(
            "query",
            MemoryClient::new().with_page_size(page_size),
            MapperConfig::default(),
        );
        h.create_table::<Message>();
        let mut messages: Vec<Message> = (1..=10)
            .map(|n| Message {
                thread: Some("t-1".to_owned()),
                posted: n,
                likes: (n * 7) % 11,
                author: (n % 2 == 0).then(|| "ann".to_owned()),
                body: format!("message {n}"),
            })
            .chain((1..=3).map(|n| Message {
                thread: Some("t-2".to_owned()),
                posted: n,
                likes: 1,
                author: Some("bob".to_owned()),
                body: format!("reply {n}"),
            }))
            .collect();
        let failed = h.mapper.batch_save(&mut messages).await.unwrap();
        assert!(failed.is_empty());
        h
    }

    #[tokio::test]
    async fn test_should_follow_continuation_keys_across_pages() {
        let h = seeded(3).await;
        let expr = QueryExpression::builder().hash_key_values(thread("t-1")).build();
        let found: Vec<Message> = h.mapper.query(&expr).await.unwrap();
        let posted: Vec<i64> = found.iter().map(|m| m.posted).collect();
        assert_eq!(posted, (1..=10).collect::<Vec<_>>());
        assert_eq!(h.mapper.count_query(&expr).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_should_resume_a_page_from_its_last_key() {
        let h = seeded(0).await;
        let first = QueryExpression::builder()
            .hash_key_values(thread("t-1"))
            .limit(4)
            .scan_index_forward(false)
            .build();
        let page = h.mapper.query_page(&first).await.unwrap();
        assert!(page.has_more());
        assert_eq!(page.items.iter().map(|m| m.posted).collect::<Vec<_>>(), vec![10, 9, 8, 7]);

        let next = QueryExpression {
            exclusive_start_key: page.last_evaluated_key.unwrap_or_default(),
            ..first
        };
        let page = h.mapper.query_page(&next).await.unwrap();
        assert_eq!(page.items.iter().map(|m| m.posted).collect::<Vec<_>>(), vec![6, 5, 4, 3]);
        assert_eq!(page.count, 4);
    }

    #[tokio::test]
    async fn test_should_apply_a_range_condition_on_the_table() {
        let h = seeded(0).await;
        let model = h.mapper.table_model::<Message>().unwrap();
        let posted = model.field("posted").unwrap();
        let expr = QueryExpression::builder()
            .hash_key_values(thread("t-1"))
            .range_key_conditions(vec![("posted".to_owned(), posted.between(&3_i64, &5_i64).unwrap())])
            .build();
        let found: Vec<Message> = h.mapper.query(&expr).await.unwrap();
        assert_eq!(found.iter().map(|m| m.posted).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_should_route_range_conditions_to_the_local_index() {
        let h = seeded(0).await;
        let model = h.mapper.table_model::<Message>().unwrap();
        let likes = model.field("likes").unwrap();
        let expr = QueryExpression::builder()
            .hash_key_values(thread("t-1"))
            .range_key_conditions(vec![("likes".to_owned(), likes.ge(&8_i64).unwrap())])
            .build();
        let found: Vec<Message> = h.mapper.query(&expr).await.unwrap();
        let likes: Vec<i64> = found.iter().map(|m| m.likes).collect();
        assert_eq!(likes, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_should_route_index_hash_keys_to_the_global_index() {
        let h = seeded(2).await;
        let expr = QueryExpression::builder()
            .hash_key_values(Message {
                author: Some("ann".to_owned()),
                ..Message::default()
            })
            .build();
        let found: Vec<Message> = h.mapper.query(&expr).await.unwrap();
        assert_eq!(found.len(), 5);
        assert!(found.iter().all(|m| m.thread.as_deref() == Some("t-1") && m.posted % 2 == 0));
        assert_eq!(h.mapper.count_query(&expr).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_should_reject_queries_without_a_hash_key() {
        let h = seeded(0).await;
        let expr = QueryExpression::builder().hash_key_values(Message::default()).build();
        let err = h.mapper.query(&expr).await.unwrap_err();
        let MapperError::Mapping(err) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(err.to_string().contains("No hash key condition"), "{err}");
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        shard: i64,
        seq: i64,
        owner: Option<String>,
    }

    impl Record for Counter {
        fn table_name() -> Option<&'static str> {
            Some("counters")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Counter, shard).hash_key(),
                field!(Counter, seq).range_key(),
                field!(Counter, owner).global_index_hash("by-owner"),
            ]
        }
    }

    async fn seeded_counters() -> Harness {
        let h = Harness::with_defaults("query-zero");
        h.create_table::<Counter>();
        let mut counters: Vec<Counter> = (0..2)
            .flat_map(|shard| {
                (0..3).map(move |seq| Counter {
                    shard,
                    seq,
                    owner: Some(if seq == 0 { "ann" } else { "bob" }.to_owned()),
                })
            })
            .collect();
        let failed = h.mapper.batch_save(&mut counters).await.unwrap();
        assert!(failed.is_empty());
        h
    }

    #[tokio::test]
    async fn test_should_query_a_zero_valued_hash_key() {
        let h = seeded_counters().await;
        let expr = QueryExpression::builder().hash_key_values(Counter::default()).build();
        let found: Vec<Counter> = h.mapper.query(&expr).await.unwrap();
        assert_eq!(found.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(found.iter().all(|c| c.shard == 0));
    }

    #[tokio::test]
    async fn test_should_prefer_a_zero_table_hash_key_over_an_index_hash_key() {
        let h = seeded_counters().await;
        let expr = QueryExpression::builder()
            .hash_key_values(Counter {
                owner: Some("ann".to_owned()),
                ..Counter::default()
            })
            .build();
        let found: Vec<Counter> = h.mapper.query(&expr).await.unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|c| c.shard == 0));
        assert_eq!(h.mapper.count_query(&expr).await.unwrap(), 3);
    }
}
