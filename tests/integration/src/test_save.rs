//! Save, load and delete through the mapper.

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use dynamap_core::{
        FieldSpec, GenerateStrategy, MapperError, Record, SaveBehavior, SaveExpression, Value,
        field,
    };
    use dynamap_model::types::ExpectedAttributeValue;
    use dynamap_model::{AttributeValue, Item};

    use crate::Harness;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        id: Option<String>,
        title: Option<String>,
        labels: BTreeSet<String>,
        created: Option<chrono::DateTime<chrono::Utc>>,
        version: Option<i64>,
    }

    impl Record for Note {
        fn table_name() -> Option<&'static str> {
            Some("notes")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Note, id).hash_key().auto_generated_key(),
                field!(Note, title),
                field!(Note, labels),
                field!(Note, created).auto_timestamp(GenerateStrategy::OnInsertOnly),
                field!(Note, version).version(),
            ]
        }
    }

    fn labels(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    async fn saved_note(h: &Harness) -> Note {
        let mut note = Note {
            title: Some("draft".to_owned()),
            labels: labels(&["a"]),
            ..Note::default()
        };
        h.mapper.save(&mut note).await.unwrap();
        note
    }

    #[tokio::test]
    async fn test_should_generate_key_timestamp_and_version_on_first_save() {
        let h = Harness::with_defaults("save-new");
        h.create_table::<Note>();
        let note = saved_note(&h).await;

        assert!(note.id.is_some());
        assert!(note.created.is_some());
        assert_eq!(note.version, Some(1));
        let loaded: Note = h.mapper.load(&note).await.unwrap().unwrap();
        assert_eq!(loaded, note);
    }

    #[tokio::test]
    async fn test_should_increment_versions_and_reject_stale_copies() {
        let h = Harness::with_defaults("save-version");
        h.create_table::<Note>();
        let mut note = saved_note(&h).await;
        let mut stale = note.clone();

        note.title = Some("final".to_owned());
        h.mapper.save(&mut note).await.unwrap();
        assert_eq!(note.version, Some(2));

        stale.title = Some("lost update".to_owned());
        let err = h.mapper.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, MapperError::ConditionalCheckFailed(_)), "{err}");
        assert_eq!(stale.version, Some(1));

        let err = h.mapper.delete(&stale).await.unwrap_err();
        assert!(matches!(err, MapperError::ConditionalCheckFailed(_)), "{err}");
        h.mapper.delete(&note).await.unwrap();
        assert_eq!(h.mapper.load(&note).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_should_clobber_stale_copies() {
        let h = Harness::with_defaults("save-clobber");
        h.create_table::<Note>();
        let mut note = saved_note(&h).await;
        h.mapper.save(&mut note).await.unwrap();

        let clobber = h
            .mapper
            .with_overrides(h.mapper.config().clone().with_save_behavior(SaveBehavior::Clobber));
        let mut stale = Note {
            id: note.id.clone(),
            version: Some(1),
            ..Note::default()
        };
        clobber.save(&mut stale).await.unwrap();
        let loaded: Note = h.mapper.load(&note).await.unwrap().unwrap();
        assert_eq!(loaded.title, None);
        assert_eq!(loaded.version, Some(2));
    }

    #[tokio::test]
    async fn test_should_honor_null_handling_per_save_behavior() {
        let h = Harness::with_defaults("save-nulls");
        h.create_table::<Note>();
        let note = saved_note(&h).await;

        let skip_nulls = h.mapper.with_overrides(
            h.mapper
                .config()
                .clone()
                .with_save_behavior(SaveBehavior::UpdateSkipNullAttributes),
        );
        let mut partial = Note {
            title: None,
            labels: labels(&["b"]),
            ..note.clone()
        };
        skip_nulls.save(&mut partial).await.unwrap();
        let loaded: Note = h.mapper.load(&note).await.unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("draft"));
        assert_eq!(loaded.labels, labels(&["b"]));

        let append = h
            .mapper
            .with_overrides(h.mapper.config().clone().with_save_behavior(SaveBehavior::AppendSet));
        let mut more = Note {
            labels: labels(&["c"]),
            ..loaded.clone()
        };
        append.save(&mut more).await.unwrap();
        let loaded: Note = h.mapper.load(&note).await.unwrap().unwrap();
        assert_eq!(loaded.labels, labels(&["b", "c"]));

        let mut cleared = Note {
            title: None,
            ..loaded
        };
        h.mapper.save(&mut cleared).await.unwrap();
        let loaded: Note = h.mapper.load(&note).await.unwrap().unwrap();
        assert_eq!(loaded.title, None);
        assert_eq!(loaded.version, Some(4));
    }

    #[tokio::test]
    async fn test_should_merge_user_conditions() {
        let h = Harness::with_defaults("save-conditions");
        let table = h.create_table::<Note>();
        let mut note = saved_note(&h).await;

        let wrong_title = SaveExpression::builder()
            .expected(HashMap::from([(
                "title".to_owned(),
                ExpectedAttributeValue::equals(AttributeValue::S("other".to_owned())),
            )]))
            .build();
        let err = h.mapper.save_with(&mut note, &wrong_title).await.unwrap_err();
        assert!(matches!(err, MapperError::ConditionalCheckFailed(_)), "{err}");

        let right_title = SaveExpression::builder()
            .expected(HashMap::from([(
                "title".to_owned(),
                ExpectedAttributeValue::equals(AttributeValue::S("draft".to_owned())),
            )]))
            .build();
        h.mapper.save_with(&mut note, &right_title).await.unwrap();
        let key = Item::from([(
            "id".to_owned(),
            AttributeValue::S(note.id.clone().unwrap_or_default()),
        )]);
        let stored = h.client.raw_item(&table, &key).unwrap();
        assert_eq!(stored["version"], AttributeValue::N("2".to_owned()));
    }

    #[tokio::test]
    async fn test_should_load_by_key_values() {
        let h = Harness::with_defaults("save-load");
        h.create_table::<Note>();
        let note = saved_note(&h).await;
        let id = Value::String(note.id.clone().unwrap_or_default());
        let loaded: Option<Note> = h.mapper.load_by_key(id, None).await.unwrap();
        assert_eq!(loaded, Some(note));
        let missing: Option<Note> = h
            .mapper
            .load_by_key(Value::String("nope".to_owned()), None)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }
}
