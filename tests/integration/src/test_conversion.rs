//! Round trips of rich records through the store.

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use dynamap_core::{ConversionSchema, FieldSpec, MapperConfig, Record, SchemaKind, field};
    use dynamap_model::AttributeValue;

    use crate::{Harness, MemoryClient};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Address {
        street: String,
        zip: Option<u32>,
    }

    impl Record for Address {
        fn fields() -> Vec<FieldSpec<Self>> {
            vec![field!(Address, street), field!(Address, zip).rename("postal_code")]
        }
    }

    dynamap_core::document_attribute!(Address);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Profile {
        handle: String,
        age: u16,
        score: f64,
        active: bool,
        nickname: Option<String>,
        tags: BTreeSet<String>,
        lucky: BTreeSet<i64>,
        history: Vec<String>,
        counters: HashMap<String, i64>,
        home: Option<Address>,
        joined: Option<chrono::DateTime<Utc>>,
        avatar: Option<Bytes>,
    }

    impl Record for Profile {
        fn table_name() -> Option<&'static str> {
            Some("profiles")
        }

        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                field!(Profile, handle).hash_key(),
                field!(Profile, age),
                field!(Profile, score),
                field!(Profile, active),
                field!(Profile, nickname),
                field!(Profile, tags),
                field!(Profile, lucky),
                field!(Profile, history),
                field!(Profile, counters),
                field!(Profile, home),
                field!(Profile, joined),
                field!(Profile, avatar),
            ]
        }
    }

    fn profile() -> Profile {
        Profile {
            handle: "ada".to_owned(),
            age: 36,
            score: 98.25,
            active: true,
            nickname: None,
            tags: ["math", "engines"].iter().map(|s| (*s).to_owned()).collect(),
            lucky: BTreeSet::from([3, 7]),
            history: vec!["joined".to_owned(), "posted".to_owned(), "joined".to_owned()],
            counters: HashMap::from([("posts".to_owned(), 12), ("likes".to_owned(), 40)]),
            home: Some(Address {
                street: "12 St James's Square".to_owned(),
                zip: Some(10_001),
            }),
            joined: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).single(),
            avatar: Some(Bytes::from_static(b"\x89PNG")),
        }
    }

    fn harness(kind: SchemaKind) -> Harness {
        let config = MapperConfig::default().with_conversion_schema(ConversionSchema::of(kind));
        Harness::new("conversion", MemoryClient::new(), config)
    }

    #[tokio::test]
    async fn test_should_round_trip_every_supported_shape() {
        let h = harness(SchemaKind::V2Compatible);
        h.create_table::<Profile>();
        let mut original = profile();
        h.mapper.save(&mut original).await.unwrap();

        let loaded: Profile = h.mapper.load(&original).await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_should_store_bools_per_schema() {
        let compatible = harness(SchemaKind::V2Compatible);
        let item = compatible.mapper.marshal_from_object(&profile()).unwrap();
        assert_eq!(item["active"], AttributeValue::N("1".to_owned()));

        let v2 = harness(SchemaKind::V2);
        let item = v2.mapper.marshal_from_object(&profile()).unwrap();
        assert_eq!(item["active"], AttributeValue::Bool(true));

        // Either representation reads back under both schemas.
        let back: Profile = compatible.mapper.marshal_into_object(&item).unwrap();
        assert!(back.active);
    }

    #[test]
    fn test_should_shape_nested_and_collection_attributes() {
        let h = harness(SchemaKind::V2Compatible);
        let item = h.mapper.marshal_from_object(&profile()).unwrap();

        assert!(!item.contains_key("nickname"));
        assert_eq!(
            item["tags"],
            AttributeValue::Ss(vec!["engines".to_owned(), "math".to_owned()])
        );
        assert!(matches!(&item["history"], AttributeValue::L(entries) if entries.len() == 3));
        let AttributeValue::M(home) = &item["home"] else {
            panic!("home should be a map");
        };
        assert_eq!(home["postal_code"], AttributeValue::N("10001".to_owned()));
        assert_eq!(
            item["joined"],
            AttributeValue::S("2024-05-01T09:30:00.000Z".to_owned())
        );
    }

    #[test]
    fn test_should_omit_empty_sets_and_keep_defaults_elsewhere() {
        let h = harness(SchemaKind::V2Compatible);
        let bare = Profile {
            handle: "bare".to_owned(),
            ..Profile::default()
        };
        let item = h.mapper.marshal_from_object(&bare).unwrap();
        assert!(!item.contains_key("tags"));
        assert!(!item.contains_key("lucky"));
        assert!(!item.contains_key("home"));
        assert_eq!(item["age"], AttributeValue::N("0".to_owned()));

        let back: Profile = h.mapper.marshal_into_object(&item).unwrap();
        assert_eq!(back, bare);
    }

    #[test]
    fn test_should_marshal_many_items() {
        let h = harness(SchemaKind::V2);
        let items: Vec<_> = ["a", "b"]
            .iter()
            .map(|handle| {
                let p = Profile {
                    handle: (*handle).to_owned(),
                    ..profile()
                };
                h.mapper.marshal_from_object(&p).unwrap()
            })
            .collect();
        let back: Vec<Profile> = h.mapper.marshal_into_objects(&items).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].handle, "b");
        assert_eq!(back[0].home, profile().home);
    }
}
