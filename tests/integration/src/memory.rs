//! In-memory DynamoDB client.
//!
//! Items live in one ordered map per table, keyed by the primary key with
//! numbers compared numerically. Capacity knobs make batch calls leave part
//! of their work unprocessed, and a scan segment can be told to fail, so the
//! retry and parallel-scan paths can be driven end to end.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use dashmap::DashMap;
use dynamap_core::client::DynamoDBClient;
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, CreateTableInput, DeleteItemInput, GetItemInput,
    PutItemInput, QueryInput, ScanInput, UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, UpdateItemOutput,
};
use dynamap_model::types::{
    AttributeAction, AttributeValueUpdate, ComparisonOperator, Condition, ConditionalOperator,
    ExpectedAttributeValue, KeyType, KeysAndAttributes, Select, WriteRequest,
};
use dynamap_model::{AttributeValue, DynamoDBError, Item};
use parking_lot::Mutex;
use tracing::debug;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A key attribute value with DynamoDB ordering.
#[derive(Debug, Clone)]
enum Sortable {
    S(String),
    N(f64),
    B(bytes::Bytes),
    Absent,
}

impl Sortable {
    fn of(value: Option<&AttributeValue>) -> Self {
        match value {
            Some(AttributeValue::S(s)) => Self::S(s.clone()),
            Some(AttributeValue::N(n)) => Self::N(n.parse().unwrap_or(f64::NAN)),
            Some(AttributeValue::B(b)) => Self::B(b.clone()),
            _ => Self::Absent,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Absent => 0,
            Self::N(_) => 1,
            Self::S(_) => 2,
            Self::B(_) => 3,
        }
    }
}

impl Ord for Sortable {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::S(a), Self::S(b)) => a.cmp(b),
            (Self::N(a), Self::N(b)) => a.total_cmp(b),
            (Self::B(a), Self::B(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Sortable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Sortable {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Sortable {}

type StoreKey = (Sortable, Sortable);

#[derive(Debug)]
struct MemoryTable {
    hash: String,
    range: Option<String>,
    items: BTreeMap<StoreKey, Item>,
}

impl MemoryTable {
    fn store_key(&self, item: &Item) -> Result<StoreKey, DynamoDBError> {
        let hash = Sortable::of(item.get(&self.hash));
        if hash == Sortable::Absent {
            return Err(DynamoDBError::validation(format!(
                "missing key attribute {}",
                self.hash
            )));
        }
        let range = match &self.range {
            Some(name) => match Sortable::of(item.get(name)) {
                Sortable::Absent => {
                    return Err(DynamoDBError::validation(format!("missing key attribute {name}")));
                }
                range => range,
            },
            None => Sortable::Absent,
        };
        Ok((hash, range))
    }

    fn primary_key(&self, item: &Item) -> Item {
        std::iter::once(&self.hash)
            .chain(self.range.as_ref())
            .filter_map(|name| item.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?)
        }
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn satisfies(condition: &Condition, value: Option<&AttributeValue>) -> bool {
    let args = &condition.attribute_value_list;
    let Some(value) = value else {
        return condition.comparison_operator == ComparisonOperator::Null;
    };
    let cmp = |i: usize| args.get(i).and_then(|arg| compare(value, arg));
    match condition.comparison_operator {
        ComparisonOperator::Eq => cmp(0) == Some(Ordering::Equal),
        ComparisonOperator::Ne => cmp(0) != Some(Ordering::Equal),
        ComparisonOperator::Lt => cmp(0) == Some(Ordering::Less),
        ComparisonOperator::Le => matches!(cmp(0), Some(Ordering::Less | Ordering::Equal)),
        ComparisonOperator::Gt => cmp(0) == Some(Ordering::Greater),
        ComparisonOperator::Ge => matches!(cmp(0), Some(Ordering::Greater | Ordering::Equal)),
        ComparisonOperator::Between => {
            matches!(cmp(0), Some(Ordering::Greater | Ordering::Equal))
                && matches!(cmp(1), Some(Ordering::Less | Ordering::Equal))
        }
        ComparisonOperator::BeginsWith => match (value, args.first()) {
            (AttributeValue::S(s), Some(AttributeValue::S(prefix))) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        ComparisonOperator::NotNull => true,
        ComparisonOperator::Null => false,
        ComparisonOperator::In => (0..args.len()).any(|i| cmp(i) == Some(Ordering::Equal)),
        ComparisonOperator::Contains | ComparisonOperator::NotContains => false,
    }
}

fn check_expected(
    existing: Option<&Item>,
    expected: &HashMap<String, ExpectedAttributeValue>,
    operator: Option<ConditionalOperator>,
) -> Result<(), DynamoDBError> {
    if expected.is_empty() {
        return Ok(());
    }
    let holds = |(name, exp): (&String, &ExpectedAttributeValue)| {
        let current = existing.and_then(|item| item.get(name));
        match (exp.exists, &exp.value, exp.comparison_operator) {
            (Some(false), _, _) => current.is_none(),
            (_, Some(value), _) => current == Some(value),
            (_, None, Some(op)) => satisfies(
                &Condition::new(op, exp.attribute_value_list.clone()),
                current,
            ),
            _ => current.is_some(),
        }
    };
    let ok = if operator == Some(ConditionalOperator::Or) {
        expected.iter().any(holds)
    } else {
        expected.iter().all(holds)
    };
    if ok {
        Ok(())
    } else {
        Err(DynamoDBError::conditional_check_failed(
            "The conditional request failed",
        ))
    }
}

fn apply_update(item: &mut Item, name: &str, update: &AttributeValueUpdate) {
    match (update.action, &update.value) {
        (Some(AttributeAction::Delete), _) | (_, None) => {
            item.remove(name);
        }
        (Some(AttributeAction::Add), Some(value)) => {
            let merged = match (item.remove(name), value) {
                (Some(AttributeValue::Ss(mut a)), AttributeValue::Ss(b)) => {
                    a.extend(b.iter().filter(|v| !a.contains(v)).cloned().collect::<Vec<_>>());
                    AttributeValue::Ss(a)
                }
                (Some(AttributeValue::Ns(mut a)), AttributeValue::Ns(b)) => {
                    a.extend(b.iter().filter(|v| !a.contains(v)).cloned().collect::<Vec<_>>());
                    AttributeValue::Ns(a)
                }
                (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
                    let sum = a.parse::<f64>().unwrap_or(0.0) + b.parse::<f64>().unwrap_or(0.0);
                    AttributeValue::N(sum.to_string())
                }
                (_, value) => value.clone(),
            };
            item.insert(name.to_owned(), merged);
        }
        (_, Some(value)) => {
            item.insert(name.to_owned(), value.clone());
        }
    }
}

/// Stable segment assignment for scans.
fn segment_of(key: &Item, total: i32) -> i32 {
    let mut parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    parts.sort();
    let sum: u64 = parts.concat().bytes().map(u64::from).sum();
    let total = u64::try_from(total.max(1)).unwrap_or(1);
    i32::try_from(sum % total).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MemoryClient
// ---------------------------------------------------------------------------

/// A [`DynamoDBClient`] backed by in-process tables.
#[derive(Debug, Default)]
pub struct MemoryClient {
    tables: DashMap<String, MemoryTable>,
    write_capacity: AtomicUsize,
    read_capacity: AtomicUsize,
    page_size: AtomicUsize,
    failing_segment: Mutex<Option<i32>>,
    /// Requests per `BatchWriteItem` call, in call order.
    pub batch_write_sizes: Mutex<Vec<usize>>,
    /// Keys per `BatchGetItem` call, in call order.
    pub batch_get_sizes: Mutex<Vec<usize>>,
    /// Number of `Scan` calls.
    pub scan_calls: AtomicUsize,
}

impl MemoryClient {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from a `CreateTable` request.
    pub fn create_table(&self, input: &CreateTableInput) {
        let key_of = |key_type: KeyType| {
            input
                .key_schema
                .iter()
                .find(|k| k.key_type == key_type)
                .map(|k| k.attribute_name.clone())
        };
        let table = MemoryTable {
            hash: key_of(KeyType::Hash).unwrap_or_default(),
            range: key_of(KeyType::Range),
            items: BTreeMap::new(),
        };
        debug!(table = %input.table_name, hash = %table.hash, range = ?table.range, "created table");
        self.tables.insert(input.table_name.clone(), table);
    }

    /// Processes at most `n` writes per batch call; zero means unlimited.
    #[must_use]
    pub fn with_write_capacity(self, n: usize) -> Self {
        self.write_capacity.store(n, AtomicOrdering::SeqCst);
        self
    }

    /// Returns at most `n` keys per batch load call; zero means unlimited.
    #[must_use]
    pub fn with_read_capacity(self, n: usize) -> Self {
        self.read_capacity.store(n, AtomicOrdering::SeqCst);
        self
    }

    /// Returns at most `n` items per query or scan page; zero means unlimited.
    #[must_use]
    pub fn with_page_size(self, n: usize) -> Self {
        self.page_size.store(n, AtomicOrdering::SeqCst);
        self
    }

    /// Makes every scan of `segment` fail with throttling.
    pub fn fail_segment(&self, segment: i32) {
        *self.failing_segment.lock() = Some(segment);
    }

    /// Number of items stored in `table_name`.
    #[must_use]
    pub fn item_count(&self, table_name: &str) -> usize {
        self.tables.get(table_name).map_or(0, |t| t.items.len())
    }

    /// A stored item by primary key.
    #[must_use]
    pub fn raw_item(&self, table_name: &str, key: &Item) -> Option<Item> {
        let table = self.tables.get(table_name)?;
        let key = table.store_key(key).ok()?;
        table.items.get(&key).cloned()
    }

    fn limit(knob: &AtomicUsize, requested: Option<i32>) -> usize {
        let knob = knob.load(AtomicOrdering::SeqCst);
        let requested = requested.and_then(|n| usize::try_from(n).ok()).unwrap_or(0);
        match (knob, requested) {
            (0, 0) => usize::MAX,
            (0, n) | (n, 0) => n,
            (a, b) => a.min(b),
        }
    }

    fn missing(table_name: &str) -> DynamoDBError {
        DynamoDBError::resource_not_found(format!("Requested resource not found: {table_name}"))
    }

    fn write(&self, table_name: &str, request: &WriteRequest) -> Result<(), DynamoDBError> {
        let mut table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| Self::missing(table_name))?;
        if let Some(put) = &request.put_request {
            let key = table.store_key(&put.item)?;
            table.items.insert(key, put.item.clone());
        }
        if let Some(delete) = &request.delete_request {
            let key = table.store_key(&delete.key)?;
            table.items.remove(&key);
        }
        Ok(())
    }
}

fn page(
    table: &MemoryTable,
    mut items: Vec<Item>,
    start: &Item,
    limit: usize,
) -> (Vec<Item>, Item) {
    if !start.is_empty() {
        if let Some(pos) = items
            .iter()
            .position(|item| table.primary_key(item) == table.primary_key(start))
        {
            items.drain(..=pos);
        }
    }
    if items.len() > limit {
        items.truncate(limit);
        let last = items.last().map(|item| table.primary_key(item)).unwrap_or_default();
        (items, last)
    } else {
        (items, Item::new())
    }
}

fn count(items: &[Item]) -> i32 {
    i32::try_from(items.len()).unwrap_or(i32::MAX)
}

#[async_trait]
impl DynamoDBClient for MemoryClient {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        let table = self
            .tables
            .get(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let key = table.store_key(&input.key)?;
        Ok(GetItemOutput {
            item: table.items.get(&key).cloned(),
            ..GetItemOutput::default()
        })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        let mut table = self
            .tables
            .get_mut(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let key = table.store_key(&input.item)?;
        check_expected(table.items.get(&key), &input.expected, input.conditional_operator)?;
        table.items.insert(key, input.item);
        Ok(PutItemOutput::default())
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, DynamoDBError> {
        let mut table = self
            .tables
            .get_mut(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let key = table.store_key(&input.key)?;
        check_expected(table.items.get(&key), &input.expected, input.conditional_operator)?;
        let mut item = table.items.get(&key).cloned().unwrap_or_else(|| input.key.clone());
        for (name, update) in &input.attribute_updates {
            apply_update(&mut item, name, update);
        }
        table.items.insert(key, item.clone());
        Ok(UpdateItemOutput {
            attributes: item,
            ..UpdateItemOutput::default()
        })
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, DynamoDBError> {
        let mut table = self
            .tables
            .get_mut(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let key = table.store_key(&input.key)?;
        check_expected(table.items.get(&key), &input.expected, input.conditional_operator)?;
        let attributes = table.items.remove(&key).unwrap_or_default();
        Ok(DeleteItemOutput {
            attributes,
            ..DeleteItemOutput::default()
        })
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError> {
        self.batch_get_sizes.lock().push(input.key_count());
        let mut budget = Self::limit(&self.read_capacity, None);
        let mut output = BatchGetItemOutput::default();
        for (table_name, keys) in input.request_items {
            let table = self
                .tables
                .get(&table_name)
                .ok_or_else(|| Self::missing(&table_name))?;
            let mut found = Vec::new();
            let mut unprocessed = Vec::new();
            for key in keys.keys {
                if budget == 0 {
                    unprocessed.push(key);
                    continue;
                }
                budget -= 1;
                if let Some(item) = table.items.get(&table.store_key(&key)?) {
                    found.push(item.clone());
                }
            }
            output.responses.insert(table_name.clone(), found);
            if !unprocessed.is_empty() {
                output.unprocessed_keys.insert(
                    table_name,
                    KeysAndAttributes {
                        keys: unprocessed,
                        consistent_read: keys.consistent_read,
                        ..KeysAndAttributes::default()
                    },
                );
            }
        }
        Ok(output)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError> {
        self.batch_write_sizes.lock().push(input.request_count());
        if input.request_count() > 25 {
            return Err(DynamoDBError::validation(
                "Too many items requested for the BatchWriteItem call",
            ));
        }
        let mut budget = Self::limit(&self.write_capacity, None);
        let mut output = BatchWriteItemOutput::default();
        for (table_name, requests) in input.request_items {
            for request in requests {
                if budget == 0 {
                    output
                        .unprocessed_items
                        .entry(table_name.clone())
                        .or_default()
                        .push(request);
                    continue;
                }
                budget -= 1;
                self.write(&table_name, &request)?;
            }
        }
        Ok(output)
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        let table = self
            .tables
            .get(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let mut items: Vec<Item> = table
            .items
            .values()
            .filter(|item| {
                input
                    .key_conditions
                    .iter()
                    .all(|(name, condition)| satisfies(condition, item.get(name)))
            })
            .cloned()
            .collect();
        let sort_attribute = input
            .key_conditions
            .iter()
            .find(|(_, c)| c.comparison_operator != ComparisonOperator::Eq)
            .map(|(name, _)| name.clone())
            .or_else(|| table.range.clone());
        if let Some(name) = sort_attribute {
            items.sort_by(|a, b| Sortable::of(a.get(&name)).cmp(&Sortable::of(b.get(&name))));
        }
        if input.scan_index_forward == Some(false) {
            items.reverse();
        }
        let limit = Self::limit(&self.page_size, input.limit);
        let (items, last_evaluated_key) = page(&table, items, &input.exclusive_start_key, limit);
        let count = count(&items);
        Ok(QueryOutput {
            items: if input.select == Some(Select::Count) { Vec::new() } else { items },
            count,
            scanned_count: count,
            last_evaluated_key,
            ..QueryOutput::default()
        })
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        self.scan_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if input.segment.is_some() && *self.failing_segment.lock() == input.segment {
            return Err(DynamoDBError::throughput_exceeded(format!(
                "segment {} throttled",
                input.segment.unwrap_or_default()
            )));
        }
        let table = self
            .tables
            .get(&input.table_name)
            .ok_or_else(|| Self::missing(&input.table_name))?;
        let items: Vec<Item> = table
            .items
            .values()
            .filter(|item| match (input.segment, input.total_segments) {
                (Some(segment), Some(total)) => segment_of(&table.primary_key(item), total) == segment,
                _ => true,
            })
            .filter(|item| {
                input
                    .scan_filter
                    .iter()
                    .all(|(name, condition)| satisfies(condition, item.get(name)))
            })
            .cloned()
            .collect();
        let limit = Self::limit(&self.page_size, input.limit);
        let (items, last_evaluated_key) = page(&table, items, &input.exclusive_start_key, limit);
        let count = count(&items);
        Ok(ScanOutput {
            items: if input.select == Some(Select::Count) { Vec::new() } else { items },
            count,
            scanned_count: count,
            last_evaluated_key,
            ..ScanOutput::default()
        })
    }
}
