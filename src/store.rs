use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::record::{Decision, DeliveryRecord, OverrideRequest, ReturnRecord};

/// 记录仓库 (Record Store)
///
/// 唯一的共享可变资源。评分器和决策引擎只拿副本，所有持久化都经过这里。
/// - 交付记录：按 order_id 覆盖写 (last-writer-wins)
/// - 退货记录：只追加，每次尝试都保留
pub trait RecordStore: Send + Sync {
    fn put_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError>;
    fn get_delivery(&self, order_id: &str) -> Result<Option<DeliveryRecord>, StoreError>;

    /// 分配一个新的退货请求 ID，单调递增
    fn next_request_id(&self) -> Result<String, StoreError>;
    /// 追加一条退货记录，连同它引用的图片一起原子写入
    fn append_return(&self, record: &ReturnRecord, image: &[u8]) -> Result<(), StoreError>;
    /// 该订单的全部退货记录，按请求 ID 升序（两种实现一致）
    fn get_returns(&self, order_id: &str) -> Result<Vec<ReturnRecord>, StoreError>;
    fn get_return(&self, request_id: &str) -> Result<Option<ReturnRecord>, StoreError>;
    fn returns_with_decision(&self, decision: Decision) -> Result<Vec<ReturnRecord>, StoreError>;
    /// 原子地应用人工改判；记录不存在时返回 None
    fn apply_override(
        &self,
        request_id: &str,
        request: &OverrideRequest,
    ) -> Result<Option<ReturnRecord>, StoreError>;

    fn put_image(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn get_image(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

fn format_request_id(id: u64) -> String {
    format!("RET-{id:016}")
}

// ==========================================
// Sled 持久化实现
// ==========================================

pub struct SledRecordStore {
    db: sled::Db,
    deliveries: sled::Tree,
    returns: sled::Tree,
    /// 二级索引：len(order_id) u32 BE ‖ order_id ‖ request_id -> request_id
    returns_by_order: sled::Tree,
    images: sled::Tree,
}

impl SledRecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// 临时库，进程退出即删除
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            deliveries: db.open_tree("deliveries")?,
            returns: db.open_tree("returns")?,
            returns_by_order: db.open_tree("returns_by_order")?,
            images: db.open_tree("images")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// 订单号带长度前缀，任意字节（包括 0x00）都不会落进别的订单的扫描范围
    fn order_prefix(order_id: &str) -> Vec<u8> {
        let bytes = order_id.as_bytes();
        let mut prefix = Vec::with_capacity(4 + bytes.len());
        prefix.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        prefix.extend_from_slice(bytes);
        prefix
    }

    fn decode_return(raw: &[u8]) -> Result<ReturnRecord, StoreError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

impl RecordStore for SledRecordStore {
    fn put_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record)?;
        self.deliveries.insert(record.order_id.as_bytes(), value)?;
        Ok(())
    }

    fn get_delivery(&self, order_id: &str) -> Result<Option<DeliveryRecord>, StoreError> {
        match self.deliveries.get(order_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn next_request_id(&self) -> Result<String, StoreError> {
        Ok(format_request_id(self.db.generate_id()?))
    }

    fn append_return(&self, record: &ReturnRecord, image: &[u8]) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record)?;
        let key = record.request_id.as_bytes();
        let mut index_key = Self::order_prefix(&record.order_id);
        index_key.extend_from_slice(key);
        let image_key = record.image_reference.as_bytes();

        // 记录、索引和图片在同一个事务里写入，不会出现半条记录或孤儿图片
        (&self.returns, &self.returns_by_order, &self.images)
            .transaction(|(returns, index, images)| {
                returns.insert(key, value.as_slice())?;
                index.insert(index_key.as_slice(), key)?;
                images.insert(image_key, image)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(err) => StoreError::Backend(err),
                TransactionError::Abort(()) => {
                    StoreError::Corrupt("return append aborted".to_string())
                }
            })
    }

    fn get_returns(&self, order_id: &str) -> Result<Vec<ReturnRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.returns_by_order.scan_prefix(Self::order_prefix(order_id)) {
            let (_, request_id) = entry?;
            let raw = self.returns.get(&request_id)?.ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "index points at missing return {}",
                    String::from_utf8_lossy(&request_id)
                ))
            })?;
            records.push(Self::decode_return(&raw)?);
        }
        Ok(records)
    }

    fn get_return(&self, request_id: &str) -> Result<Option<ReturnRecord>, StoreError> {
        match self.returns.get(request_id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode_return(&raw)?)),
            None => Ok(None),
        }
    }

    fn returns_with_decision(&self, decision: Decision) -> Result<Vec<ReturnRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.returns.iter() {
            let (_, raw) = entry?;
            let record = Self::decode_return(&raw)?;
            if record.decision == decision {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn apply_override(
        &self,
        request_id: &str,
        request: &OverrideRequest,
    ) -> Result<Option<ReturnRecord>, StoreError> {
        let key = request_id.as_bytes();
        self.returns
            .transaction(|tx| {
                let Some(raw) = tx.get(key)? else {
                    return Ok(None);
                };
                let mut record: ReturnRecord = serde_json::from_slice(&raw)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::Codec(e)))?;
                record.apply_override(request);
                let value = serde_json::to_vec(&record)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::Codec(e)))?;
                tx.insert(key, value)?;
                Ok(Some(record))
            })
            .map_err(|e| match e {
                TransactionError::Storage(err) => StoreError::Backend(err),
                TransactionError::Abort(err) => err,
            })
    }

    fn put_image(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.images.insert(reference.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_image(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.images.get(reference.as_bytes())?.map(|v| v.to_vec()))
    }
}

// ==========================================
// 内存实现（测试 / 嵌入式场景）
// ==========================================

#[derive(Default)]
struct MemoryTables {
    deliveries: HashMap<String, DeliveryRecord>,
    returns: HashMap<String, ReturnRecord>,
    /// order_id -> request_id，有序集合，与 sled 索引的扫描顺序一致
    returns_by_order: HashMap<String, BTreeSet<String>>,
    images: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<MemoryTables>,
    next_id: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn put_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .deliveries
            .insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    fn get_delivery(&self, order_id: &str) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self.tables.read().deliveries.get(order_id).cloned())
    }

    fn next_request_id(&self) -> Result<String, StoreError> {
        Ok(format_request_id(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn append_return(&self, record: &ReturnRecord, image: &[u8]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables
            .returns
            .insert(record.request_id.clone(), record.clone());
        tables
            .returns_by_order
            .entry(record.order_id.clone())
            .or_default()
            .insert(record.request_id.clone());
        tables
            .images
            .insert(record.image_reference.clone(), image.to_vec());
        Ok(())
    }

    fn get_returns(&self, order_id: &str) -> Result<Vec<ReturnRecord>, StoreError> {
        let tables = self.tables.read();
        let Some(ids) = tables.returns_by_order.get(order_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| tables.returns.get(id).cloned())
            .collect())
    }

    fn get_return(&self, request_id: &str) -> Result<Option<ReturnRecord>, StoreError> {
        Ok(self.tables.read().returns.get(request_id).cloned())
    }

    fn returns_with_decision(&self, decision: Decision) -> Result<Vec<ReturnRecord>, StoreError> {
        let tables = self.tables.read();
        let mut records: Vec<ReturnRecord> = tables
            .returns
            .values()
            .filter(|r| r.decision == decision)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        Ok(records)
    }

    fn apply_override(
        &self,
        request_id: &str,
        request: &OverrideRequest,
    ) -> Result<Option<ReturnRecord>, StoreError> {
        let mut tables = self.tables.write();
        Ok(tables.returns.get_mut(request_id).map(|record| {
            record.apply_override(request);
            record.clone()
        }))
    }

    fn put_image(&self, reference: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.tables
            .write()
            .images
            .insert(reference.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get_image(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().images.get(reference).cloned())
    }
}
