//! 退货防欺诈核心 (Return Fraud Guard)
//!
//! 收货时留存交付图指纹，退货时对照基线做启发式真实性评分，
//! 叠加时间/品类风险，给出可审计的 Approved / Review / Rejected 决策。

pub mod api;
pub mod authenticity;
pub mod config;
pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod record;
pub mod risk;
pub mod service;
pub mod signer;
pub mod store;

pub use config::{Config, FraudThresholds};
pub use error::{FingerprintError, GuardError, GuardResult, StoreError};
pub use record::{Decision, DeliveryRecord, ReturnRecord};
pub use service::{ReturnGuard, ReturnOutcome, ReturnRequest};
pub use store::{MemoryRecordStore, RecordStore, SledRecordStore};
