use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("watch channel send failed")]
    WatchSend,
    #[error("engine command channel closed")]
    CommandChannelClosed,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
