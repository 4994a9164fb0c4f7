// 7.0.2: executor errors. all are ordinary rejections returned to the caller.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("duplicate client order id {0}")]
    DuplicateOrder(String),

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("no market data for {0}")]
    NoMarketData(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("executor is shut down")]
    Shutdown,

    #[error("cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}
