use crate::bid::BidStatus;
use crate::types::BidId;

/// Machine-checkable category of a [`BidError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Forbidden,
    Expired,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum BidError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(ConflictReason),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bid {0} has expired, place a new bid")]
    Expired(BidId),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record encoding failure: {0}")]
    Codec(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("price must be greater than zero")]
    NonPositivePrice,
    #[error("quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("a product id is required")]
    MissingProduct,
    #[error("a product name is required")]
    MissingName,
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("malformed {kind} id: {raw}")]
    MalformedId { kind: &'static str, raw: String },
    #[error("requested quantity {requested} exceeds available quantity {available}")]
    QuantityExceedsStock { requested: String, available: String },
    #[error("payment amount {paid} does not match the agreed total {expected}")]
    PaymentMismatch { paid: String, expected: String },
    #[error("a payment reference is required")]
    MissingPaymentReference,
    #[error("{secs} seconds from now is past the last storable instant")]
    TimeOutOfRange { secs: u64 },
    #[error("amount arithmetic overflowed")]
    Overflow,
    #[error("history chain is broken at sequence {seq}")]
    BrokenHistory { seq: u64 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    #[error("bid is already {0}")]
    AlreadyClosed(BidStatus),
    #[error("it is the {awaiting} side's turn to respond to this {status} bid")]
    NotYourTurn {
        status: BidStatus,
        awaiting: crate::types::Role,
    },
    #[error("an active bid by this buyer already exists on this product")]
    DuplicateActiveBid,
    #[error("negotiation limit reached ({max} rounds)")]
    NegotiationLimitReached { max: u32 },
    #[error("product is not open for bidding")]
    ProductNotBiddable,
    #[error("product is locked by an active bid")]
    ProductLocked,
    #[error("product is no longer available to this bid")]
    ProductUnavailable,
    #[error("bid is {0}, only accepted bids can be paid")]
    NotAccepted(BidStatus),
    #[error("an order with a different payment reference already exists for this bid")]
    DuplicateOrder,
    #[error("bid was modified concurrently (expected version {expected}, found {actual})")]
    StaleVersion { expected: u64, actual: u64 },
}

impl BidError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BidError::InvalidInput(_) => ErrorKind::InvalidInput,
            BidError::NotFound { .. } => ErrorKind::NotFound,
            BidError::Conflict(_) => ErrorKind::Conflict,
            BidError::Forbidden(_) => ErrorKind::Forbidden,
            BidError::Expired(_) => ErrorKind::Expired,
            BidError::Storage(_) | BidError::Codec(_) | BidError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Only infrastructure failures are worth retrying; every domain outcome
    /// requires the caller to change input or state first.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BidError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<ConflictReason> for BidError {
    fn from(reason: ConflictReason) -> Self {
        BidError::Conflict(reason)
    }
}

impl From<sled::transaction::TransactionError<BidError>> for BidError {
    fn from(err: sled::transaction::TransactionError<BidError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(inner) => BidError::Storage(inner),
        }
    }
}
