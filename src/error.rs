//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum composed of the failure domains from the
//! driver: transport, protocol, schema, codec. Mechanical conversions use
//! `#[from]`; everything else is constructed explicitly at its call site.

use std::fmt;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request was attempted while the connection state was not `Connected`.
    #[error("not connected")]
    NotConnected,

    /// A socket-level transport failure surfaced during a read or write.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// The server returned a response whose status indicated failure.
    #[error("{}", .descriptor.as_ref().map(|d| d.to_string()).unwrap_or_else(|| message.clone()))]
    Database {
        code: u32,
        message: String,
        descriptor: Option<ErrorDescriptor>,
    },

    /// Client-side name resolution failure (unknown space/index/field).
    #[error("schema error: {0}")]
    Schema(String),

    /// A request or connect attempt exceeded its configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The waiter for a request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Misuse: an unsupported encodable type was passed to the codec.
    #[error("unsupported type: {0}")]
    Type(String),

    /// Misuse: a malformed operations list, iterator, or key shape.
    #[error("invalid value: {0}")]
    Value(String),

    #[error("failed to encode msgpack value: {0}")]
    Encode(#[from] rmp::encode::ValueWriteError),

    #[error("failed to read msgpack marker: {0}")]
    DecodeMarker(#[from] rmp::decode::MarkerReadError),

    #[error("failed to read msgpack value: {0}")]
    DecodeValue(#[from] rmp::decode::ValueReadError<std::io::Error>),

    #[error("failed to read msgpack number: {0}")]
    DecodeNum(#[from] rmp::decode::NumValueReadError<std::io::Error>),

    #[error("greeting banner was malformed")]
    BadGreeting,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

impl Error {
    pub fn database(code: u32, message: impl Into<String>) -> Self {
        Error::Database {
            code,
            message: message.into(),
            descriptor: None,
        }
    }

    /// The low 15 bits of a raw IPROTO status code (the high bit marks an error response).
    pub fn code_from_status(status: u32) -> u32 {
        status & 0x7fff
    }

    pub fn is_wrong_schema_version(&self) -> bool {
        matches!(self, Error::Database { code, .. } if *code == TarantoolErrorCode::WrongSchemaVersion as u32)
    }

    pub fn is_transient_connect_error(&self) -> bool {
        matches!(
            self,
            Error::Database { code, .. }
                if *code == TarantoolErrorCode::Loading as u32
                || *code == TarantoolErrorCode::NoSuchSpace as u32
                || *code == TarantoolErrorCode::NoSuchIndexID as u32
        )
    }
}

/// A single stack frame of a server-side `MP_ERROR` descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorFrame {
    pub error_type: String,
    pub file: String,
    pub line: u64,
    pub message: String,
    pub errno: u64,
    pub code: u64,
    pub fields: std::collections::BTreeMap<String, rmpv::Value>,
}

/// The decoded `MP_ERROR` extension payload: a stack of frames, innermost first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorDescriptor {
    pub stack: Vec<ErrorFrame>,
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stack.first() {
            Some(frame) => write!(f, "{}: {}", frame.error_type, frame.message),
            None => write!(f, "tarantool error"),
        }
    }
}

/// Numeric IPROTO error codes, as returned in the low 15 bits of a response's
/// status code. Grounded in the reference corpus's own Tarantool bindings
/// (`tarantool-module`'s `error.rs`), which carries the same list.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarantoolErrorCode {
    Unknown = 0,
    IllegalParams = 1,
    MemoryIssue = 2,
    TupleFound = 3,
    TupleNotFound = 4,
    Unsupported = 5,
    NonMaster = 6,
    Readonly = 7,
    Injection = 8,
    CreateSpace = 9,
    SpaceExists = 10,
    DropSpace = 11,
    AlterSpace = 12,
    IndexType = 13,
    ModifyIndex = 14,
    LastDrop = 15,
    TupleFormatLimit = 16,
    DropPrimaryKey = 17,
    KeyPartType = 18,
    ExactMatch = 19,
    InvalidMsgpack = 20,
    ProcRet = 21,
    TupleNotArray = 22,
    FieldType = 23,
    IndexPartTypeMismatch = 24,
    Splice = 25,
    UpdateArgType = 26,
    FormatMismatchIndexPart = 27,
    UnknownUpdateOp = 28,
    UpdateField = 29,
    FunctionTxActive = 30,
    KeyPartCount = 31,
    ProcLua = 32,
    NoSuchProc = 33,
    NoSuchTrigger = 34,
    NoSuchIndexID = 35,
    NoSuchSpace = 36,
    NoSuchFieldNo = 37,
    ExactFieldCount = 38,
    FieldMissing = 39,
    WalIo = 40,
    MoreThanOneTuple = 41,
    AccessDenied = 42,
    CreateUser = 43,
    DropUser = 44,
    NoSuchUser = 45,
    UserExists = 46,
    PasswordMismatch = 47,
    UnknownRequestType = 48,
    UnknownSchemaObject = 49,
    CreateFunction = 50,
    NoSuchFunction = 51,
    FunctionExists = 52,
    BeforeReplaceRet = 53,
    MultistatementTransaction = 54,
    TriggerExists = 55,
    UserMax = 56,
    NoSuchEngine = 57,
    ReloadCfg = 58,
    Cfg = 59,
    SavepointEmptyTx = 60,
    NoSuchSavepoint = 61,
    UnknownReplica = 62,
    ReplicasetUuidMismatch = 63,
    InvalidUuid = 64,
    ReplicasetUuidIsRo = 65,
    InstanceUuidMismatch = 66,
    ReplicaIDIsReserved = 67,
    InvalidOrder = 68,
    MissingRequestField = 69,
    Identifier = 70,
    DropFunction = 71,
    IteratorType = 72,
    ReplicaMax = 73,
    InvalidXlog = 74,
    InvalidXlogName = 75,
    InvalidXlogOrder = 76,
    NoConnection = 77,
    Timeout = 78,
    ActiveTransaction = 79,
    CursorNoTransaction = 80,
    CrossEngineTransaction = 81,
    NoSuchRole = 82,
    RoleExists = 83,
    CreateRole = 84,
    IndexExists = 85,
    SessionClosed = 86,
    RoleLoop = 87,
    Grant = 88,
    PrivGranted = 89,
    RoleGranted = 90,
    PrivNotGranted = 91,
    RoleNotGranted = 92,
    MissingSnapshot = 93,
    CantUpdatePrimaryKey = 94,
    UpdateIntegerOverflow = 95,
    GuestUserPassword = 96,
    TransactionConflict = 97,
    UnsupportedPriv = 98,
    LoadFunction = 99,
    FunctionLanguage = 100,
    RtreeRect = 101,
    ProcC = 102,
    UnknownRtreeIndexDistanceType = 103,
    Protocol = 104,
    UpsertUniqueSecondaryKey = 105,
    WrongIndexRecord = 106,
    WrongIndexParts = 107,
    WrongIndexOptions = 108,
    WrongSchemaVersion = 109,
    MemtxMaxTupleSize = 110,
    WrongSpaceOptions = 111,
    UnsupportedIndexFeature = 112,
    ViewIsRo = 113,
    NoTransaction = 114,
    System = 115,
    Loading = 116,
    ConnectionToSelf = 117,
    KeyPartIsTooLong = 118,
    Compression = 119,
    CheckpointInProgress = 120,
    SubStmtMax = 121,
    CommitInSubStmt = 122,
    RollbackInSubStmt = 123,
    Decompression = 124,
    InvalidXlogType = 125,
    AlreadyRunning = 126,
    IndexFieldCountLimit = 127,
    LocalInstanceIDIsReadOnly = 128,
    BackupInProgress = 129,
    ReadViewAborted = 130,
    InvalidIndexFile = 131,
    InvalidRunFile = 132,
    InvalidVylogFile = 133,
    CheckpointRollback = 134,
    VyQuotaTimeout = 135,
    PartialKey = 136,
    TruncateSystemSpace = 137,
    LoadModule = 138,
    VinylMaxTupleSize = 139,
    WrongDdVersion = 140,
    WrongSpaceFormat = 141,
    CreateSequence = 142,
    AlterSequence = 143,
    DropSequence = 144,
    NoSuchSequence = 145,
    SequenceExists = 146,
    SequenceOverflow = 147,
    NoSuchIndexName = 148,
    SpaceFieldIsDuplicate = 149,
    CantCreateCollation = 150,
    WrongCollationOptions = 151,
    NullablePrimary = 152,
    NoSuchFieldName = 153,
    TransactionYield = 154,
    NoSuchGroup = 155,
    SqlBindValue = 156,
    SqlBindType = 157,
    SqlBindParameterMax = 158,
    SqlExecute = 159,
    Unused = 160,
    SqlBindNotFound = 161,
    ActionMismatch = 162,
    ViewMissingSql = 163,
    ForeignKeyConstraint = 164,
    NoSuchModule = 165,
    NoSuchCollation = 166,
    CreateFkConstraint = 167,
    DropFkConstraint = 168,
    NoSuchConstraint = 169,
    ConstraintExists = 170,
    SqlTypeMismatch = 171,
    RowidOverflow = 172,
    DropCollation = 173,
    IllegalCollationMix = 174,
    SqlNoSuchPragma = 175,
    SqlCantResolveField = 176,
    IndexExistsInSpace = 177,
    InconsistentTypes = 178,
    SqlSyntax = 179,
    SqlStackOverflow = 180,
    SqlSelectWildcard = 181,
    SqlStatementEmpty = 182,
    SqlKeywordIsReserved = 183,
    SqlUnrecognizedSyntax = 184,
    SqlUnknownToken = 185,
    SqlParserGeneric = 186,
    SqlAnalyzeArgument = 187,
    SqlColumnCountMax = 188,
    HexLiteralMax = 189,
    IntLiteralMax = 190,
    SqlParserLimit = 191,
    IndexDefUnsupported = 192,
    CkDefUnsupported = 193,
    MultikeyIndexMismatch = 194,
    CreateCkConstraint = 195,
    CkConstraintFailed = 196,
    SqlColumnCount = 197,
    FuncIndexFunc = 198,
    FuncIndexFormat = 199,
    FuncIndexParts = 200,
    BootstrapReadonly = 201,
}
