//! JSON bodies exchanged with a node. Keys and values travel hex-encoded.

use nestkv_core::store::network::{CommitRequest, Mutation, RemoteRead};
use nestkv_core::store::KeyValue;
use nestkv_core::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBody {
    pub begin: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub rows: Vec<[String; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationBody {
    Set { key: String, value: String },
    Clear { key: String },
    ClearRange { begin: String, end: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBody {
    pub read_version: u64,
    #[serde(default)]
    pub read_ranges: Vec<[String; 2]>,
    #[serde(default)]
    pub mutations: Vec<MutationBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

const NOT_COMMITTED: &str = "not_committed";
const TOO_OLD: &str = "transaction_too_old";
const BAD_REQUEST: &str = "bad_request";
const INTERNAL: &str = "internal";

impl ErrorBody {
    pub fn from_error(err: &Error) -> Self {
        let code = match err {
            Error::NotCommitted => NOT_COMMITTED,
            Error::TransactionTooOld => TOO_OLD,
            Error::Remote(_) | Error::Codec(_) => BAD_REQUEST,
            _ => INTERNAL,
        };
        Self {
            error: err.to_string(),
            code: code.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// The error a client raises for this body.
    pub fn into_error(self) -> Error {
        match self.code.as_str() {
            NOT_COMMITTED => Error::NotCommitted,
            TOO_OLD => Error::TransactionTooOld,
            _ => Error::Remote(self.error),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.code == NOT_COMMITTED || self.code == TOO_OLD
    }
}

pub fn unhex(s: &str) -> Result<Vec<u8>, Error> {
    hex::decode(s).map_err(|e| Error::Remote(format!("invalid hex '{}': {}", s, e)))
}

fn unhex_pair(pair: &[String; 2]) -> Result<(Vec<u8>, Vec<u8>), Error> {
    Ok((unhex(&pair[0])?, unhex(&pair[1])?))
}

fn hex_pair(a: &[u8], b: &[u8]) -> [String; 2] {
    [hex::encode(a), hex::encode(b)]
}

impl From<&RemoteRead> for ReadBody {
    fn from(r: &RemoteRead) -> Self {
        Self {
            begin: hex::encode(&r.begin),
            end: r.end.as_ref().map(hex::encode),
            limit: r.limit,
        }
    }
}

impl TryFrom<ReadBody> for RemoteRead {
    type Error = Error;

    fn try_from(body: ReadBody) -> Result<Self, Error> {
        Ok(RemoteRead {
            begin: unhex(&body.begin)?,
            end: body.end.as_deref().map(unhex).transpose()?,
            limit: body.limit,
        })
    }
}

impl From<&[KeyValue]> for ReadResponse {
    fn from(rows: &[KeyValue]) -> Self {
        Self {
            rows: rows.iter().map(|(k, v)| hex_pair(k, v)).collect(),
        }
    }
}

impl ReadResponse {
    pub fn into_rows(self) -> Result<Vec<KeyValue>, Error> {
        self.rows.iter().map(unhex_pair).collect()
    }
}

impl From<&Mutation> for MutationBody {
    fn from(m: &Mutation) -> Self {
        match m {
            Mutation::Set { key, value } => MutationBody::Set {
                key: hex::encode(key),
                value: hex::encode(value),
            },
            Mutation::Clear { key } => MutationBody::Clear { key: hex::encode(key) },
            Mutation::ClearRange { begin, end } => MutationBody::ClearRange {
                begin: hex::encode(begin),
                end: hex::encode(end),
            },
        }
    }
}

impl TryFrom<MutationBody> for Mutation {
    type Error = Error;

    fn try_from(body: MutationBody) -> Result<Self, Error> {
        Ok(match body {
            MutationBody::Set { key, value } => Mutation::Set {
                key: unhex(&key)?,
                value: unhex(&value)?,
            },
            MutationBody::Clear { key } => Mutation::Clear { key: unhex(&key)? },
            MutationBody::ClearRange { begin, end } => Mutation::ClearRange {
                begin: unhex(&begin)?,
                end: unhex(&end)?,
            },
        })
    }
}

impl From<&CommitRequest> for CommitBody {
    fn from(r: &CommitRequest) -> Self {
        Self {
            read_version: r.read_version,
            read_ranges: r.read_ranges.iter().map(|(b, e)| hex_pair(b, e)).collect(),
            mutations: r.mutations.iter().map(MutationBody::from).collect(),
        }
    }
}

impl TryFrom<CommitBody> for CommitRequest {
    type Error = Error;

    fn try_from(body: CommitBody) -> Result<Self, Error> {
        Ok(CommitRequest {
            read_version: body.read_version,
            read_ranges: body.read_ranges.iter().map(unhex_pair).collect::<Result<_, _>>()?,
            mutations: body
                .mutations
                .into_iter()
                .map(Mutation::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}
