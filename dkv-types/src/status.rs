//! Operation status codes.
//!
//! Every request/reply carries one of these; the numeric codes are part of
//! the wire contract and never change meaning. A code this side does not
//! know decodes as [`Status::Error`] rather than failing the message.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// Generic failure; also the decode of any unknown code.
    Error,
    InvalidArgument,
    IllegalState,
    ServerUnavailable,
    StoreAlreadySubscribe,
    StoreNotSubscribe,
    IpcError,
    DbError,
    KeyNotFound,
    /// The store was recovered from a corrupted state; the operation itself
    /// succeeded.
    RecoverSuccess,
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Status::Success => 0,
            Status::Error => 1,
            Status::InvalidArgument => 2,
            Status::IllegalState => 3,
            Status::ServerUnavailable => 4,
            Status::StoreAlreadySubscribe => 5,
            Status::StoreNotSubscribe => 6,
            Status::IpcError => 7,
            Status::DbError => 8,
            Status::KeyNotFound => 9,
            Status::RecoverSuccess => 10,
        }
    }

    pub fn from_code(code: u32) -> Status {
        match code {
            0 => Status::Success,
            1 => Status::Error,
            2 => Status::InvalidArgument,
            3 => Status::IllegalState,
            4 => Status::ServerUnavailable,
            5 => Status::StoreAlreadySubscribe,
            6 => Status::StoreNotSubscribe,
            7 => Status::IpcError,
            8 => Status::DbError,
            9 => Status::KeyNotFound,
            10 => Status::RecoverSuccess,
            _ => Status::Error,
        }
    }

    /// Success-like: the caller's data is valid. Covers [`Status::Success`]
    /// and [`Status::RecoverSuccess`].
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::RecoverSuccess)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::IllegalState => "ILLEGAL_STATE",
            Status::ServerUnavailable => "SERVER_UNAVAILABLE",
            Status::StoreAlreadySubscribe => "STORE_ALREADY_SUBSCRIBE",
            Status::StoreNotSubscribe => "STORE_NOT_SUBSCRIBE",
            Status::IpcError => "IPC_ERROR",
            Status::DbError => "DB_ERROR",
            Status::KeyNotFound => "KEY_NOT_FOUND",
            Status::RecoverSuccess => "RECOVER_SUCCESS",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Status {}
