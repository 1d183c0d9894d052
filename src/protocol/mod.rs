//! Memcached ASCII protocol implementation

pub mod command;
pub mod parser;
pub mod response;

pub use command::{Command, MAX_KEY_LENGTH, StorageVerb};
pub use parser::{
    MAX_DATA_LENGTH, ParseResult, PendingStorageCommand, parse, parse_storage_command_line,
    parse_storage_data,
};
pub use response::ResponseWriter;
