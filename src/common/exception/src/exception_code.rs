// Copyright 2024 CrestDB Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(non_snake_case)]

use crate::ErrorCode;

macro_rules! build_exceptions {
    ($($(#[$meta:meta])* $body:ident($code:expr)),*$(,)*) => {
        impl ErrorCode {
            $(
                $(
                    #[$meta]
                )*
                pub fn $body(display_text: impl Into<String>) -> ErrorCode {
                    ErrorCode::create($code, display_text.into())
                }
            )*
        }
    }
}

// Core errors [0-1002]
build_exceptions! {
    /// Success code
    Ok(0),
    /// Internal logic error, always a bug
    LogicalError(1001),
    /// Uncategorized error
    UnknownException(1002),
}

// Catalog and metadata errors [1003-1030]
build_exceptions! {
    /// Table not found
    UnknownTable(1003),
    /// Table ID not found
    UnknownTableId(1004),
    /// Column not found in table metadata
    UnknownColumn(1005),
    /// Index not found in table metadata
    UnknownIndex(1006),
}

// Value and decode errors [1040-1060]
build_exceptions! {
    /// Invalid arguments
    BadArguments(1040),
    /// Value does not fit the requested type
    BadDataValueType(1041),
    /// Malformed byte sequence
    BadBytes(1042),
    /// Unsupported data type for the operation
    IllegalDataType(1043),
    /// Blob (de)serialization failure
    SerializeError(1044),
}

// Storage and transaction errors [1070-1090]
build_exceptions! {
    /// Catalog read failure
    StorageReadError(1070),
    /// Transactional write failure
    TransactionError(1071),
}
