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

use std::fmt::Debug;
use std::fmt::Formatter;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ErrorCode>;

#[derive(Error)]
#[error("Code: {code}, displayText = {display_text}.")]
pub struct ErrorCode {
    code: u16,
    display_text: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ErrorCode {
    pub fn create(code: u16, display_text: impl Into<String>) -> ErrorCode {
        ErrorCode {
            code,
            display_text: display_text.into(),
            cause: None,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> String {
        self.display_text.clone()
    }

    pub fn add_message_back(mut self, msg: impl AsRef<str>) -> Self {
        self.display_text = format!("{}{}", self.display_text, msg.as_ref());
        self
    }

    pub fn set_cause(mut self, cause: Box<dyn std::error::Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl Debug for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(
                f,
                "Code: {}, displayText = {}, cause: {:?}.",
                self.code, self.display_text, cause
            ),
            None => write!(f, "Code: {}, displayText = {}.", self.code, self.display_text),
        }
    }
}

impl Clone for ErrorCode {
    fn clone(&self) -> Self {
        ErrorCode::create(self.code, self.display_text.clone())
    }
}
