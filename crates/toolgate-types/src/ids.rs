//! Identifier generation.

use uuid::Uuid;

/// Length of the random suffix of generated tool-call ids.
const TOOL_CALL_SUFFIX_LEN: usize = 24;

/// A fresh chat completion id (`chatcmpl-<uuid>`).
pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

/// A fresh tool-call id (`call_` followed by 24 characters of a uuid).
pub fn tool_call_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("call_{}", &uuid[..TOOL_CALL_SUFFIX_LEN])
}
