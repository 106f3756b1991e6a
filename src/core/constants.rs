//! Wire-level string constants
//!
//! Role names, content/tool types, event names and finish reasons shared by
//! the converters and the HTTP layer.

/// Message role constants
pub mod role {
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
    pub const SYSTEM: &str = "system";
    pub const TOOL: &str = "tool";
}

/// Tool type constants
pub mod tool {
    /// Function tool type
    pub const FUNCTION: &str = "function";
}

/// Finish reasons reported by the target dialect
pub mod finish {
    pub const STOP: &str = "stop";
    pub const LENGTH: &str = "length";
    pub const TOOL_CALLS: &str = "tool_calls";
    pub const FUNCTION_CALL: &str = "function_call";
    pub const CONTENT_FILTER: &str = "content_filter";
}

/// Server-sent event names of the source dialect
pub mod event {
    pub const MESSAGE_START: &str = "message_start";
    pub const MESSAGE_STOP: &str = "message_stop";
    pub const MESSAGE_DELTA: &str = "message_delta";
    pub const CONTENT_BLOCK_START: &str = "content_block_start";
    pub const CONTENT_BLOCK_STOP: &str = "content_block_stop";
    pub const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
    pub const PING: &str = "ping";
    pub const ERROR: &str = "error";
}

/// Id prefixes for identifiers minted by the gateway
pub mod id {
    pub const MESSAGE: &str = "msg_";
    pub const TOOL_USE: &str = "toolu_";
}

/// Mint a fresh id with the given prefix and a 24 character random suffix
pub fn new_id(prefix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &raw[..24])
}
