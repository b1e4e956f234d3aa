//! Control protocol wire format
//!
//! Everything the client reads or writes is a single line of JSON. This module
//! turns those lines into typed envelopes and back; it holds no state apart
//! from the request id counter.

pub mod codec;
pub mod request_id;

pub use codec::{
    CanUseToolRequest, HookCallbackRequest, Inbound, InboundRequest, McpMessageRequest,
    OutboundRequest, decode, encode_error, encode_request, encode_success, encode_user_message,
};
pub use request_id::RequestIdGenerator;
