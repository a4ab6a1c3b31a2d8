//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`RequestError`](neterror::RequestError): terminal failure with the request and response attached
//! - [`LoadState`](loadstate::LoadState): Request loading states from `load_states_list.h`
//! - [`Deadline`](deadline::Deadline): one timeout spanning every hop

pub mod capabilities;
pub mod context;
pub mod deadline;
pub mod loadstate;
pub mod neterror;

#[cfg(test)]
mod tests;
