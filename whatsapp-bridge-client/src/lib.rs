//! Operator-facing conversation view model
//!
//! Renderer-agnostic presentation state for the chat list and chat window.
//! The model holds only derived UI state (active selection, search filter,
//! draft, voice-note recording flag) on top of a local replica of the
//! repository state received over the live channel; it never fabricates
//! messages locally — sends wait for the broadcast round-trip.

mod view;

pub use view::ConversationView;
