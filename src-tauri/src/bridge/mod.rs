//! Bridge between the session and a sandboxed script caller.
//!
//! Both transports share [`BridgeRequest`] and the [`MessageRouter`]:
//!
//! - [`MessageChannelBridge`] takes posted JSON messages that name callbacks and
//!   answers by evaluating `name(arg);` script text.
//! - [`DirectBinding`] takes callables straight from the scripting engine.

mod direct;
pub mod escape;
mod message_channel;
mod protocol;
mod router;
mod script;

pub use direct::{Callable, DirectBinding, ScriptFunction};
pub use message_channel::{MessageChannelBridge, NamedCallback, ScriptEvaluator};
pub use protocol::{
    BridgeRequest, CallbackArg, CallbackName, OutcomeChannel, ProtocolError, METHODS,
};
pub use router::MessageRouter;
pub use script::{user_script, WEBKIT_POSTER};
