//! 领域模型 / Domain model
//!
//! 订阅与配额、会话线程与消息、通话会话、身份以及实时事件协议
//! Subscriptions and allowances, threads and messages, call sessions,
//! identities and the real-time event protocol.

pub mod call;
pub mod event;
pub mod identity;
pub mod message;
pub mod subscription;

pub use call::{CallParticipant, CallSession, CallStatus, CallType};
pub use event::{protocol_schema, CallNotice, CallSignal, ClientEvent, ErrorKind, OnlineUser, ServerEvent};
pub use identity::{Identity, Role};
pub use message::{ConversationThread, DeliveryStatus, Message, ProfileSnapshot};
pub use subscription::{Allowance, Allowances, DebitOutcome, PlanType, ResourceKind, Subscription, Usage};
