//! Message envelope exchanged between peers and the broker.
//!
//! Every message is one JSONL line. The envelope carries a kind tag and,
//! for call and reply traffic, the caller's correlation token. Payloads
//! are opaque JSON values the broker forwards without interpretation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token value marking "no caller": services carry it, and the broker
/// never assigns it to a caller connection.
pub const NO_TOKEN: u32 = 0;

/// Role a peer announces when it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Invokes methods and receives replies.
    Caller,
    /// Registers methods and executes invocations on request.
    Service,
}

impl Role {
    /// Canonical lowercase name, used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Service => "service",
        }
    }
}

/// Bus messages, serialized as a tagged JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// First line a peer must send after connecting: the role handshake.
    Hello {
        /// Role the peer will play for the lifetime of the connection.
        role: Role,
    },
    /// Broker's answer to a `Hello`; `token` is the caller's correlation
    /// token ([`NO_TOKEN`] for services).
    HelloAck {
        /// Correlation token assigned to the connection.
        token: u32,
    },
    /// Caller invokes a method.
    Call {
        /// The caller's correlation token.
        token: u32,
        /// Dotted method path, e.g. `calc.add`.
        path: String,
        /// Opaque argument payload, forwarded unmodified.
        #[serde(default)]
        payload: Value,
    },
    /// Result of a call, delivered to the caller identified by `token`.
    Reply {
        /// Token copied from the originating call.
        token: u32,
        /// Opaque result payload.
        #[serde(default)]
        payload: Value,
        /// Present when the broker or a local handler synthesized a
        /// failure instead of a result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Service announces methods it owns.
    ServiceRegister {
        /// Dotted method paths to install.
        paths: Vec<String>,
    },
    /// Service withdraws methods it previously announced.
    ServiceUnregister {
        /// Dotted method paths to remove.
        paths: Vec<String>,
    },
}

impl Message {
    /// Builds the role handshake line.
    #[must_use]
    pub fn hello(role: Role) -> Self {
        Self::Hello { role }
    }

    /// Builds the handshake acknowledgement.
    #[must_use]
    pub fn hello_ack(token: u32) -> Self {
        Self::HelloAck { token }
    }

    /// Builds a method call.
    #[must_use]
    pub fn call(token: u32, path: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            token,
            path: path.into(),
            payload,
        }
    }

    /// Builds a successful reply.
    #[must_use]
    pub fn reply(token: u32, payload: Value) -> Self {
        Self::Reply {
            token,
            payload,
            error: None,
        }
    }

    /// Builds a synthesized failure reply.
    #[must_use]
    pub fn error_reply(token: u32, error: impl Into<String>) -> Self {
        Self::Reply {
            token,
            payload: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Builds a service registration announcement.
    #[must_use]
    pub fn service_register(paths: Vec<String>) -> Self {
        Self::ServiceRegister { paths }
    }

    /// Builds a service withdrawal announcement.
    #[must_use]
    pub fn service_unregister(paths: Vec<String>) -> Self {
        Self::ServiceUnregister { paths }
    }

    /// The kind tag as it appears on the wire, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::HelloAck { .. } => "hello_ack",
            Self::Call { .. } => "call",
            Self::Reply { .. } => "reply",
            Self::ServiceRegister { .. } => "service_register",
            Self::ServiceUnregister { .. } => "service_unregister",
        }
    }
}
