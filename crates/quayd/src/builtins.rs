//! Daemon-internal methods installed at startup.
//!
//! Built-ins live under the `quay.` namespace and execute on the reactor
//! thread without a network hop. They are registered before the loop
//! starts; peers cannot install or replace local entries.

use std::sync::Arc;

use serde_json::Value;

use crate::broker::{Broker, MethodPathError};

/// Installs the built-in method set on a freshly bootstrapped broker.
///
/// - `quay.ping` echoes its payload back to the caller.
/// - `quay.methods` returns the sorted list of registered method paths.
pub(crate) fn install(broker: &mut Broker) -> Result<(), MethodPathError> {
    broker.register_local("quay.ping", Arc::new(|_, payload| Ok(payload.clone())))?;
    broker.register_local(
        "quay.methods",
        Arc::new(|registry, _| Ok(Value::from(registry.paths()))),
    )?;
    Ok(())
}
