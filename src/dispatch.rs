//! RPC dispatch
//!
//! Maps user rpc ids to handlers. Each handler declares the argument
//! signature used to decode the raw payload of inbound messages.

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};

use crate::core::{ClientId, MessageQueue, NetworkId, RpcId};
use crate::error::{Error, Result};
use crate::protocol::{decode_arguments, ArgKind, Message, Param, Payload, RpcArgument, Signature};

/// Everything a handler learns about one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub caller: ClientId,
    pub callee: ClientId,
    pub rpc: RpcId,
    pub target: NetworkId,
    pub args: Vec<RpcArgument>,
}

type Handler = Box<dyn FnMut(RpcCall) + Send>;

struct Registration {
    signature: Signature,
    handler: Handler,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<RpcId, Registration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `rpc`, replacing any earlier one.
    pub fn register<H>(&mut self, rpc: RpcId, signature: Signature, handler: H) -> Result<()>
    where
        H: FnMut(RpcCall) + Send + 'static,
    {
        if rpc.is_reserved() {
            return Err(Error::ReservedRpc { rpc });
        }
        let registration = Registration {
            signature,
            handler: Box::new(handler),
        };
        if self.handlers.insert(rpc, registration).is_some() {
            debug!("handler for {} replaced", rpc);
        }
        Ok(())
    }

    pub fn unregister(&mut self, rpc: RpcId) -> bool {
        self.handlers.remove(&rpc).is_some()
    }

    pub fn is_registered(&self, rpc: RpcId) -> bool {
        self.handlers.contains_key(&rpc)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler for `message`.
    ///
    /// Returns `Ok(false)` when no handler is registered for its rpc.
    pub fn dispatch(&mut self, message: Message) -> Result<bool> {
        let Some(registration) = self.handlers.get_mut(&message.rpc) else {
            debug!("no handler for {} from {}", message.rpc, message.caller);
            return Ok(false);
        };

        let args = match message.payload {
            Payload::Encoded(bytes) => decode_arguments(&bytes, &registration.signature)?,
            Payload::Arguments(args) => {
                check_signature(&args, &registration.signature)?;
                args
            }
        };

        (registration.handler)(RpcCall {
            caller: message.caller,
            callee: message.callee,
            rpc: message.rpc,
            target: message.target,
            args,
        });
        Ok(true)
    }

    /// Dispatch everything currently queued. Messages that fail to decode
    /// are logged and skipped.
    ///
    /// Returns the number of handlers invoked.
    pub fn execute_queue(&mut self, queue: &MessageQueue) -> usize {
        let mut invoked = 0;
        for message in queue.drain() {
            let (rpc, caller) = (message.rpc, message.caller);
            match self.dispatch(message) {
                Ok(true) => invoked += 1,
                Ok(false) => {}
                Err(err) => warn!("{} from {} rejected: {}", rpc, caller, err),
            }
        }
        invoked
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rpcs: Vec<_> = self.handlers.keys().copied().collect();
        rpcs.sort_by_key(|rpc| rpc.get());
        f.debug_struct("Dispatcher").field("rpcs", &rpcs).finish()
    }
}

/// Check locally built arguments against a handler's signature.
fn check_signature(args: &[RpcArgument], signature: &[Param]) -> Result<()> {
    if args.len() != signature.len() {
        return Err(Error::ArgumentCount {
            expected: signature.len(),
            found: args.len(),
        });
    }
    for (arg, param) in args.iter().zip(signature) {
        let expected = match param {
            Param::Kind(kind) => *kind,
            Param::Encodable(_) => ArgKind::Encodable,
        };
        if arg.kind() != expected {
            return Err(Error::TypeMismatch {
                expected,
                found: arg.kind(),
            });
        }
    }
    Ok(())
}
